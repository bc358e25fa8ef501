use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::analyze::{summarize_file, AnalyzerRegistry, ParseOptions};
use crate::error::{EngineError, Result};
use crate::types::{is_excluded_dir_name, path_is_excluded, rel_path_of, FileSummary};

// ---------------------------------------------------------------------------
// Project scanner
// ---------------------------------------------------------------------------

/// Walks the root, applies the exclusion rules, and drives the analyzers.
///
/// A directory is skipped iff its name matches the effective exclusion set
/// (case-insensitive) or starts with a dot. Symbolic links are never followed.
/// Files with no registered analyzer are still emitted so the tree can show
/// them with zero symbols.
pub struct Scanner {
    root: PathBuf,
    excludes: BTreeSet<String>,
    registry: Arc<AnalyzerRegistry>,
}

impl Scanner {
    pub fn new(root: PathBuf, excludes: BTreeSet<String>, registry: Arc<AnalyzerRegistry>) -> Self {
        Scanner { root, excludes, registry }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a relative path sits inside an excluded directory.
    pub fn is_excluded(&self, rel_path: &str) -> bool {
        path_is_excluded(rel_path, &self.excludes)
    }

    /// Collect all candidate file paths (root-relative, sorted). Per-directory
    /// I/O errors are skipped; the walk itself never fails.
    pub fn discover(&self, cancel: &AtomicBool) -> Vec<String> {
        let results: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let excludes = self.excludes.clone();
        let root = self.root.clone();

        WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .follow_links(false)
            .threads(rayon::current_num_threads().min(12))
            .filter_entry(move |entry| {
                // The root itself always passes, whatever its name.
                if entry.depth() == 0 {
                    return true;
                }
                if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                    let name = entry.file_name().to_string_lossy();
                    return !is_excluded_dir_name(&name, &excludes);
                }
                true
            })
            .build_parallel()
            .run(|| {
                Box::new(|entry| {
                    if cancel.load(Ordering::Relaxed) {
                        return ignore::WalkState::Quit;
                    }
                    let entry = match entry {
                        Ok(e) => e,
                        Err(_) => return ignore::WalkState::Continue,
                    };
                    if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                        return ignore::WalkState::Continue;
                    }
                    if let Some(rel) = rel_path_of(&root, entry.path()) {
                        results.lock().unwrap().push(rel);
                    }
                    ignore::WalkState::Continue
                })
            });

        let mut paths = results.into_inner().unwrap();
        paths.sort();
        paths
    }

    /// Full-scan operation: parse every discovered file. Returns `Canceled`
    /// when the cancellation flag is raised mid-scan; the flag is checked
    /// between files.
    pub fn scan_all(
        &self,
        opts: &ParseOptions,
        pool: &rayon::ThreadPool,
        cancel: &AtomicBool,
    ) -> Result<Vec<FileSummary>> {
        let start = std::time::Instant::now();
        let rel_paths = self.discover(cancel);
        if cancel.load(Ordering::Relaxed) {
            return Err(EngineError::Canceled);
        }

        let summaries = self.parse_paths(&rel_paths, opts, pool, Some(cancel));
        if cancel.load(Ordering::Relaxed) {
            return Err(EngineError::Canceled);
        }

        debug!(
            files = summaries.len(),
            time_ms = start.elapsed().as_millis() as u64,
            "full scan complete"
        );
        Ok(summaries)
    }

    /// Partial-scan operation: parse the given paths only. Paths that cannot
    /// be read still yield a summary with an issue; exclusion filtering is the
    /// caller's job (the scheduler drops excluded paths before they get here).
    pub fn scan_paths(
        &self,
        rel_paths: &[String],
        opts: &ParseOptions,
        pool: &rayon::ThreadPool,
    ) -> Vec<FileSummary> {
        self.parse_paths(rel_paths, opts, pool, None)
    }

    fn parse_paths(
        &self,
        rel_paths: &[String],
        opts: &ParseOptions,
        pool: &rayon::ThreadPool,
        cancel: Option<&AtomicBool>,
    ) -> Vec<FileSummary> {
        pool.install(|| {
            rel_paths
                .par_iter()
                .filter_map(|rel| {
                    if let Some(flag) = cancel {
                        if flag.load(Ordering::Relaxed) {
                            return None;
                        }
                    }
                    Some(summarize_file(&self.registry, &self.root, rel, opts))
                })
                .collect()
        })
    }
}
