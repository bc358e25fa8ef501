//! Lifecycle orchestration: wires the scanner, index, snapshot store,
//! scheduler, watcher, and broadcaster together and owns the worker threads.
//!
//! Thread layout per pipeline: the watcher's ingest thread feeds the
//! scheduler; one drain worker wakes on debounce expiry, parses the batch on
//! the shared parse pool, and hands the results to one committer thread; the
//! committer applies the whole batch under the index's write lock in a single
//! commit, schedules a snapshot rewrite, and publishes events. Queries only
//! ever take the shared read lock.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::analyze::{hash_file, summarize_file, AnalyzerRegistry, ParseOptions};
use crate::error::{EngineError, Result};
use crate::events::{Broadcaster, IndexEvent, Subscription};
use crate::index::{BatchItem, SearchHit, SymbolIndex};
use crate::scan::Scanner;
use crate::sched::{Batch, ChangeKind, ChangeScheduler};
use crate::settings::{self, AppliedSettings, SettingsPatch};
use crate::snapshot::{load_snapshot, root_tag, SnapshotDoc, SnapshotStore, SNAPSHOT_VERSION};
use crate::types::{path_is_excluded, AppSettings, FileSummary, ProjectTreeNode};
use crate::watch::WatcherService;

/// Parse pool size: CPU cores minus one, minimum one.
fn parse_pool_size() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2).saturating_sub(1).max(1)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub watcher_active: bool,
    pub include_docstrings: bool,
    pub files_indexed: usize,
    pub symbols_indexed: usize,
    pub last_full_scan: Option<DateTime<Utc>>,
    pub last_event_batch: Option<DateTime<Utc>>,
    pub pending_events: usize,
}

// ---------------------------------------------------------------------------
// Pipeline — everything bound to one root
// ---------------------------------------------------------------------------

struct Pipeline {
    settings: RwLock<AppSettings>,
    index: Arc<SymbolIndex>,
    snapshots: SnapshotStore,
    scheduler: Arc<ChangeScheduler>,
    watcher: Mutex<WatcherService>,
    registry: Arc<AnalyzerRegistry>,
    /// Raised on teardown; full scans and batch workers check it between
    /// files and between batches.
    cancel: AtomicBool,
    scanning: AtomicBool,
    rescan_again: AtomicBool,
    shut_down: AtomicBool,
    last_full_scan: Mutex<Option<DateTime<Utc>>>,
    last_event_batch: Mutex<Option<DateTime<Utc>>>,
}

impl Pipeline {
    /// Build a pipeline for one root: seed the index from the snapshot when
    /// one is usable, start the watcher, and spawn the drain and commit
    /// workers. Does not schedule the first scan — the caller does, so a
    /// failed reconfiguration never releases the old pipeline.
    fn start(
        settings: AppSettings,
        registry: Arc<AnalyzerRegistry>,
        pool: Arc<rayon::ThreadPool>,
        events: Broadcaster,
    ) -> Arc<Pipeline> {
        let root = settings.root_path.clone();
        let excludes = settings.effective_excludes();

        let index = Arc::new(SymbolIndex::new());
        if let Some(doc) = load_snapshot(&root) {
            if doc.include_docstrings == settings.include_docstrings {
                info!(files = doc.files.len(), "serving warm from snapshot");
                index.replace_all(doc.files);
            } else {
                warn!("snapshot was built with a different docstring setting; starting cold");
            }
        }

        let scheduler = Arc::new(ChangeScheduler::with_defaults());
        let watcher = WatcherService::start(root.clone(), excludes, Arc::clone(&scheduler));
        let snapshots = SnapshotStore::new(root);

        let pipeline = Arc::new(Pipeline {
            settings: RwLock::new(settings),
            index,
            snapshots,
            scheduler,
            watcher: Mutex::new(watcher),
            registry,
            cancel: AtomicBool::new(false),
            scanning: AtomicBool::new(false),
            rescan_again: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            last_full_scan: Mutex::new(None),
            last_event_batch: Mutex::new(None),
        });

        let (commit_tx, commit_rx) = mpsc::channel::<Vec<BatchItem>>();
        {
            let pipeline = Arc::clone(&pipeline);
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || drain_loop(pipeline, pool, commit_tx));
        }
        {
            let pipeline = Arc::clone(&pipeline);
            let events = events.clone();
            std::thread::spawn(move || commit_loop(pipeline, events, commit_rx));
        }

        pipeline
    }

    fn parse_options(&self) -> ParseOptions {
        ParseOptions { include_docstrings: self.settings.read().unwrap().include_docstrings }
    }

    /// Rebuild the snapshot document from the current index and queue it for
    /// the background writer.
    fn schedule_snapshot(&self) {
        let settings = self.settings.read().unwrap();
        let doc = SnapshotDoc {
            version: SNAPSHOT_VERSION,
            root: root_tag(&settings.root_path),
            include_docstrings: settings.include_docstrings,
            files: self.index.all_summaries(),
        };
        drop(settings);
        self.snapshots.schedule_write(doc);
    }

    /// Turn a drained batch into index mutations: deletions pass through,
    /// creations and modifications re-parse unless the content hash proves
    /// the event a no-op.
    fn prepare_batch(&self, batch: Batch, pool: &rayon::ThreadPool) -> Vec<BatchItem> {
        let opts = self.parse_options();
        let root = self.settings.read().unwrap().root_path.clone();
        let entries: Vec<(String, ChangeKind)> = batch.into_iter().collect();

        pool.install(|| {
            entries
                .par_iter()
                .filter_map(|(path, kind)| {
                    if self.cancel.load(Ordering::Relaxed) {
                        return None;
                    }
                    match kind {
                        ChangeKind::Deleted => Some(BatchItem::Delete(path.clone())),
                        ChangeKind::Created | ChangeKind::Modified => {
                            let abs = root.join(path);
                            if !abs.exists() {
                                // The file vanished inside the debounce window.
                                return Some(BatchItem::Delete(path.clone()));
                            }
                            if abs.is_dir() {
                                return None;
                            }
                            if let (Ok(hash), Some(prev)) =
                                (hash_file(&abs), self.index.content_hash(path))
                            {
                                if hash == prev {
                                    return None;
                                }
                            }
                            Some(BatchItem::Upsert(summarize_file(
                                &self.registry,
                                &root,
                                path,
                                &opts,
                            )))
                        }
                    }
                })
                .collect()
        })
    }

    /// Tear the pipeline down: cancel in-flight scans, stop the watcher, and
    /// let the worker threads run out. Idempotent.
    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.store(true, Ordering::SeqCst);
        self.scheduler.close();
        self.watcher.lock().unwrap().stop();
        self.snapshots.shutdown();
    }
}

fn drain_loop(pipeline: Arc<Pipeline>, pool: Arc<rayon::ThreadPool>, commit_tx: mpsc::Sender<Vec<BatchItem>>) {
    while let Some(batch) = pipeline.scheduler.wait_batch() {
        if pipeline.cancel.load(Ordering::Relaxed) {
            break;
        }
        debug!(paths = batch.len(), "draining change batch");
        let items = pipeline.prepare_batch(batch, &pool);
        if items.is_empty() {
            continue;
        }
        if commit_tx.send(items).is_err() {
            break;
        }
    }
}

fn commit_loop(pipeline: Arc<Pipeline>, events: Broadcaster, commit_rx: mpsc::Receiver<Vec<BatchItem>>) {
    while let Ok(items) = commit_rx.recv() {
        if pipeline.cancel.load(Ordering::Relaxed) {
            break;
        }
        let applied = pipeline.index.apply_batch(items);
        if applied.is_empty() {
            continue;
        }
        *pipeline.last_event_batch.lock().unwrap() = Some(Utc::now());
        pipeline.schedule_snapshot();
        debug!(
            updated = applied.updated.len(),
            deleted = applied.deleted.len(),
            "batch committed"
        );
        if !applied.updated.is_empty() {
            events.publish(IndexEvent::Update { paths: applied.updated });
        }
        if !applied.deleted.is_empty() {
            events.publish(IndexEvent::Deleted { paths: applied.deleted });
        }
    }
}

// ---------------------------------------------------------------------------
// Engine — the public library surface
// ---------------------------------------------------------------------------

/// The incremental indexing engine. Construct with [`Engine::start`]; all
/// queries are safe from any thread.
pub struct Engine {
    registry: Arc<AnalyzerRegistry>,
    pool: Arc<rayon::ThreadPool>,
    events: Broadcaster,
    pipeline: RwLock<Arc<Pipeline>>,
    /// Serializes `apply_settings` calls; queries never take this.
    reconfigure: Mutex<()>,
    /// Full scans that ended at a cancellation checkpoint instead of
    /// committing. Survives pipeline swaps so reconfiguration is observable.
    canceled_scans: Arc<AtomicUsize>,
}

impl Engine {
    /// Boot for a validated root: seed from the snapshot if possible (queries
    /// respond immediately), then kick off a background full scan.
    pub fn start(settings: AppSettings) -> Result<Engine> {
        settings::validate_root(&settings.root_path)?;

        let registry = Arc::new(AnalyzerRegistry::with_defaults());
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(parse_pool_size())
                .thread_name(|i| format!("codemap-parse-{i}"))
                .build()
                .map_err(|e| EngineError::Io(std::io::Error::other(e)))?,
        );
        let events = Broadcaster::with_defaults();

        if let Err(e) = settings::save_settings(&settings) {
            warn!(error = %e, "could not persist settings");
        }

        let pipeline = Pipeline::start(settings, Arc::clone(&registry), Arc::clone(&pool), events.clone());

        let engine = Engine {
            registry,
            pool,
            events,
            pipeline: RwLock::new(pipeline),
            reconfigure: Mutex::new(()),
            canceled_scans: Arc::new(AtomicUsize::new(0)),
        };
        engine.rescan();
        Ok(engine)
    }

    fn current(&self) -> Arc<Pipeline> {
        Arc::clone(&self.pipeline.read().unwrap())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn tree(&self) -> ProjectTreeNode {
        self.current().index.tree()
    }

    pub fn file(&self, path: &str) -> Option<FileSummary> {
        self.current().index.file(path)
    }

    pub fn search(&self, term: &str, limit: Option<usize>) -> Vec<SearchHit> {
        self.current().index.search(term, limit)
    }

    pub fn settings(&self) -> AppSettings {
        self.current().settings.read().unwrap().clone()
    }

    pub fn status(&self) -> EngineStatus {
        let pipeline = self.current();
        let settings = pipeline.settings.read().unwrap();
        let status = EngineStatus {
            watcher_active: pipeline.watcher.lock().unwrap().active(),
            include_docstrings: settings.include_docstrings,
            files_indexed: pipeline.index.file_count(),
            symbols_indexed: pipeline.index.symbol_count(),
            last_full_scan: *pipeline.last_full_scan.lock().unwrap(),
            last_event_batch: *pipeline.last_event_batch.lock().unwrap(),
            pending_events: pipeline.scheduler.pending_len(),
        };
        status
    }

    /// Subscribe to update events. The handle outlives reconfiguration — the
    /// broadcaster is shared across pipelines.
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    /// Force a full scan. Idempotent: while one is running, at most one
    /// follow-up is queued. Returns once the scan is scheduled.
    pub fn rescan(&self) {
        let pipeline = self.current();
        spawn_full_scan(
            pipeline,
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            self.events.clone(),
            Arc::clone(&self.canceled_scans),
        );
    }

    /// How many full scans have been canceled by reconfiguration since boot.
    pub fn canceled_scans(&self) -> usize {
        self.canceled_scans.load(Ordering::SeqCst)
    }

    /// Inject one logical change event, exactly as the watcher would.
    /// Transports expose this for hosts without a working OS watcher.
    pub fn notify_change(&self, rel_path: &str, kind: ChangeKind) {
        let pipeline = self.current();
        let excludes = pipeline.settings.read().unwrap().effective_excludes();
        if path_is_excluded(rel_path, &excludes) {
            return;
        }
        pipeline.scheduler.enqueue(rel_path.to_string(), kind);
    }

    /// Apply a partial settings update with atomic semantics: validation
    /// first, teardown only for what actually changed, rollback (keep the old
    /// pipeline) on failure.
    pub fn apply_settings(&self, patch: SettingsPatch) -> Result<AppliedSettings> {
        let _guard = self.reconfigure.lock().unwrap();

        let pipeline = self.current();
        let current = pipeline.settings.read().unwrap().clone();
        let (next, changed) = settings::merge_patch(&current, &patch);
        if changed.is_empty() {
            return Ok(AppliedSettings { changed, settings: next });
        }
        settings::validate_root(&next.root_path)?;

        if changed.iter().any(|f| f == "root_path") {
            // Heaviest path: build everything for the new root before the old
            // pipeline is released, then swap in one step.
            let new_pipeline = Pipeline::start(
                next.clone(),
                Arc::clone(&self.registry),
                Arc::clone(&self.pool),
                self.events.clone(),
            );
            spawn_full_scan(
                Arc::clone(&new_pipeline),
                Arc::clone(&self.registry),
                Arc::clone(&self.pool),
                self.events.clone(),
                Arc::clone(&self.canceled_scans),
            );
            let old = std::mem::replace(&mut *self.pipeline.write().unwrap(), new_pipeline);
            old.shutdown();
            info!(root = %next.root_path.display(), "root switched");
            // Any UI-side selection is stale now.
            self.events.publish(IndexEvent::Refresh);
        } else if changed.iter().any(|f| f == "exclude_dirs") {
            // Stop watching, swap the exclusion set, rescan, and only then
            // resume watching with the new set.
            let mut watcher = pipeline.watcher.lock().unwrap();
            watcher.stop();
            *pipeline.settings.write().unwrap() = next.clone();
            self.rescan();
            *watcher = WatcherService::start(
                next.root_path.clone(),
                next.effective_excludes(),
                Arc::clone(&pipeline.scheduler),
            );
        } else {
            // include_docstrings only: no teardown, just a rescan.
            *pipeline.settings.write().unwrap() = next.clone();
            self.rescan();
        }

        if let Err(e) = settings::save_settings(&next) {
            warn!(error = %e, "could not persist settings");
        }

        Ok(AppliedSettings { changed, settings: next })
    }

    /// Stop everything. Called automatically on drop.
    pub fn shutdown(&self) {
        self.current().shutdown();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run a full scan on a background thread, with at-most-one-queued rescan
/// coalescing.
fn spawn_full_scan(
    pipeline: Arc<Pipeline>,
    registry: Arc<AnalyzerRegistry>,
    pool: Arc<rayon::ThreadPool>,
    events: Broadcaster,
    canceled: Arc<AtomicUsize>,
) {
    if pipeline.scanning.swap(true, Ordering::SeqCst) {
        pipeline.rescan_again.store(true, Ordering::SeqCst);
        return;
    }

    std::thread::spawn(move || {
        loop {
            let settings = pipeline.settings.read().unwrap().clone();
            let scanner = Scanner::new(
                settings.root_path.clone(),
                settings.effective_excludes(),
                Arc::clone(&registry),
            );
            let opts = ParseOptions { include_docstrings: settings.include_docstrings };

            match scanner.scan_all(&opts, &pool, &pipeline.cancel) {
                Ok(summaries) => {
                    let count = summaries.len();
                    pipeline.index.replace_all(summaries);
                    *pipeline.last_full_scan.lock().unwrap() = Some(Utc::now());
                    pipeline.schedule_snapshot();
                    events.publish(IndexEvent::Refresh);
                    info!(files = count, "full scan committed");
                }
                Err(EngineError::Canceled) => {
                    canceled.fetch_add(1, Ordering::SeqCst);
                    debug!("full scan canceled");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "full scan failed");
                    break;
                }
            }

            if pipeline.rescan_again.swap(false, Ordering::SeqCst) {
                continue;
            }
            pipeline.scanning.store(false, Ordering::SeqCst);
            // Close the race with a rescan requested right as we stopped.
            if pipeline.rescan_again.swap(false, Ordering::SeqCst)
                && !pipeline.scanning.swap(true, Ordering::SeqCst)
            {
                continue;
            }
            return;
        }
        pipeline.scanning.store(false, Ordering::SeqCst);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pool_size_is_at_least_one() {
        assert!(parse_pool_size() >= 1);
    }

    #[test]
    fn test_invalid_root_is_rejected_atomically() {
        let err = match Engine::start(AppSettings::new("/definitely/not/here".into())) {
            Ok(_) => panic!("expected Engine::start to fail for a nonexistent root"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), "invalid_settings");
    }
}
