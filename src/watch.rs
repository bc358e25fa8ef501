//! Filesystem watcher: OS events in, logical root-relative change events out.
//!
//! Platform quirks are normalized here — rename pairs are decomposed into
//! delete + create, and ambiguous renames fall back to an existence check so
//! editor atomic saves surface as `modified`, never as a delete. When the OS
//! facility is unavailable the service reports `active = false` and the
//! system keeps working through explicit rescans.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use tracing::{debug, warn};

use crate::sched::{ChangeKind, ChangeScheduler};
use crate::types::{path_is_excluded, rel_path_of};

/// Keeps the OS watcher and its ingest thread alive; dropping (or `stop`)
/// shuts both down.
pub struct WatcherService {
    watcher: Option<RecommendedWatcher>,
    ingest: Option<JoinHandle<()>>,
    active: Arc<AtomicBool>,
}

impl WatcherService {
    /// Start watching `root` recursively, feeding the scheduler. On platform
    /// failure returns an inert service with `active() == false`.
    pub fn start(
        root: PathBuf,
        excludes: BTreeSet<String>,
        scheduler: Arc<ChangeScheduler>,
    ) -> WatcherService {
        let active = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<Event>();

        let mut watcher = match RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "file watcher unavailable; falling back to explicit rescans");
                return WatcherService { watcher: None, ingest: None, active };
            }
        };

        if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
            warn!(root = %root.display(), error = %e, "failed to watch root; falling back to explicit rescans");
            return WatcherService { watcher: None, ingest: None, active };
        }

        active.store(true, Ordering::SeqCst);
        debug!(root = %root.display(), "watching for changes");

        let ingest = std::thread::spawn(move || ingest_loop(rx, root, excludes, scheduler));

        WatcherService { watcher: Some(watcher), ingest: Some(ingest), active }
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop watching. Required before the root changes; safe to call twice.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        // Dropping the watcher drops its event callback, which disconnects
        // the channel and ends the ingest thread.
        self.watcher.take();
        if let Some(handle) = self.ingest.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WatcherService {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ingest_loop(
    rx: mpsc::Receiver<Event>,
    root: PathBuf,
    excludes: BTreeSet<String>,
    scheduler: Arc<ChangeScheduler>,
) {
    while let Ok(event) = rx.recv() {
        for (rel_path, kind) in logical_events(&event, &root, &excludes) {
            scheduler.enqueue(rel_path, kind);
        }
    }
}

/// Translate one OS event into logical per-path changes, applying exclusion
/// filtering and rename decomposition.
fn logical_events(event: &Event, root: &Path, excludes: &BTreeSet<String>) -> Vec<(String, ChangeKind)> {
    let mut out = Vec::new();

    let mut push = |abs: &PathBuf, kind: ChangeKind| {
        let Some(rel) = rel_path_of(root, abs) else { return };
        if path_is_excluded(&rel, excludes) {
            return;
        }
        // Directory events carry no symbols of their own; deletions are the
        // exception because the subtree must leave the index.
        if kind != ChangeKind::Deleted && abs.is_dir() {
            return;
        }
        out.push((rel, kind));
    };

    match &event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                push(path, ChangeKind::Created);
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                push(path, ChangeKind::Deleted);
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => {
                for path in &event.paths {
                    push(path, ChangeKind::Deleted);
                }
            }
            RenameMode::To => {
                for path in &event.paths {
                    push(path, ChangeKind::Created);
                }
            }
            RenameMode::Both => {
                if let [src, dst] = event.paths.as_slice() {
                    push(src, ChangeKind::Deleted);
                    push(dst, ChangeKind::Created);
                }
            }
            // Ambiguous rename reports: decide by what is on disk now, so an
            // atomic save (rename onto the target) surfaces as modified.
            _ => {
                for path in &event.paths {
                    if path.exists() {
                        push(path, ChangeKind::Modified);
                    } else {
                        push(path, ChangeKind::Deleted);
                    }
                }
            }
        },
        EventKind::Modify(_) => {
            for path in &event.paths {
                push(path, ChangeKind::Modified);
            }
        }
        EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
    }

    out
}
