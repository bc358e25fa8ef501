//! Tempdir project scaffolding and polling utilities for engine tests.

use codemap::types::AppSettings;
use codemap::{ChangeKind, Engine, IndexEvent};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// A throwaway workspace on disk.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        TestProject { dir: tempfile::tempdir().expect("failed to create temp workspace") }
    }

    /// Write a file, creating parent directories as needed.
    pub fn write(&self, rel: &str, content: &str) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dirs");
        }
        std::fs::write(path, content).expect("failed to write fixture file");
    }

    pub fn remove(&self, rel: &str) {
        std::fs::remove_file(self.dir.path().join(rel)).expect("failed to remove fixture file");
    }

    pub fn rename(&self, from: &str, to: &str) {
        std::fs::rename(self.dir.path().join(from), self.dir.path().join(to))
            .expect("failed to rename fixture file");
    }

    pub fn settings(&self) -> AppSettings {
        AppSettings::new(self.dir.path().canonicalize().expect("canonicalize root"))
    }

    pub fn start_engine(&self) -> Engine {
        Engine::start(self.settings()).expect("engine failed to start")
    }
}

/// Poll until the condition holds, or fail the wait after `timeout`.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}

/// Block until the engine's first full scan has committed.
pub fn wait_for_scan(engine: &Engine) {
    assert!(
        wait_until(Duration::from_secs(10), || engine.status().last_full_scan.is_some()),
        "initial scan did not complete in time"
    );
}

/// Inject a logical change event after a filesystem mutation. This keeps the
/// tests deterministic on hosts without a working OS watcher; where the
/// watcher is live the duplicate merges away in the scheduler, and no-op
/// batches are suppressed by the content hash.
pub fn change(engine: &Engine, rel: &str, kind: ChangeKind) {
    engine.notify_change(rel, kind);
}

/// Collects broadcast events on a background thread for later assertions.
pub struct EventLog {
    events: Arc<Mutex<Vec<IndexEvent>>>,
}

impl EventLog {
    pub fn attach(engine: &Engine) -> Self {
        let mut sub = engine.subscribe();
        let events: Arc<Mutex<Vec<IndexEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        std::thread::spawn(move || {
            while let Some(event) = sub.recv_blocking() {
                sink.lock().unwrap().push(event);
            }
        });
        EventLog { events }
    }

    pub fn snapshot(&self) -> Vec<IndexEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until the accumulated event list satisfies the predicate.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&[IndexEvent]) -> bool) -> bool {
        wait_until(timeout, || pred(&self.events.lock().unwrap()))
    }

    /// True if any `update` event mentions the path.
    pub fn saw_update(events: &[IndexEvent], path: &str) -> bool {
        events.iter().any(|e| matches!(e, IndexEvent::Update { paths } if paths.iter().any(|p| p == path)))
    }

    /// True if any `deleted` event mentions the path.
    pub fn saw_deleted(events: &[IndexEvent], path: &str) -> bool {
        events.iter().any(|e| matches!(e, IndexEvent::Deleted { paths } if paths.iter().any(|p| p == path)))
    }
}
