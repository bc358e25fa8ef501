//! Warm-start persistence for the index.
//!
//! The snapshot is a versioned JSON document under `<root>/.code-map/`. A
//! snapshot is either wholly readable under the current schema or it is
//! ignored and rebuilt — a partial or corrupt file never blocks startup.
//! Writes go through a single background writer so files are never torn, and
//! bursts coalesce into one rewrite per quiet interval.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{FileSummary, METADATA_DIR, SNAPSHOT_FILE};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Quiet interval for coalescing bursty rewrites.
const WRITE_COALESCE: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// The persisted form of the index. Readers tolerate unknown future fields;
/// missing required fields reject the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDoc {
    pub version: u32,
    pub root: String,
    pub include_docstrings: bool,
    pub files: Vec<FileSummary>,
}

pub fn snapshot_path(root: &Path) -> PathBuf {
    root.join(METADATA_DIR).join(SNAPSHOT_FILE)
}

/// Canonical root tag stored in the document (forward slashes on any host).
pub fn root_tag(root: &Path) -> String {
    root.to_string_lossy().replace('\\', "/")
}

/// Read and validate the snapshot for a root. Missing, unreadable,
/// version-mismatched, or root-mismatched snapshots are logged and ignored.
pub fn load_snapshot(root: &Path) -> Option<SnapshotDoc> {
    let path = snapshot_path(root);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "snapshot unreadable; starting cold");
            return None;
        }
    };
    let doc: SnapshotDoc = match serde_json::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "snapshot corrupt; starting cold");
            return None;
        }
    };
    if doc.version != SNAPSHOT_VERSION {
        warn!(found = doc.version, expected = SNAPSHOT_VERSION, "snapshot schema mismatch; starting cold");
        return None;
    }
    if doc.root != root_tag(root) {
        warn!(found = doc.root.as_str(), "snapshot belongs to a different root; starting cold");
        return None;
    }
    debug!(files = doc.files.len(), "snapshot loaded");
    Some(doc)
}

/// Serialize and atomically replace the snapshot: write a temp file, fsync,
/// rename over the target.
pub fn write_snapshot(root: &Path, doc: &SnapshotDoc) -> std::io::Result<()> {
    let path = snapshot_path(root);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let body = serde_json::to_vec(doc)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        std::io::Write::write_all(&mut file, &body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Owns the background writer for one root. Producers hand over full
/// documents and never block; the writer always persists the latest one.
pub struct SnapshotStore {
    root: PathBuf,
    tx: Mutex<Option<mpsc::Sender<SnapshotDoc>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotStore {
    pub fn new(root: PathBuf) -> Self {
        let (tx, rx) = mpsc::channel::<SnapshotDoc>();
        let writer_root = root.clone();
        let writer = std::thread::spawn(move || writer_loop(rx, writer_root));
        SnapshotStore {
            root,
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Queue a rewrite. Failures are the writer's to log; callers never see
    /// them — the index stays authoritative in memory.
    pub fn schedule_write(&self, doc: SnapshotDoc) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(doc);
        }
    }

    /// Flush pending writes and stop the writer. Idempotent.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap().take();
        if let Some(handle) = self.writer.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SnapshotStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn writer_loop(rx: mpsc::Receiver<SnapshotDoc>, root: PathBuf) {
    while let Ok(mut doc) = rx.recv() {
        // Coalesce: under a burst, keep replacing with the freshest document
        // until a quiet interval passes.
        let mut disconnected = false;
        loop {
            match rx.recv_timeout(WRITE_COALESCE) {
                Ok(newer) => doc = newer,
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        match write_snapshot(&root, &doc) {
            Ok(()) => debug!(files = doc.files.len(), "snapshot written"),
            Err(e) => warn!(error = %e, "snapshot write failed; index remains in-memory"),
        }
        if disconnected {
            break;
        }
    }
}
