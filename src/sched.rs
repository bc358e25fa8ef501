//! Debounced, deduplicated batching of filesystem change events.
//!
//! Raw events land in a pending `path -> effective kind` map; successive
//! events on the same path merge so a batch never contains an observable
//! delete-then-create sequence. The drain worker wakes after a quiet period
//! (capped by a maximum delay under sustained load) and takes the whole map
//! as one batch.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Quiet period after the most recent event before a drain.
pub const DEBOUNCE: Duration = Duration::from_millis(250);

/// Upper bound on how long a batch may keep growing before it is drained
/// regardless of quiescence.
pub const MAX_DELAY: Duration = Duration::from_secs(2);

/// Pending-map size that forces an immediate drain.
const PENDING_CAPACITY: usize = 4096;

/// Logical change kind after `moved` decomposition (`moved` arrives as
/// `deleted(src)` + `created(dst)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// Merge a new event into the pending kind for the same path. `None` means
/// the entry is dropped (create followed by delete inside one window).
fn merge(prev: Option<ChangeKind>, next: ChangeKind) -> Option<ChangeKind> {
    use ChangeKind::*;
    match (prev, next) {
        (None, k) => Some(k),
        (Some(Created), Created | Modified) => Some(Created),
        (Some(Created), Deleted) => None,
        (Some(Modified), Created | Modified) => Some(Modified),
        (Some(Modified), Deleted) => Some(Deleted),
        (Some(Deleted), Created | Modified) => Some(Modified),
        (Some(Deleted), Deleted) => Some(Deleted),
    }
}

/// A drained batch: `path -> effective kind`, alphabetical.
pub type Batch = BTreeMap<String, ChangeKind>;

struct Pending {
    map: BTreeMap<String, Option<ChangeKind>>,
    first_event: Option<Instant>,
    last_event: Option<Instant>,
    closed: bool,
}

pub struct ChangeScheduler {
    pending: Mutex<Pending>,
    wakeup: Condvar,
    debounce: Duration,
    max_delay: Duration,
}

impl ChangeScheduler {
    pub fn new(debounce: Duration, max_delay: Duration) -> Self {
        ChangeScheduler {
            pending: Mutex::new(Pending {
                map: BTreeMap::new(),
                first_event: None,
                last_event: None,
                closed: false,
            }),
            wakeup: Condvar::new(),
            debounce,
            max_delay,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEBOUNCE, MAX_DELAY)
    }

    /// Record one event. Paths inside excluded directories must be filtered by
    /// the caller before they get here.
    pub fn enqueue(&self, path: String, kind: ChangeKind) {
        let mut pending = self.pending.lock().unwrap();
        if pending.closed {
            return;
        }
        let now = Instant::now();
        let prev = pending.map.get(&path).copied().flatten();
        let merged = merge(prev, kind);
        match merged {
            Some(k) => {
                pending.map.insert(path, Some(k));
            }
            None => {
                // created+deleted cancels out, but keep the tombstone so a
                // later event on the path starts from a clean slate.
                pending.map.insert(path, None);
            }
        }
        pending.first_event.get_or_insert(now);
        pending.last_event = Some(now);
        drop(pending);
        self.wakeup.notify_all();
    }

    /// Number of distinct paths currently pending.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().map.values().filter(|k| k.is_some()).count()
    }

    /// Take the current batch immediately and reset the buffer.
    pub fn drain(&self) -> Batch {
        let mut pending = self.pending.lock().unwrap();
        Self::take_batch(&mut pending)
    }

    fn take_batch(pending: &mut Pending) -> Batch {
        let map = std::mem::take(&mut pending.map);
        pending.first_event = None;
        pending.last_event = None;
        map.into_iter().filter_map(|(path, kind)| kind.map(|k| (path, k))).collect()
    }

    /// Block until a batch is ready (debounce expired or max delay hit) and
    /// return it. Returns `None` once the scheduler is closed and empty.
    pub fn wait_batch(&self) -> Option<Batch> {
        let mut pending = self.pending.lock().unwrap();
        loop {
            if pending.map.is_empty() {
                if pending.closed {
                    return None;
                }
                pending = self.wakeup.wait(pending).unwrap();
                continue;
            }
            if pending.closed {
                // Flush whatever is left so no event is lost on shutdown.
                return Some(Self::take_batch(&mut pending));
            }

            let now = Instant::now();
            let quiet_deadline =
                pending.last_event.map(|t| t + self.debounce).unwrap_or(now);
            let hard_deadline =
                pending.first_event.map(|t| t + self.max_delay).unwrap_or(now);
            let deadline = quiet_deadline.min(hard_deadline);

            if now >= deadline || pending.map.len() >= PENDING_CAPACITY {
                let batch = Self::take_batch(&mut pending);
                if batch.is_empty() {
                    // Everything cancelled out; wait for the next event.
                    continue;
                }
                return Some(batch);
            }
            let (guard, _timeout) = self.wakeup.wait_timeout(pending, deadline - now).unwrap();
            pending = guard;
        }
    }

    /// Stop accepting events and wake the drain worker so it can exit.
    pub fn close(&self) {
        self.pending.lock().unwrap().closed = true;
        self.wakeup.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChangeKind::*;

    #[test]
    fn test_merge_table() {
        // First event on a path passes through.
        assert_eq!(merge(None, Created), Some(Created));
        assert_eq!(merge(None, Modified), Some(Modified));
        assert_eq!(merge(None, Deleted), Some(Deleted));

        assert_eq!(merge(Some(Created), Created), Some(Created));
        assert_eq!(merge(Some(Created), Modified), Some(Created));
        assert_eq!(merge(Some(Created), Deleted), None);

        assert_eq!(merge(Some(Modified), Created), Some(Modified));
        assert_eq!(merge(Some(Modified), Modified), Some(Modified));
        assert_eq!(merge(Some(Modified), Deleted), Some(Deleted));

        assert_eq!(merge(Some(Deleted), Created), Some(Modified));
        assert_eq!(merge(Some(Deleted), Modified), Some(Modified));
        assert_eq!(merge(Some(Deleted), Deleted), Some(Deleted));
    }

    #[test]
    fn test_created_then_deleted_drops_path() {
        let sched = ChangeScheduler::new(Duration::from_millis(5), Duration::from_millis(50));
        sched.enqueue("a.py".to_string(), Created);
        sched.enqueue("a.py".to_string(), Deleted);
        sched.enqueue("b.py".to_string(), Modified);
        let batch = sched.wait_batch().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.get("b.py"), Some(&Modified));
    }

    #[test]
    fn test_rename_within_window_merges() {
        let sched = ChangeScheduler::new(Duration::from_millis(5), Duration::from_millis(50));
        // moved x -> y decomposes into deleted(x) + created(y)
        sched.enqueue("src/x.py".to_string(), Created);
        sched.enqueue("src/x.py".to_string(), Deleted);
        sched.enqueue("src/y.py".to_string(), Created);
        let batch = sched.wait_batch().unwrap();
        assert!(!batch.contains_key("src/x.py"));
        assert_eq!(batch.get("src/y.py"), Some(&Created));
    }

    #[test]
    fn test_delete_then_create_becomes_modified() {
        let sched = ChangeScheduler::new(Duration::from_millis(5), Duration::from_millis(50));
        sched.enqueue("a.py".to_string(), Deleted);
        sched.enqueue("a.py".to_string(), Created);
        let batch = sched.wait_batch().unwrap();
        assert_eq!(batch.get("a.py"), Some(&Modified));
    }

    #[test]
    fn test_drain_resets_buffer() {
        let sched = ChangeScheduler::with_defaults();
        sched.enqueue("a.py".to_string(), Created);
        assert_eq!(sched.pending_len(), 1);
        let batch = sched.drain();
        assert_eq!(batch.len(), 1);
        assert_eq!(sched.pending_len(), 0);
        assert!(sched.drain().is_empty());
    }

    #[test]
    fn test_max_delay_guarantees_progress() {
        let sched = std::sync::Arc::new(ChangeScheduler::new(
            Duration::from_millis(40),
            Duration::from_millis(100),
        ));

        // Keep the scheduler busy so the quiet period never elapses.
        let feeder = {
            let sched = std::sync::Arc::clone(&sched);
            std::thread::spawn(move || {
                for i in 0..30 {
                    sched.enqueue(format!("f{i}.py"), Modified);
                    std::thread::sleep(Duration::from_millis(10));
                }
            })
        };

        let start = Instant::now();
        let batch = sched.wait_batch().unwrap();
        let elapsed = start.elapsed();
        assert!(!batch.is_empty());
        assert!(elapsed < Duration::from_millis(250), "drain took {elapsed:?}");
        feeder.join().unwrap();
    }

    #[test]
    fn test_close_flushes_then_ends() {
        let sched = ChangeScheduler::with_defaults();
        sched.enqueue("a.py".to_string(), Created);
        sched.close();
        let batch = sched.wait_batch().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(sched.wait_batch().is_none());
        // Events after close are ignored.
        sched.enqueue("b.py".to_string(), Created);
        assert!(sched.wait_batch().is_none());
    }
}
