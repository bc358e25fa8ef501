//! Fan-out of index update events to subscribers.
//!
//! Built on a bounded broadcast ring: producers never block, each subscriber
//! has its own cursor, and a subscriber that falls behind loses the oldest
//! messages and is told to resynchronize with a `refresh` instead of
//! replaying a gap. Subscription teardown is race-free — resources go away
//! with the last receiver handle.

use serde::Serialize;
use tokio::sync::broadcast;

/// Per-subscriber queue capacity before the oldest messages are dropped.
pub const SUBSCRIBER_QUEUE: usize = 64;

/// A message delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IndexEvent {
    /// Files were created or re-parsed; paths are alphabetical.
    Update { paths: Vec<String> },
    /// Files left the index; paths are alphabetical.
    Deleted { paths: Vec<String> },
    /// The subscriber should reload from `tree()` — either it lagged or the
    /// whole corpus changed (full scan, root switch).
    Refresh,
}

impl IndexEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            IndexEvent::Update { .. } => "update",
            IndexEvent::Deleted { .. } => "deleted",
            IndexEvent::Refresh => "refresh",
        }
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<IndexEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Broadcaster { tx }
    }

    pub fn with_defaults() -> Self {
        Self::new(SUBSCRIBER_QUEUE)
    }

    /// Deliver to all current subscribers. Never blocks; publishing with no
    /// subscribers is a no-op.
    pub fn publish(&self, event: IndexEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription { rx: self.tx.subscribe() }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One subscriber's handle. Lag is surfaced as a `Refresh` message rather
/// than an error: the subscriber's contract on overflow is "reload, then
/// keep listening".
pub struct Subscription {
    rx: broadcast::Receiver<IndexEvent>,
}

impl Subscription {
    /// Blocking receive for thread-based consumers. `None` once the
    /// broadcaster is gone.
    pub fn recv_blocking(&mut self) -> Option<IndexEvent> {
        match self.rx.blocking_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => Some(IndexEvent::Refresh),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Async receive for transport adapters.
    pub async fn recv(&mut self) -> Option<IndexEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => Some(IndexEvent::Refresh),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Raw receiver for stream wrappers (the SSE adapter).
    pub fn into_receiver(self) -> broadcast::Receiver<IndexEvent> {
        self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_reaches_all_subscribers() {
        let bus = Broadcaster::with_defaults();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(IndexEvent::Update { paths: vec!["a.py".to_string()] });

        assert_eq!(a.recv_blocking(), Some(IndexEvent::Update { paths: vec!["a.py".to_string()] }));
        assert_eq!(b.recv_blocking(), Some(IndexEvent::Update { paths: vec!["a.py".to_string()] }));
    }

    #[test]
    fn test_lagged_subscriber_gets_refresh_others_unaffected() {
        let bus = Broadcaster::new(2);
        let mut slow = bus.subscribe();
        let mut fast = bus.subscribe();

        // Overflow the 2-slot queue while `slow` is stalled.
        for i in 0..3 {
            bus.publish(IndexEvent::Update { paths: vec![format!("f{i}.py")] });
            // `fast` keeps draining, so it never lags.
            assert_eq!(
                fast.recv_blocking(),
                Some(IndexEvent::Update { paths: vec![format!("f{i}.py")] })
            );
        }

        // The stalled subscriber lost the oldest message and must resync.
        assert_eq!(slow.recv_blocking(), Some(IndexEvent::Refresh));
        // After the refresh signal it resumes from what is still buffered.
        assert_eq!(slow.recv_blocking(), Some(IndexEvent::Update { paths: vec!["f1.py".to_string()] }));
        assert_eq!(slow.recv_blocking(), Some(IndexEvent::Update { paths: vec!["f2.py".to_string()] }));
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = Broadcaster::with_defaults();
        bus.publish(IndexEvent::Refresh);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_closed_broadcaster_ends_subscription() {
        let bus = Broadcaster::with_defaults();
        let mut sub = bus.subscribe();
        drop(bus);
        assert_eq!(sub.recv_blocking(), None);
    }

    #[test]
    fn test_event_kinds_serialize_with_tag() {
        let json = serde_json::to_string(&IndexEvent::Deleted { paths: vec!["x.py".to_string()] })
            .unwrap();
        assert_eq!(json, r#"{"kind":"deleted","paths":["x.py"]}"#);
        assert_eq!(serde_json::to_string(&IndexEvent::Refresh).unwrap(), r#"{"kind":"refresh"}"#);
    }
}
