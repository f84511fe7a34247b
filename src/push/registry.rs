//! Subscriber registry and broadcaster

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::{PushError, PushMessage};
use crate::metrics::Metrics;

/// Identity of one live subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One live push connection
#[async_trait]
pub trait PushSink: Send + Sync {
    fn id(&self) -> SubscriberId;

    /// Deliver one pre-encoded JSON object
    async fn send_json(&self, json: Arc<str>) -> Result<(), PushError>;
}

/// Outcome of one broadcast call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Thread-safe set of live subscribers
pub struct SubscriberRegistry {
    subscribers: DashMap<SubscriberId, Arc<dyn PushSink>>,
    next_id: AtomicU64,
    send_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl SubscriberRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            send_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Allocate an id for a new subscriber
    pub fn next_id(&self) -> SubscriberId {
        SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Add a subscriber; registering the same id twice keeps the first handle
    pub fn register(&self, sink: Arc<dyn PushSink>) -> bool {
        let id = sink.id();
        let inserted = match self.subscribers.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(sink);
                true
            }
        };

        if inserted {
            debug!("Subscriber {} registered ({} live)", id, self.subscribers.len());
            if let Some(ref m) = self.metrics {
                m.subscriber_added();
            }
        }
        inserted
    }

    /// Remove a subscriber; unknown ids are ignored
    pub fn unregister(&self, id: SubscriberId) -> bool {
        self.remove(id, false)
    }

    fn remove(&self, id: SubscriberId, evicted: bool) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!("Subscriber {} removed ({} live)", id, self.subscribers.len());
            if let Some(ref m) = self.metrics {
                m.subscriber_removed(evicted);
            }
        }
        removed
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver to every subscriber registered when the call starts.
    ///
    /// Sends run concurrently, each bounded by the send timeout. Failed
    /// subscribers are unregistered; failures never reach the caller.
    pub async fn broadcast(&self, message: &PushMessage) -> BroadcastReport {
        let json: Arc<str> = match serde_json::to_string(message) {
            Ok(json) => json.into(),
            Err(e) => {
                error!("Failed to encode push message: {}", e);
                return BroadcastReport::default();
            }
        };

        // Snapshot without holding shard locks across awaits
        let targets: Vec<Arc<dyn PushSink>> = self
            .subscribers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        if let Some(ref m) = self.metrics {
            m.broadcast();
        }
        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let send_timeout = self.send_timeout;
        let results = join_all(targets.iter().map(|sink| {
            let json = json.clone();
            async move {
                let result = match timeout(send_timeout, sink.send_json(json)).await {
                    Ok(result) => result,
                    Err(_) => Err(PushError::Timeout),
                };
                (sink.id(), result)
            }
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Subscriber {} dropped: {}", id, e);
                    if self.remove(id, true) {
                        report.evicted += 1;
                    }
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;

    struct RecordingSink {
        id: SubscriberId,
        received: Mutex<Vec<String>>,
        fail: AtomicBool,
        delay: Option<Duration>,
    }

    impl RecordingSink {
        fn new(id: SubscriberId) -> Arc<Self> {
            Arc::new(Self {
                id,
                received: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
                delay: None,
            })
        }

        fn failing(id: SubscriberId) -> Arc<Self> {
            let sink = Self::new(id);
            sink.fail.store(true, Ordering::SeqCst);
            sink
        }

        fn stalled(id: SubscriberId) -> Arc<Self> {
            Arc::new(Self {
                id,
                received: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
                delay: Some(Duration::from_secs(3600)),
            })
        }

        fn count(&self) -> usize {
            self.received.lock().len()
        }
    }

    #[async_trait]
    impl PushSink for RecordingSink {
        fn id(&self) -> SubscriberId {
            self.id
        }

        async fn send_json(&self, json: Arc<str>) -> Result<(), PushError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(PushError::Closed);
            }
            self.received.lock().push(json.to_string());
            Ok(())
        }
    }

    fn message() -> PushMessage {
        PushMessage::new("lamp/on", "true")
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = SubscriberRegistry::new(Duration::from_secs(1));
        let sink = RecordingSink::new(registry.next_id());
        assert!(registry.register(sink.clone()));
        assert!(!registry.register(sink.clone()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_twice_is_safe() {
        let registry = SubscriberRegistry::new(Duration::from_secs(1));
        let sink = RecordingSink::new(registry.next_id());
        registry.register(sink.clone());
        assert!(registry.unregister(sink.id()));
        assert!(!registry.unregister(sink.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = SubscriberRegistry::new(Duration::from_secs(1));
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all() {
        let registry = SubscriberRegistry::new(Duration::from_secs(1));
        let sinks: Vec<_> = (0..5).map(|_| RecordingSink::new(registry.next_id())).collect();
        for sink in &sinks {
            registry.register(sink.clone());
        }

        let report = registry.broadcast(&message()).await;
        assert_eq!(report.delivered, 5);
        assert_eq!(report.evicted, 0);

        for sink in &sinks {
            assert_eq!(sink.count(), 1);
            let json: serde_json::Value =
                serde_json::from_str(&sink.received.lock()[0]).unwrap();
            assert_eq!(json["topic"], "lamp/on");
        }
    }

    #[tokio::test]
    async fn test_failing_subscriber_is_isolated_and_removed() {
        let metrics = Arc::new(Metrics::new());
        let registry =
            SubscriberRegistry::new(Duration::from_secs(1)).with_metrics(metrics.clone());
        let good: Vec<_> = (0..4).map(|_| RecordingSink::new(registry.next_id())).collect();
        let bad = RecordingSink::failing(registry.next_id());
        registry.register(good[0].clone());
        registry.register(good[1].clone());
        registry.register(bad.clone());
        registry.register(good[2].clone());
        registry.register(good[3].clone());

        let report = registry.broadcast(&message()).await;
        assert_eq!(report.delivered, 4);
        assert_eq!(report.evicted, 1);
        assert!(!registry.contains(bad.id()));
        assert_eq!(registry.len(), 4);
        for sink in &good {
            assert_eq!(sink.count(), 1);
        }
        assert_eq!(metrics.subscriber_evictions_total.get(), 1);
        assert_eq!(metrics.subscribers_current.get(), 4);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_times_out() {
        let registry = SubscriberRegistry::new(Duration::from_millis(100));
        let good = RecordingSink::new(registry.next_id());
        let stalled = RecordingSink::stalled(registry.next_id());
        registry.register(good.clone());
        registry.register(stalled.clone());

        let report = registry.broadcast(&message()).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, 1);
        assert_eq!(good.count(), 1);
        assert!(!registry.contains(stalled.id()));
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_registry() {
        let registry = SubscriberRegistry::new(Duration::from_secs(1));
        assert_eq!(registry.broadcast(&message()).await, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_subscriber_registered_after_broadcast_misses_it() {
        let registry = SubscriberRegistry::new(Duration::from_secs(1));
        let early = RecordingSink::new(registry.next_id());
        registry.register(early.clone());
        registry.broadcast(&message()).await;

        let late = RecordingSink::new(registry.next_id());
        registry.register(late.clone());
        assert_eq!(early.count(), 1);
        assert_eq!(late.count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_unregister_broadcast() {
        let registry = Arc::new(SubscriberRegistry::new(Duration::from_secs(1)));
        let stable = RecordingSink::new(registry.next_id());
        registry.register(stable.clone());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let sink = RecordingSink::new(registry.next_id());
                    registry.register(sink.clone());
                    tokio::task::yield_now().await;
                    registry.unregister(sink.id());
                    registry.unregister(sink.id());
                }
            }));
        }
        for _ in 0..4 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    registry.broadcast(&message()).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(stable.id()));
        assert_eq!(stable.count(), 200);
    }
}
