//! Prometheus metrics for the bridge
//!
//! Exposes counters for both pump directions, the broadcaster and the
//! durable sink at the /metrics endpoint.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

mod server;

pub use server::MetricsServer;

/// All bridge metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Pump metrics
    pub forwarded_to_cloud_total: IntCounter,
    pub published_local_total: IntCounter,
    pub messages_dropped_total: IntCounterVec,
    pub loop_guard_rejections_total: IntCounter,
    pub reconnects_total: IntCounter,

    // Broadcast metrics
    pub broadcasts_total: IntCounter,
    pub subscriber_evictions_total: IntCounter,
    pub subscribers_current: IntGauge,

    // Sink metrics
    pub records_persisted_total: IntCounter,
    pub persistence_failures_total: IntCounter,

    // Performance metrics
    pub fanout_latency: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let forwarded_to_cloud_total = IntCounter::with_opts(Opts::new(
            "cloudlink_forwarded_to_cloud_total",
            "Local messages sent to the cloud channel",
        ))
        .unwrap();

        let published_local_total = IntCounter::with_opts(Opts::new(
            "cloudlink_published_local_total",
            "Cloud messages published on the local bus",
        ))
        .unwrap();

        let messages_dropped_total = IntCounterVec::new(
            Opts::new(
                "cloudlink_messages_dropped_total",
                "Messages dropped by the bridge",
            ),
            &["reason"],
        )
        .unwrap();

        let loop_guard_rejections_total = IntCounter::with_opts(Opts::new(
            "cloudlink_loop_guard_rejections_total",
            "Local messages not forwarded because of their namespace",
        ))
        .unwrap();

        let reconnects_total = IntCounter::with_opts(Opts::new(
            "cloudlink_reconnects_total",
            "Bridge restarts after a lost connection",
        ))
        .unwrap();

        let broadcasts_total = IntCounter::with_opts(Opts::new(
            "cloudlink_broadcasts_total",
            "Messages broadcast to push subscribers",
        ))
        .unwrap();

        let subscriber_evictions_total = IntCounter::with_opts(Opts::new(
            "cloudlink_subscriber_evictions_total",
            "Push subscribers removed after a failed send",
        ))
        .unwrap();

        let subscribers_current = IntGauge::with_opts(Opts::new(
            "cloudlink_subscribers_current",
            "Currently registered push subscribers",
        ))
        .unwrap();

        let records_persisted_total = IntCounter::with_opts(Opts::new(
            "cloudlink_records_persisted_total",
            "Records written to the durable sink",
        ))
        .unwrap();

        let persistence_failures_total = IntCounter::with_opts(Opts::new(
            "cloudlink_persistence_failures_total",
            "Records lost to sink errors or a full sink queue",
        ))
        .unwrap();

        let fanout_latency = Histogram::with_opts(
            HistogramOpts::new(
                "cloudlink_fanout_latency_seconds",
                "Time to publish and broadcast one cloud message",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
        )
        .unwrap();

        registry
            .register(Box::new(forwarded_to_cloud_total.clone()))
            .unwrap();
        registry
            .register(Box::new(published_local_total.clone()))
            .unwrap();
        registry
            .register(Box::new(messages_dropped_total.clone()))
            .unwrap();
        registry
            .register(Box::new(loop_guard_rejections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(reconnects_total.clone()))
            .unwrap();
        registry
            .register(Box::new(broadcasts_total.clone()))
            .unwrap();
        registry
            .register(Box::new(subscriber_evictions_total.clone()))
            .unwrap();
        registry
            .register(Box::new(subscribers_current.clone()))
            .unwrap();
        registry
            .register(Box::new(records_persisted_total.clone()))
            .unwrap();
        registry
            .register(Box::new(persistence_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(fanout_latency.clone()))
            .unwrap();

        Metrics {
            registry,
            forwarded_to_cloud_total,
            published_local_total,
            messages_dropped_total,
            loop_guard_rejections_total,
            reconnects_total,
            broadcasts_total,
            subscriber_evictions_total,
            subscribers_current,
            records_persisted_total,
            persistence_failures_total,
            fanout_latency,
        }
    }

    // Helper methods for common operations

    pub fn forwarded_to_cloud(&self) {
        self.forwarded_to_cloud_total.inc();
    }

    pub fn published_local(&self) {
        self.published_local_total.inc();
    }

    pub fn message_dropped(&self, reason: &str) {
        self.messages_dropped_total.with_label_values(&[reason]).inc();
    }

    pub fn loop_guard_rejected(&self) {
        self.loop_guard_rejections_total.inc();
    }

    pub fn reconnected(&self) {
        self.reconnects_total.inc();
    }

    pub fn broadcast(&self) {
        self.broadcasts_total.inc();
    }

    pub fn subscriber_added(&self) {
        self.subscribers_current.inc();
    }

    pub fn subscriber_removed(&self, evicted: bool) {
        self.subscribers_current.dec();
        if evicted {
            self.subscriber_evictions_total.inc();
        }
    }

    pub fn records_persisted(&self, count: usize) {
        self.records_persisted_total.inc_by(count as u64);
    }

    pub fn persistence_failed(&self, count: usize) {
        self.persistence_failures_total.inc_by(count as u64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    #[test]
    fn test_subscriber_gauge() {
        let metrics = Metrics::new();
        metrics.subscriber_added();
        metrics.subscriber_added();
        metrics.subscriber_removed(true);
        assert_eq!(metrics.subscribers_current.get(), 1);
        assert_eq!(metrics.subscriber_evictions_total.get(), 1);
    }

    #[test]
    fn test_dropped_by_reason() {
        let metrics = Metrics::new();
        metrics.message_dropped("invalid_utf8");
        metrics.message_dropped("invalid_utf8");
        metrics.message_dropped("forward_error");
        assert_eq!(
            metrics
                .messages_dropped_total
                .with_label_values(&["invalid_utf8"])
                .get(),
            2
        );
    }

    #[test]
    fn test_gather_contains_names() {
        let metrics = Metrics::new();
        metrics.forwarded_to_cloud();
        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&metrics.registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("cloudlink_forwarded_to_cloud_total 1"));
    }
}
