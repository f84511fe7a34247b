//! Cloud event fan-out
//!
//! One decoded cloud message goes to the live viewers and to the durable
//! sink. The sink write is queued before the broadcast starts and never
//! awaited, so a slow store cannot hold up delivery.

use std::sync::Arc;

use crate::envelope::{Envelope, EnvelopeCodec};
use crate::metrics::Metrics;
use crate::persistence::SinkWriter;
use crate::push::{BroadcastReport, PushMessage, SubscriberRegistry};

/// Decode, broadcast and persist cloud events
pub struct FanoutHandler {
    codec: EnvelopeCodec,
    registry: Arc<SubscriberRegistry>,
    sink: Option<Arc<SinkWriter>>,
    metrics: Option<Arc<Metrics>>,
}

impl FanoutHandler {
    pub fn new(
        codec: EnvelopeCodec,
        registry: Arc<SubscriberRegistry>,
        sink: Option<Arc<SinkWriter>>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            codec,
            registry,
            sink,
            metrics,
        }
    }

    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Handle one topic-less event body
    pub async fn handle(&self, event: &str) -> Envelope {
        let envelope = self.codec.decode_from_cloud(event);
        self.deliver(&envelope).await;
        envelope
    }

    /// Persist (queued) and broadcast an already decoded envelope
    pub async fn deliver(&self, envelope: &Envelope) -> BroadcastReport {
        if let Some(ref sink) = self.sink {
            sink.persist(envelope);
        }

        let start = std::time::Instant::now();
        let report = self
            .registry
            .broadcast(&PushMessage::from_envelope(envelope))
            .await;
        if let Some(ref m) = self.metrics {
            m.fanout_latency.observe(start.elapsed().as_secs_f64());
        }
        report
    }
}
