//! Service-to-device command path
//!
//! The bridge is the device end of the cloud link, so a command addressed to
//! the device is delivered the way a cloud-to-device message is: republished
//! under the inbound namespace, broadcast to viewers and queued for the sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::pump::{BridgePump, ForwardError};
use crate::envelope::Envelope;
use crate::remote::{ChannelError, InboundMessage, LocalPublisher};

/// Local publisher of the current bridge session, if any
pub type LocalSlot = Arc<RwLock<Option<Arc<dyn LocalPublisher>>>>;

/// Cheap handle for delivering commands to the device
#[derive(Clone)]
pub struct BridgeHandle {
    local: LocalSlot,
    ready: Arc<AtomicBool>,
    pump: Arc<BridgePump>,
}

impl BridgeHandle {
    pub fn new(local: LocalSlot, ready: Arc<AtomicBool>, pump: Arc<BridgePump>) -> Self {
        Self { local, ready, pump }
    }

    pub fn is_connected(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Deliver `payload` to the device on `topic`
    ///
    /// The command takes the cloud-to-device path: it lands on the local bus
    /// as `{inbound_prefix}{topic}` and is fanned out. Without a local session
    /// (event-stream mode) it is only fanned out. The topic is used as given;
    /// the outbound namespace is not stripped.
    pub async fn send_to_device(&self, topic: &str, payload: &str) -> Result<Envelope, ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::ConnectionLost(
                "bridge session not connected".to_string(),
            ));
        }

        let wire = serde_json::json!({ "topic": topic, "data": payload }).to_string();
        let local = self.local.read().clone();

        let envelope = match local {
            Some(local) => {
                let command = InboundMessage::new(topic, wire);
                self.pump
                    .forward_inbound(&command, local.as_ref())
                    .await
                    .map_err(|e| match e {
                        ForwardError::Channel(e) => e,
                        other => ChannelError::Rejected(other.to_string()),
                    })?
            }
            None => self.pump.fanout().handle(&wire).await,
        };

        debug!("Device command delivered on '{}'", envelope.topic);
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::FanoutHandler;
    use crate::config::BridgeConfig;
    use crate::envelope::EnvelopeCodec;
    use crate::protocol::QoS;
    use crate::push::SubscriberRegistry;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        published: Mutex<Vec<(String, Bytes)>>,
    }

    #[async_trait]
    impl LocalPublisher for Recorder {
        async fn publish(&self, topic: &str, payload: Bytes, _qos: QoS) -> Result<(), ChannelError> {
            self.published.lock().push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn bridge_pump() -> Arc<BridgePump> {
        let config = BridgeConfig::default();
        let registry = Arc::new(SubscriberRegistry::new(Duration::from_secs(1)));
        let fanout = Arc::new(FanoutHandler::new(
            EnvelopeCodec::from_config(&config),
            registry,
            None,
            None,
        ));
        Arc::new(BridgePump::new(&config, fanout, None))
    }

    #[tokio::test]
    async fn test_send_without_session() {
        let handle = BridgeHandle::new(
            Arc::new(RwLock::new(None)),
            Arc::new(AtomicBool::new(false)),
            bridge_pump(),
        );
        assert!(!handle.is_connected());
        let err = handle.send_to_device("lamp/on", "true").await.unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_send_lands_under_inbound_namespace() {
        let recorder = Arc::new(Recorder::default());
        let slot: LocalSlot = Arc::new(RwLock::new(Some(recorder.clone() as Arc<dyn LocalPublisher>)));
        let handle = BridgeHandle::new(slot, Arc::new(AtomicBool::new(true)), bridge_pump());

        let envelope = handle.send_to_device("out/lamp/on", "true").await.unwrap();

        assert_eq!(envelope.topic, "out/lamp/on");
        assert_eq!(envelope.data, "true");
        let published = recorder.published.lock().clone();
        assert_eq!(
            published,
            vec![("from-cloud/out/lamp/on".to_string(), Bytes::from_static(b"true"))]
        );
    }

    #[tokio::test]
    async fn test_send_in_event_mode_only_fans_out() {
        let handle = BridgeHandle::new(
            Arc::new(RwLock::new(None)),
            Arc::new(AtomicBool::new(true)),
            bridge_pump(),
        );

        let envelope = handle.send_to_device("lamp/on", "false").await.unwrap();
        assert_eq!(envelope.topic, "lamp/on");
        assert_eq!(envelope.data, "false");
    }
}
