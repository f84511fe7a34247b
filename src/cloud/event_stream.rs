//! One-way event stream consumption
//!
//! An event stream hands over topic-less bodies one at a time. The driver
//! feeds each body to the fan-out handler in arrival order and stops at the
//! end of the stream, on shutdown, or on the first stream error.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::bridge::FanoutHandler;
use crate::remote::{ChannelError, MessageSource};

/// Source of event bodies
#[async_trait]
pub trait EventStream: Send {
    /// Next body, or `None` once the stream has ended
    async fn next_event(&mut self) -> Result<Option<String>, ChannelError>;
}

/// Reads the payloads of a message source as events
pub struct SourceEvents<S> {
    source: S,
}

impl<S: MessageSource> SourceEvents<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: MessageSource> EventStream for SourceEvents<S> {
    async fn next_event(&mut self) -> Result<Option<String>, ChannelError> {
        loop {
            let message = self.source.next_message().await?;
            match String::from_utf8(message.payload.to_vec()) {
                Ok(body) => return Ok(Some(body)),
                Err(_) => warn!(
                    "Dropping event on '{}': body is not valid UTF-8",
                    message.topic
                ),
            }
        }
    }
}

/// Feed every event to `handler` until the stream ends or shutdown.
///
/// Returns the number of events handled.
pub async fn drive_event_stream<E: EventStream + ?Sized>(
    stream: &mut E,
    handler: &FanoutHandler,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<u64, ChannelError> {
    let mut handled = 0u64;
    loop {
        let event = tokio::select! {
            event = stream.next_event() => event,
            _ = shutdown.recv() => {
                debug!("Event stream stopped after {} events", handled);
                return Ok(handled);
            }
        };

        match event {
            Ok(Some(body)) => {
                handler.handle(&body).await;
                handled += 1;
            }
            Ok(None) => {
                info!("Event stream ended after {} events", handled);
                return Ok(handled);
            }
            Err(e) => {
                error!("Event stream failed: {}", e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::envelope::EnvelopeCodec;
    use crate::push::{PushError, PushSink, SubscriberId, SubscriberRegistry};
    use crate::remote::InboundMessage;
    use parking_lot::Mutex;

    struct ScriptedStream {
        events: VecDeque<Result<Option<String>, ChannelError>>,
    }

    #[async_trait]
    impl EventStream for ScriptedStream {
        async fn next_event(&mut self) -> Result<Option<String>, ChannelError> {
            match self.events.pop_front() {
                Some(event) => event,
                None => std::future::pending().await,
            }
        }
    }

    struct Collect {
        id: SubscriberId,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushSink for Collect {
        fn id(&self) -> SubscriberId {
            self.id
        }

        async fn send_json(&self, json: Arc<str>) -> Result<(), PushError> {
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            self.seen.lock().push(value["topic"].as_str().unwrap().to_string());
            Ok(())
        }
    }

    fn handler() -> (FanoutHandler, Arc<Collect>) {
        let registry = Arc::new(SubscriberRegistry::new(Duration::from_secs(1)));
        let viewer = Arc::new(Collect {
            id: registry.next_id(),
            seen: Mutex::new(Vec::new()),
        });
        registry.register(viewer.clone());
        (
            FanoutHandler::new(EnvelopeCodec::default(), registry, None, None),
            viewer,
        )
    }

    #[tokio::test]
    async fn test_events_handled_in_order() {
        let (handler, viewer) = handler();
        let mut stream = ScriptedStream {
            events: VecDeque::from(vec![
                Ok(Some(r#"{"topic":"a","data":"1"}"#.to_string())),
                Ok(Some("not json".to_string())),
                Ok(Some(r#"{"data":"2"}"#.to_string())),
                Ok(None),
            ]),
        };
        let (_tx, rx) = broadcast::channel(1);

        let handled = drive_event_stream(&mut stream, &handler, rx).await.unwrap();
        assert_eq!(handled, 3);
        assert_eq!(*viewer.seen.lock(), vec!["a", "raw-data", "device"]);
    }

    struct Payloads {
        payloads: VecDeque<&'static [u8]>,
    }

    #[async_trait]
    impl MessageSource for Payloads {
        async fn next_message(&mut self) -> Result<InboundMessage, ChannelError> {
            match self.payloads.pop_front() {
                Some(payload) => Ok(InboundMessage::new("c2d", payload)),
                None => Err(ChannelError::ConnectionLost("drained".into())),
            }
        }
    }

    const INVALID: &[u8] = &[0xc3, 0x28];

    #[tokio::test]
    async fn test_source_events_skip_non_utf8() {
        let mut events = SourceEvents::new(Payloads {
            payloads: VecDeque::from(vec![INVALID, b"ok".as_slice()]),
        });

        assert_eq!(events.next_event().await.unwrap(), Some("ok".to_string()));
        assert!(events.next_event().await.unwrap_err().is_connection_lost());
    }

    #[tokio::test]
    async fn test_stream_error_is_reported() {
        let (handler, _viewer) = handler();
        let mut stream = ScriptedStream {
            events: VecDeque::from(vec![
                Ok(Some(r#"{"topic":"a","data":"1"}"#.to_string())),
                Err(ChannelError::ConnectionLost("eof".into())),
            ]),
        };
        let (_tx, rx) = broadcast::channel(1);

        let err = drive_event_stream(&mut stream, &handler, rx).await.unwrap_err();
        assert!(err.is_connection_lost());
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_stream() {
        let (handler, _viewer) = handler();
        let mut stream = ScriptedStream {
            events: VecDeque::new(),
        };
        let (tx, rx) = broadcast::channel(1);

        let driver = async { drive_event_stream(&mut stream, &handler, rx).await };
        let stop = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(()).unwrap();
        };
        let (result, ()) = tokio::join!(driver, stop);
        assert_eq!(result.unwrap(), 0);
    }
}
