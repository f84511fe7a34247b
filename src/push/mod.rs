//! Push Channel
//!
//! Live delivery of bridged messages to viewers. The [`SubscriberRegistry`]
//! owns one [`PushSink`] per live connection and broadcasts to a snapshot of
//! them; a subscriber whose send fails or times out is removed without
//! affecting the others. [`PushServer`] accepts WebSocket viewers and
//! registers a queue-backed sink for each of them.

mod registry;
mod server;

use std::fmt;

use serde::Serialize;

use crate::envelope::Envelope;

pub use registry::{BroadcastReport, PushSink, SubscriberId, SubscriberRegistry};
pub use server::PushServer;

/// JSON object pushed to viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushMessage {
    pub topic: String,
    pub payload: String,
    /// Local wall-clock time, `YYYY-mm-dd HH:MM:SS`
    pub time: String,
}

impl PushMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            time: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self::new(envelope.topic.clone(), envelope.data.clone())
    }
}

/// Delivery failure for one subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Connection is gone
    Closed,
    /// Send did not complete within the configured bound
    Timeout,
    /// Transport-level failure
    Transport(String),
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Closed => write!(f, "subscriber closed"),
            PushError::Timeout => write!(f, "send timed out"),
            PushError::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl std::error::Error for PushError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Origin;

    #[test]
    fn test_push_message_shape() {
        let envelope = Envelope {
            topic: "lamp/on".into(),
            data: "true".into(),
            origin: Origin::Cloud,
        };
        let message = PushMessage::from_envelope(&envelope);
        let json: serde_json::Value = serde_json::to_value(&message).unwrap();

        assert_eq!(json["topic"], "lamp/on");
        assert_eq!(json["payload"], "true");
        let time = json["time"].as_str().unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(time, "%Y-%m-%d %H:%M:%S").is_ok());
    }
}
