//! Envelope Codec
//!
//! Converts between local bus `(topic, bytes)` pairs and the JSON wrapper
//! carried over the cloud channel:
//!
//! ```text
//! {"topic": "<string>", "data": "<string>"}
//! ```
//!
//! Decoding from the cloud never fails. Bodies that are not a JSON object
//! land on the raw topic with the body as data, a missing `topic` falls back
//! to the configured fallback topic and a missing `data` to the whole body.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::BridgeConfig;
use crate::topic::strip_namespace;

/// Which side a message entered the bridge from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Cloud,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::Cloud => write!(f, "cloud"),
        }
    }
}

/// One message in flight through the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub data: String,
    pub origin: Origin,
}

/// Wire form exchanged with the cloud channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudMessage {
    pub topic: String,
    pub data: String,
}

/// Errors raised while building an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Payload is not valid UTF-8
    InvalidUtf8 { topic: String },
    /// Wire JSON could not be produced
    Serialize(String),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::InvalidUtf8 { topic } => {
                write!(f, "payload on '{}' is not valid UTF-8", topic)
            }
            EnvelopeError::Serialize(e) => write!(f, "serialize error: {}", e),
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl From<serde_json::Error> for EnvelopeError {
    fn from(e: serde_json::Error) -> Self {
        EnvelopeError::Serialize(e.to_string())
    }
}

/// Pure translation between local messages and cloud wire text
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    strip_prefix: String,
    fallback_topic: String,
    raw_topic: String,
}

impl EnvelopeCodec {
    pub fn new(
        strip_prefix: impl Into<String>,
        fallback_topic: impl Into<String>,
        raw_topic: impl Into<String>,
    ) -> Self {
        Self {
            strip_prefix: strip_prefix.into(),
            fallback_topic: fallback_topic.into(),
            raw_topic: raw_topic.into(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.outbound_prefix.clone(),
            config.fallback_topic.clone(),
            config.raw_topic.clone(),
        )
    }

    pub fn fallback_topic(&self) -> &str {
        &self.fallback_topic
    }

    pub fn raw_topic(&self) -> &str {
        &self.raw_topic
    }

    /// Wrap a local message for the cloud, stripping the outbound namespace once
    pub fn encode_for_cloud(&self, topic: &str, payload: &str) -> Result<String, EnvelopeError> {
        let message = CloudMessage {
            topic: strip_namespace(topic, &self.strip_prefix).to_string(),
            data: payload.to_string(),
        };
        Ok(serde_json::to_string(&message)?)
    }

    /// Unwrap a cloud body into an envelope
    pub fn decode_from_cloud(&self, wire: &str) -> Envelope {
        let mut object = match serde_json::from_str::<Value>(wire) {
            Ok(Value::Object(object)) => object,
            _ => {
                return Envelope {
                    topic: self.raw_topic.clone(),
                    data: wire.to_string(),
                    origin: Origin::Cloud,
                }
            }
        };

        let topic = match object.remove("topic") {
            Some(Value::String(topic)) if !topic.is_empty() => topic,
            _ => self.fallback_topic.clone(),
        };

        let data = match object.remove("data") {
            Some(Value::String(data)) => data,
            None | Some(Value::Null) => wire.to_string(),
            // Structured data is forwarded as its JSON text
            Some(other) => other.to_string(),
        };

        Envelope {
            topic,
            data,
            origin: Origin::Cloud,
        }
    }

    /// Wrap a local bus message; non UTF-8 payloads are rejected
    pub fn decode_from_local(&self, topic: &str, payload: &[u8]) -> Result<Envelope, EnvelopeError> {
        let data = std::str::from_utf8(payload).map_err(|_| EnvelopeError::InvalidUtf8 {
            topic: topic.to_string(),
        })?;
        Ok(Envelope {
            topic: topic.to_string(),
            data: data.to_string(),
            origin: Origin::Local,
        })
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}
