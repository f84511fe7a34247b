//! Channel Abstractions
//!
//! Minimal surface of the two channels the bridge pumps between:
//! a source of inbound messages, a local publisher and a cloud sender.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::protocol::QoS;

/// Error type for channel operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Connection to the channel failed or was lost
    ConnectionLost(String),
    /// Remote side rejected the operation
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// Outbound queue is full
    QueueFull,
    /// Invalid configuration
    InvalidConfig(String),
    /// Other error
    Other(String),
}

impl ChannelError {
    /// Whether the error ends the channel rather than a single message
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ChannelError::ConnectionLost(_))
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            ChannelError::Rejected(msg) => write!(f, "Rejected: {}", msg),
            ChannelError::Timeout => write!(f, "Operation timed out"),
            ChannelError::QueueFull => write!(f, "Message queue full"),
            ChannelError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
            ChannelError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Status of a channel connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Not connected
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and operational
    Connected,
    /// Connection failed, backing off before retry
    Backoff,
}

/// A message received from a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message arrived on (transport topic for the cloud link)
    pub topic: String,
    /// Raw payload
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Source of inbound messages (local subscription or cloud receive call)
///
/// `next_message` suspends until a message is available. An error means the
/// underlying connection is gone and no further messages will arrive.
#[async_trait]
pub trait MessageSource: Send {
    async fn next_message(&mut self) -> Result<InboundMessage, ChannelError>;
}

/// Publish side of the local bus
#[async_trait]
pub trait LocalPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), ChannelError>;
}

/// Send side of the cloud channel
#[async_trait]
pub trait CloudSender: Send + Sync {
    async fn send_message(&self, body: String) -> Result<(), ChannelError>;
}
