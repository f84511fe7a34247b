//! Cloudlink - local MQTT bus to cloud device channel bridge
//!
//! Pumps messages both ways between a local broker and a cloud device link,
//! keeps republished messages from looping back, and fans cloud events out
//! to live WebSocket viewers and a durable store.

pub mod bridge;
pub mod cloud;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod metrics;
pub mod mqtt;
pub mod persistence;
pub mod protocol;
pub mod push;
pub mod remote;
pub mod runtime;
pub mod topic;
pub mod transport;

pub use bridge::{BridgeHandle, BridgePump, FanoutHandler, LoopGuard, Supervisor};
pub use config::Config;
pub use envelope::{Envelope, EnvelopeCodec, Origin};
pub use metrics::{Metrics, MetricsServer};
pub use persistence::{FjallBackend, SinkWriter, StorageBackend};
pub use protocol::QoS;
pub use push::{PushServer, SubscriberRegistry};
pub use remote::{ChannelError, CloudSender, LocalPublisher, MessageSource};
pub use runtime::{init, Runtime, RuntimeError};
