//! Collaborator Channels
//!
//! The bridge core depends on the local bus and the cloud link only through
//! the traits in this module. MQTT-backed implementations live in
//! `crate::mqtt` and `crate::cloud`; tests substitute in-memory fakes.

mod peer;

pub use peer::{
    ChannelError, ChannelStatus, CloudSender, InboundMessage, LocalPublisher, MessageSource,
};
