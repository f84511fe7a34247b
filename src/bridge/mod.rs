//! Bridge Module
//!
//! Moves messages between the local bus and the cloud device channel.
//!
//! # Directions
//!
//! - **local -> cloud**: the local subscription (`outbound_filter`) feeds the
//!   pump; topics pass the loop guard, lose `outbound_prefix` and travel as
//!   `{"topic","data"}` JSON text.
//! - **cloud -> local**: cloud bodies are unwrapped, republished under
//!   `inbound_prefix` and fanned out to push subscribers and the durable sink.
//!
//! # Loop Prevention
//!
//! Anything the bridge republishes lands under `inbound_prefix`. The loop
//! guard refuses to forward topics whose first segment is excluded, and the
//! inbound namespace segment is always excluded.
//!
//! # Example Configuration
//!
//! ```toml
//! [bridge]
//! outbound_filter = "out/#"
//! outbound_prefix = "out/"
//! inbound_prefix = "from-cloud/"
//! excluded_segments = ["from-cloud", "bluetooth"]
//! ```

mod connector;
mod fanout;
mod handle;
mod loop_guard;
mod pump;
mod supervisor;


pub use connector::{
    local_options, Channels, Connector, EventChannels, EventConnector, MqttConnector,
    MqttEventConnector,
};
pub use fanout::FanoutHandler;
pub use handle::{BridgeHandle, LocalSlot};
pub use loop_guard::LoopGuard;
pub use pump::{
    BridgePump, Direction, ForwardError, Outbound, PumpError, PumpReport, PumpStats,
};
pub use supervisor::{Backoff, Supervisor};
