//! Cloud Device Channel
//!
//! The cloud side of the bridge is an IoT-Hub style MQTT endpoint. The device
//! publishes telemetry to its events topic and receives cloud-to-device
//! bodies on its devicebound subscription. Those bodies carry no topic of
//! their own, so besides the pump they can also be consumed as a plain
//! [`EventStream`].

mod event_stream;
mod iothub;

pub use event_stream::{drive_event_stream, EventStream, SourceEvents};
pub use iothub::{devicebound_filter, events_topic, IotHubChannel, API_VERSION};
