//! MQTT Client Session
//!
//! A small MQTT v3.1.1 client used for both the local broker and the cloud
//! device endpoint. [`connect`] performs the CONNECT/SUBSCRIBE handshake and
//! then hands the socket to a background session task; callers talk to the
//! task through an [`MqttHandle`] (publish, disconnect) and receive messages
//! through [`MqttMessages`].

mod client;

#[cfg(test)]
mod tests;

pub use client::{connect, MqttHandle, MqttMessages, MqttOptions};
