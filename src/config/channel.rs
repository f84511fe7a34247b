//! Channel Configuration
//!
//! Connection settings for the local broker and the cloud device endpoint.

use std::time::Duration;

use serde::Deserialize;

/// Cloud connection protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProtocol {
    /// Plain MQTT over TCP
    Mqtt,
    /// MQTT over TLS
    #[default]
    Mqtts,
}

impl std::fmt::Display for CloudProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudProtocol::Mqtt => write!(f, "mqtt"),
            CloudProtocol::Mqtts => write!(f, "mqtts"),
        }
    }
}

impl CloudProtocol {
    /// Get default port for this protocol
    pub fn default_port(&self) -> u16 {
        match self {
            CloudProtocol::Mqtt => 1883,
            CloudProtocol::Mqtts => 8883,
        }
    }

    pub fn uses_tls(&self) -> bool {
        matches!(self, CloudProtocol::Mqtts)
    }
}

fn default_true() -> bool {
    true
}

fn default_local_address() -> String {
    "127.0.0.1:1883".to_string()
}

fn default_client_id() -> String {
    "cloudlink-bridge".to_string()
}

fn default_keepalive() -> u16 {
    60
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_ack_timeout() -> Duration {
    Duration::from_secs(10)
}

/// Local broker connection
#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    /// Run the local pumps; when disabled cloud messages are only fanned out
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Broker address (host:port or just host)
    #[serde(default = "default_local_address")]
    pub address: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive: u16,

    /// Timeout for TCP connect and CONNACK (e.g., "10s")
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// How long a QoS 1 publish waits for PUBACK
    #[serde(default = "default_ack_timeout", with = "humantime_serde")]
    pub ack_timeout: Duration,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_local_address(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keepalive: default_keepalive(),
            connect_timeout: default_connect_timeout(),
            ack_timeout: default_ack_timeout(),
        }
    }
}

/// Cloud device channel
#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    /// Hub endpoint (host:port or just host)
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub protocol: CloudProtocol,

    /// Device identity; also used as the MQTT client id
    #[serde(default)]
    pub device_id: String,

    /// Hub host name used in the username; defaults to the address host
    pub hub_host: Option<String>,

    /// Full username override
    pub username: Option<String>,

    /// Shared access signature presented as the MQTT password
    pub sas_token: Option<String>,

    /// Path to CA certificate file (PEM format); webpki roots when unset
    pub ca_cert: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive: u16,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(default = "default_ack_timeout", with = "humantime_serde")]
    pub ack_timeout: Duration,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            protocol: CloudProtocol::default(),
            device_id: String::new(),
            hub_host: None,
            username: None,
            sas_token: None,
            ca_cert: None,
            keepalive: default_keepalive(),
            connect_timeout: default_connect_timeout(),
            ack_timeout: default_ack_timeout(),
        }
    }
}
