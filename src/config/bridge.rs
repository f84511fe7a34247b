//! Bridge Configuration
//!
//! Topic namespaces, loop prevention and pump policy.

use std::time::Duration;

use serde::Deserialize;

use crate::protocol::QoS;

fn default_outbound_filter() -> String {
    "out/#".to_string()
}

fn default_outbound_prefix() -> String {
    "out/".to_string()
}

fn default_inbound_prefix() -> String {
    "from-cloud/".to_string()
}

fn default_excluded_segments() -> Vec<String> {
    vec!["from-cloud".to_string()]
}

fn default_fallback_topic() -> String {
    "device".to_string()
}

fn default_raw_topic() -> String {
    "raw-data".to_string()
}

fn default_qos() -> u8 {
    1
}

fn default_reconnect_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_reconnect_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_consecutive_failures() -> u32 {
    10
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

/// Bridge behaviour between the local bus and the cloud channel
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Local subscription for the local -> cloud direction
    #[serde(default = "default_outbound_filter")]
    pub outbound_filter: String,

    /// Namespace stripped from local topics before sending to the cloud
    #[serde(default = "default_outbound_prefix")]
    pub outbound_prefix: String,

    /// Namespace added to topics republished from the cloud
    #[serde(default = "default_inbound_prefix")]
    pub inbound_prefix: String,

    /// First topic segments never forwarded to the cloud.
    /// The first segment of `inbound_prefix` is always added.
    #[serde(default = "default_excluded_segments")]
    pub excluded_segments: Vec<String>,

    /// Topic used when a cloud envelope has no `topic`
    #[serde(default = "default_fallback_topic")]
    pub fallback_topic: String,

    /// Topic used when a cloud body is not a JSON object
    #[serde(default = "default_raw_topic")]
    pub raw_topic: String,

    /// QoS for local publishes and cloud sends (0 or 1)
    #[serde(default = "default_qos")]
    pub qos: u8,

    /// Initial reconnect delay (e.g., "1s")
    #[serde(default = "default_reconnect_interval", with = "humantime_serde")]
    pub reconnect_interval: Duration,

    /// Maximum reconnect delay for exponential backoff
    #[serde(default = "default_max_reconnect_interval", with = "humantime_serde")]
    pub max_reconnect_interval: Duration,

    /// Consecutive forward failures after which a direction gives up (0 = never)
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Time allowed for in-flight work on shutdown
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            outbound_filter: default_outbound_filter(),
            outbound_prefix: default_outbound_prefix(),
            inbound_prefix: default_inbound_prefix(),
            excluded_segments: default_excluded_segments(),
            fallback_topic: default_fallback_topic(),
            raw_topic: default_raw_topic(),
            qos: default_qos(),
            reconnect_interval: default_reconnect_interval(),
            max_reconnect_interval: default_max_reconnect_interval(),
            max_consecutive_failures: default_max_consecutive_failures(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl BridgeConfig {
    pub fn qos(&self) -> QoS {
        QoS::from_u8(self.qos)
            .unwrap_or(QoS::AtLeastOnce)
            .min(QoS::AtLeastOnce)
    }
}
