//! Push channel configuration

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

fn default_send_timeout() -> Duration {
    Duration::from_secs(2)
}

/// WebSocket push channel configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Whether the push server is started
    pub enabled: bool,
    /// WebSocket bind address
    pub bind: SocketAddr,
    /// Request path accepted for upgrades
    pub path: String,
    /// Upper bound for delivering one message to one subscriber
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
    /// Per-subscriber queue capacity
    pub channel_capacity: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            path: "/ws".to_string(),
            send_timeout: default_send_timeout(),
            channel_capacity: 64,
        }
    }
}
