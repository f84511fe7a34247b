//! Prometheus endpoint settings

use std::net::SocketAddr;

use serde::Deserialize;

fn default_metrics_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

/// `/metrics`, `/health` and `/ready` listener; off unless enabled
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_bind")]
    pub bind: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_metrics_bind(),
        }
    }
}
