//! Durable sink settings

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

fn default_flush_interval() -> Duration {
    Duration::from_millis(100)
}

/// Where and how bridged cloud messages are recorded
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,

    /// fjall keyspace directory
    pub path: PathBuf,

    /// Longest a queued record waits before its batch is written (e.g., "100ms")
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Records written per batch at most
    pub max_batch_size: usize,

    /// Writer queue size; records arriving while it is full are dropped
    pub channel_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("./data"),
            flush_interval: default_flush_interval(),
            max_batch_size: 100,
            channel_capacity: 10_000,
        }
    }
}
