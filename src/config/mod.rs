//! Configuration Module
//!
//! Provides TOML-based configuration for the bridge with support for:
//! - Local broker connection
//! - Cloud device channel (IoT-Hub style MQTT endpoint)
//! - Bridge topic namespaces and loop prevention
//! - WebSocket push channel
//! - Durable sink
//! - Environment variable overrides (CLOUDLINK__* prefix)

use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use bridge::BridgeConfig;
pub use channel::{CloudConfig, CloudProtocol, LocalConfig};
pub use metrics::MetricsConfig;
pub use persistence::PersistenceConfig;
pub use push::PushConfig;

mod bridge;
mod channel;
mod metrics;
mod persistence;
mod push;

use crate::topic::validate_topic_filter;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}


/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Local broker connection
    pub local: LocalConfig,
    /// Cloud device channel
    pub cloud: CloudConfig,
    /// Topic namespaces, loop guard and pump policy
    pub bridge: BridgeConfig,
    /// WebSocket push channel
    pub push: PushConfig,
    /// Durable sink
    pub persistence: PersistenceConfig,
    /// Metrics endpoint
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `CLOUDLINK__` prefix with double underscores for nesting:
    ///    - `CLOUDLINK__LOCAL__ADDRESS=10.0.0.2:1883` overrides `local.address`
    ///    - `CLOUDLINK__CLOUD__SAS_TOKEN=...` overrides `cloud.sas_token`
    ///    - `CLOUDLINK__PERSISTENCE__ENABLED=false` overrides `persistence.enabled`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("local.address", "127.0.0.1:1883")?
            .set_default("local.client_id", "cloudlink-bridge")?
            .set_default("bridge.outbound_filter", "out/#")?
            .set_default("bridge.outbound_prefix", "out/")?
            .set_default("bridge.inbound_prefix", "from-cloud/")?
            .set_default("push.bind", "0.0.0.0:8080")?
            .set_default("push.path", "/ws")?
            .set_default("persistence.path", "./data")?
            .set_default("metrics.enabled", false)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("CLOUDLINK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bridge = &self.bridge;

        for (name, prefix) in [
            ("outbound_prefix", &bridge.outbound_prefix),
            ("inbound_prefix", &bridge.inbound_prefix),
        ] {
            if !prefix.is_empty() && !prefix.ends_with('/') {
                return Err(ConfigError::Validation(format!(
                    "bridge.{} '{}' must end with '/'",
                    name, prefix
                )));
            }
        }

        if let Err(reason) = validate_topic_filter(&bridge.outbound_filter) {
            return Err(ConfigError::Validation(format!(
                "bridge.outbound_filter '{}': {}",
                bridge.outbound_filter, reason
            )));
        }

        if bridge.qos > 1 {
            return Err(ConfigError::Validation(
                "bridge.qos must be 0 or 1".to_string(),
            ));
        }

        if bridge.fallback_topic.is_empty() || bridge.raw_topic.is_empty() {
            return Err(ConfigError::Validation(
                "bridge.fallback_topic and bridge.raw_topic must not be empty".to_string(),
            ));
        }

        if bridge.reconnect_interval.is_zero() {
            return Err(ConfigError::Validation(
                "bridge.reconnect_interval must be greater than zero".to_string(),
            ));
        }

        if bridge.max_reconnect_interval < bridge.reconnect_interval {
            return Err(ConfigError::Validation(
                "bridge.max_reconnect_interval must not be shorter than reconnect_interval"
                    .to_string(),
            ));
        }

        if self.cloud.device_id.is_empty() {
            return Err(ConfigError::Validation(
                "cloud.device_id is required".to_string(),
            ));
        }
        if self.cloud.address.is_empty() {
            return Err(ConfigError::Validation(
                "cloud.address is required".to_string(),
            ));
        }

        if self.push.enabled {
            if self.push.send_timeout.is_zero() {
                return Err(ConfigError::Validation(
                    "push.send_timeout must be greater than zero".to_string(),
                ));
            }
            if !self.push.path.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "push.path '{}' must start with '/'",
                    self.push.path
                )));
            }
        }

        if self.persistence.enabled {
            if self.persistence.max_batch_size == 0 {
                return Err(ConfigError::Validation(
                    "persistence.max_batch_size must be greater than zero".to_string(),
                ));
            }
            if self.persistence.flush_interval.is_zero() {
                return Err(ConfigError::Validation(
                    "persistence.flush_interval must be greater than zero".to_string(),
                ));
            }
        }

        Ok(())
    }
}
