//! Cloudlink - local MQTT bus to cloud device channel bridge
//!
//! Usage:
//!   cloudlink [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   --local <ADDR>         Local broker address (default: 127.0.0.1:1883)
//!   --ws-bind <ADDR>       WebSocket push bind address (default: 0.0.0.0:8080)
//!   --no-persistence       Disable the durable sink
//!   -h, --help             Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cloudlink::config::Config;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Cloudlink - MQTT to cloud bridge with live fan-out
#[derive(Parser, Debug)]
#[command(name = "cloudlink")]
#[command(author = "Cloudlink Contributors")]
#[command(version)]
#[command(about = "Bridge between a local MQTT broker and a cloud device channel")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    /// Local broker address (host:port)
    #[arg(long)]
    local: Option<String>,

    /// WebSocket push bind address
    #[arg(long)]
    ws_bind: Option<SocketAddr>,

    /// Disable the durable sink
    #[arg(long)]
    no_persistence: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // File (or env only) first; CLI overrides are applied on top
    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(local) = args.local {
        config.local.address = local;
    }
    if let Some(bind) = args.ws_bind {
        config.push.bind = bind;
    }
    if args.no_persistence {
        config.persistence.enabled = false;
    }

    // Setup logging - RUST_LOG wins, then CLI, then config
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact();
    match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish())?,
        Err(_) => tracing::subscriber::set_global_default(
            builder.with_max_level(log_level.to_tracing_level()).finish(),
        )?,
    }

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    info!("Starting Cloudlink");
    info!("  Local broker: {}", config.local.address);
    info!(
        "  Cloud: {} ({}) as '{}'",
        config.cloud.address, config.cloud.protocol, config.cloud.device_id
    );
    info!(
        "  Namespaces: out='{}' in='{}' excluded={:?}",
        config.bridge.outbound_prefix, config.bridge.inbound_prefix, config.bridge.excluded_segments
    );
    if config.push.enabled {
        info!("  Push: ws://{}{}", config.push.bind, config.push.path);
    } else {
        info!("  Push: disabled");
    }
    if config.persistence.enabled {
        info!("  Persistence: {}", config.persistence.path.display());
    } else {
        info!("  Persistence: disabled");
    }
    if config.metrics.enabled {
        info!("  Metrics: enabled (http://{})", config.metrics.bind);
    } else {
        info!("  Metrics: disabled");
    }

    let runtime = match cloudlink::init(config) {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            eprintln!("Error starting cloudlink: {}", e);
            std::process::exit(1);
        }
    };

    let signal_runtime = runtime.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal_runtime.shutdown(),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    runtime.run().await?;
    Ok(())
}
