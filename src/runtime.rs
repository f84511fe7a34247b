//! Process wiring
//!
//! `init` builds every component from configuration and hands back a
//! [`Runtime`] that owns them. Nothing lives in process-wide state: the
//! subscriber registry, sink and pump belong to the runtime and are torn
//! down by it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::bridge::{
    BridgeHandle, BridgePump, FanoutHandler, MqttConnector, MqttEventConnector, Supervisor,
};
use crate::config::{Config, ConfigError};
use crate::envelope::EnvelopeCodec;
use crate::metrics::{Metrics, MetricsServer};
use crate::persistence::{FjallBackend, PersistenceError, SinkWriter, StorageBackend};
use crate::push::{PushServer, SubscriberRegistry};

/// Startup or teardown failure
#[derive(Debug)]
pub enum RuntimeError {
    Config(ConfigError),
    Persistence(PersistenceError),
    Io(std::io::Error),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Config(e) => write!(f, "{}", e),
            RuntimeError::Persistence(e) => write!(f, "persistence: {}", e),
            RuntimeError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<ConfigError> for RuntimeError {
    fn from(e: ConfigError) -> Self {
        RuntimeError::Config(e)
    }
}

impl From<PersistenceError> for RuntimeError {
    fn from(e: PersistenceError) -> Self {
        RuntimeError::Persistence(e)
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Io(e)
    }
}

/// Build all components. Must be called inside a tokio runtime.
pub fn init(config: Config) -> Result<Runtime, RuntimeError> {
    config.validate()?;

    let metrics = config
        .metrics
        .enabled
        .then(|| Arc::new(Metrics::new()));

    let mut registry = SubscriberRegistry::new(config.push.send_timeout);
    if let Some(ref m) = metrics {
        registry = registry.with_metrics(m.clone());
    }
    let registry = Arc::new(registry);

    let sink = if config.persistence.enabled {
        let backend: Arc<dyn StorageBackend> =
            Arc::new(FjallBackend::open(&config.persistence.path)?);
        info!("Durable sink at {}", config.persistence.path.display());
        Some(Arc::new(SinkWriter::new(
            backend,
            config.persistence.flush_interval,
            config.persistence.max_batch_size,
            config.persistence.channel_capacity,
            metrics.clone(),
        )))
    } else {
        None
    };

    let codec = EnvelopeCodec::from_config(&config.bridge);
    let fanout = Arc::new(FanoutHandler::new(
        codec,
        registry.clone(),
        sink.clone(),
        metrics.clone(),
    ));
    let pump = Arc::new(BridgePump::new(&config.bridge, fanout.clone(), metrics.clone()));
    let supervisor = Supervisor::new(&config.bridge, metrics.clone());
    let handle = supervisor.handle(pump.clone());
    let (shutdown, _) = broadcast::channel(1);

    Ok(Runtime {
        config,
        registry,
        sink,
        metrics,
        fanout,
        pump,
        supervisor,
        handle,
        shutdown,
        stopping: AtomicBool::new(false),
    })
}

/// Explicitly owned bridge process
pub struct Runtime {
    config: Config,
    registry: Arc<SubscriberRegistry>,
    sink: Option<Arc<SinkWriter>>,
    metrics: Option<Arc<Metrics>>,
    fanout: Arc<FanoutHandler>,
    pump: Arc<BridgePump>,
    supervisor: Supervisor,
    handle: BridgeHandle,
    shutdown: broadcast::Sender<()>,
    stopping: AtomicBool,
}

impl Runtime {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn sink(&self) -> Option<&Arc<SinkWriter>> {
        self.sink.as_ref()
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    /// Handle for service-to-device commands
    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    /// Serve push and metrics endpoints and keep the bridge connected until
    /// [`shutdown`](Self::shutdown), then flush the sink.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let served = if self.stopping.load(Ordering::Acquire) {
            Ok(())
        } else {
            self.serve().await
        };

        // The sink is closed on every path, including a bind failure
        if let Some(ref sink) = self.sink {
            sink.shutdown(self.config.bridge.shutdown_grace).await?;
        }
        served?;
        info!("Runtime stopped");
        Ok(())
    }

    async fn serve(&self) -> Result<(), RuntimeError> {
        let mut servers = Vec::new();

        if self.config.push.enabled {
            let listener = TcpListener::bind(self.config.push.bind).await?;
            let server = PushServer::new(self.config.push.clone(), self.registry.clone());
            let shutdown = self.shutdown.clone();
            servers.push(tokio::spawn(async move {
                if let Err(e) = server.serve(listener, shutdown).await {
                    error!("Push server error: {}", e);
                }
            }));
        }

        if let Some(ref metrics) = self.metrics {
            let server = MetricsServer::new(
                metrics.clone(),
                self.config.metrics.bind,
                self.supervisor.ready_flag(),
            );
            let shutdown = self.shutdown.subscribe();
            servers.push(tokio::spawn(async move {
                if let Err(e) = server.run(shutdown).await {
                    error!("Metrics server error: {}", e);
                }
            }));
        }

        if self.config.local.enabled {
            info!(
                "Bridging {} <-> {} (device '{}')",
                self.config.local.address, self.config.cloud.address, self.config.cloud.device_id
            );
            let connector =
                MqttConnector::new(&self.config.local, &self.config.cloud, &self.config.bridge);
            self.supervisor
                .run(&connector, &self.pump, &self.shutdown)
                .await;
        } else {
            info!(
                "Event-stream mode: fanning out cloud events for device '{}'",
                self.config.cloud.device_id
            );
            let connector = MqttEventConnector::new(&self.config.cloud);
            self.supervisor
                .run_events(&connector, &self.fanout, &self.shutdown)
                .await;
        }

        for server in servers {
            if let Err(e) = server.await {
                warn!("Server task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    /// Ask `run` to stop; it returns once in-flight work is drained
    pub fn shutdown(&self) {
        if !self.stopping.swap(true, Ordering::AcqRel) {
            info!("Shutdown requested");
        }
        let _ = self.shutdown.send(());
    }
}
