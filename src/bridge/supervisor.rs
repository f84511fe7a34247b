//! Reconnect-and-restart policy around the pump
//!
//! The pump reports a lost connection and stops. The supervisor owns the
//! decision to reconnect: it opens fresh channels, runs a session until
//! either direction ends, stops the other direction within the shutdown
//! grace period and retries with exponential backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::connector::{Channels, Connector, EventChannels, EventConnector};
use super::fanout::FanoutHandler;
use super::handle::{BridgeHandle, LocalSlot};
use super::pump::{BridgePump, PumpError, PumpStats};
use crate::cloud::drive_event_stream;
use crate::config::BridgeConfig;
use crate::metrics::Metrics;

/// Exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay before the next attempt; doubles up to the maximum
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// How a session ended
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// Keeps the bridge connected until shutdown
pub struct Supervisor {
    reconnect_interval: Duration,
    max_reconnect_interval: Duration,
    shutdown_grace: Duration,
    local: LocalSlot,
    ready: Arc<AtomicBool>,
    metrics: Option<Arc<Metrics>>,
}

impl Supervisor {
    pub fn new(config: &BridgeConfig, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            reconnect_interval: config.reconnect_interval,
            max_reconnect_interval: config.max_reconnect_interval,
            shutdown_grace: config.shutdown_grace,
            local: Arc::new(RwLock::new(None)),
            ready: Arc::new(AtomicBool::new(false)),
            metrics,
        }
    }

    /// Set while a session is running
    pub fn ready_flag(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Handle for delivering device commands through the current session
    pub fn handle(&self, pump: Arc<BridgePump>) -> BridgeHandle {
        BridgeHandle::new(self.local.clone(), self.ready.clone(), pump)
    }

    /// Run pump sessions until `shutdown` fires
    pub async fn run<C: Connector + ?Sized>(
        &self,
        connector: &C,
        pump: &BridgePump,
        shutdown: &broadcast::Sender<()>,
    ) {
        let mut shutdown_rx = shutdown.subscribe();
        let mut backoff = Backoff::new(self.reconnect_interval, self.max_reconnect_interval);
        let mut sessions = 0u64;

        loop {
            debug!("Supervisor: connecting channels");
            let connected = tokio::select! {
                connected = connector.connect() => connected,
                _ = shutdown_rx.recv() => break,
            };

            match connected {
                Ok(channels) => {
                    backoff.reset();
                    if sessions > 0 {
                        if let Some(ref m) = self.metrics {
                            m.reconnected();
                        }
                    }
                    sessions += 1;

                    match self.run_session(channels, pump, shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => {
                            warn!("Supervisor: session ended: {}", reason);
                        }
                    }
                }
                Err(e) => error!("Supervisor: connect failed: {}", e),
            }

            let delay = backoff.next_delay();
            info!("Supervisor: reconnecting in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("Supervisor: stopped after {} session(s)", sessions);
    }

    async fn run_session(
        &self,
        channels: Channels,
        pump: &BridgePump,
        shutdown: &broadcast::Sender<()>,
    ) -> SessionEnd {
        let Channels {
            mut local_source,
            local_publisher,
            mut cloud_source,
            cloud_sender,
        } = channels;

        *self.local.write() = Some(local_publisher.clone());
        self.ready.store(true, Ordering::Release);
        info!("Supervisor: bridge session running");

        let (stop_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown.subscribe();

        let outbound =
            pump.run_outbound(local_source.as_mut(), cloud_sender.as_ref(), stop_tx.subscribe());
        let inbound =
            pump.run_inbound(cloud_source.as_mut(), local_publisher.as_ref(), stop_tx.subscribe());
        tokio::pin!(outbound, inbound);

        let end = tokio::select! {
            result = &mut outbound => {
                let _ = stop_tx.send(());
                let other = timeout(self.shutdown_grace, &mut inbound).await;
                session_end(result, other.ok())
            }
            result = &mut inbound => {
                let _ = stop_tx.send(());
                let other = timeout(self.shutdown_grace, &mut outbound).await;
                session_end(result, other.ok())
            }
            _ = shutdown_rx.recv() => {
                let _ = stop_tx.send(());
                let drained = timeout(self.shutdown_grace, async {
                    tokio::join!(&mut outbound, &mut inbound)
                })
                .await;
                if drained.is_err() {
                    warn!("Supervisor: in-flight work abandoned after {:?}", self.shutdown_grace);
                }
                SessionEnd::Shutdown
            }
        };

        self.ready.store(false, Ordering::Release);
        *self.local.write() = None;
        end
    }

    /// Consume the cloud event stream until `shutdown` fires
    pub async fn run_events<C: EventConnector + ?Sized>(
        &self,
        connector: &C,
        handler: &FanoutHandler,
        shutdown: &broadcast::Sender<()>,
    ) {
        let mut shutdown_rx = shutdown.subscribe();
        let mut backoff = Backoff::new(self.reconnect_interval, self.max_reconnect_interval);
        let mut sessions = 0u64;

        loop {
            let connected = tokio::select! {
                connected = connector.connect() => connected,
                _ = shutdown_rx.recv() => break,
            };

            match connected {
                Ok(EventChannels {
                    mut events,
                    cloud_sender: _link,
                }) => {
                    backoff.reset();
                    if sessions > 0 {
                        if let Some(ref m) = self.metrics {
                            m.reconnected();
                        }
                    }
                    sessions += 1;

                    self.ready.store(true, Ordering::Release);
                    info!("Supervisor: event stream running");

                    let result =
                        drive_event_stream(events.as_mut(), handler, shutdown.subscribe()).await;

                    self.ready.store(false, Ordering::Release);

                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }
                    match result {
                        Ok(handled) => warn!("Supervisor: event stream ended after {} events", handled),
                        Err(e) => warn!("Supervisor: event stream failed: {}", e),
                    }
                }
                Err(e) => error!("Supervisor: connect failed: {}", e),
            }

            let delay = backoff.next_delay();
            info!("Supervisor: reconnecting in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("Supervisor: event stream stopped after {} session(s)", sessions);
    }
}

fn session_end(
    first: Result<PumpStats, PumpError>,
    other: Option<Result<PumpStats, PumpError>>,
) -> SessionEnd {
    if let Some(Err(e)) = &other {
        debug!("Supervisor: {}", e);
    }
    match first {
        Err(e) => SessionEnd::Lost(e.to_string()),
        Ok(stats) => SessionEnd::Lost(format!("direction stopped ({:?})", stats)),
    }
}
