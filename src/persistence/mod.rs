//! Durable Sink
//!
//! Best-effort persistence of bridged messages. [`SinkWriter::persist`]
//! never waits: records go onto a bounded queue (and are dropped with a
//! warning when it is full) while a background task batches them into the
//! [`StorageBackend`]. Write failures are logged and counted, never returned
//! to the caller.
//!
//! Backends:
//! - `FjallBackend` (default) - Local LSM-tree storage

mod backend;
mod error;
mod fjall;
mod models;

pub use backend::StorageBackend;
pub use error::{PersistenceError, Result};
pub use fjall::FjallBackend;
pub use models::{NewRecord, StoredRecord};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::envelope::Envelope;
use crate::metrics::Metrics;

/// `tokio::time::interval` panics on a zero period
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Fire-and-forget writer in front of a storage backend
pub struct SinkWriter {
    backend: Arc<dyn StorageBackend>,
    tx: mpsc::Sender<NewRecord>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    metrics: Option<Arc<Metrics>>,
}

impl SinkWriter {
    /// Create a writer and spawn its background batching task
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        flush_interval: Duration,
        max_batch_size: usize,
        capacity: usize,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(Self::writer_loop(
            backend.clone(),
            rx,
            shutdown_rx,
            flush_interval.max(MIN_FLUSH_INTERVAL),
            max_batch_size.max(1),
            metrics.clone(),
        ));

        Self {
            backend,
            tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
            metrics,
        }
    }

    /// Queue an envelope for storage without waiting
    pub fn persist(&self, envelope: &Envelope) {
        self.persist_record(NewRecord::new(envelope.topic.clone(), envelope.data.clone()));
    }

    /// Queue a record for storage without waiting
    ///
    /// If the queue is full or the writer is gone, the record is dropped.
    pub fn persist_record(&self, record: NewRecord) {
        if let Err(e) = self.tx.try_send(record) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "writer stopped",
            };
            warn!("Durable sink {}, dropping record", reason);
            if let Some(ref m) = self.metrics {
                m.persistence_failed(1);
            }
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Stop the writer, flushing queued records within `grace`
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        info!("Shutting down durable sink");

        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(grace, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Durable sink writer failed: {}", e),
                Err(_) => {
                    warn!("Durable sink writer did not finish within {:?}", grace);
                    return Err(PersistenceError::ShutdownTimeout { grace });
                }
            }
        }

        self.backend.close().await?;
        info!("Durable sink shutdown complete");
        Ok(())
    }

    async fn write_batch(
        backend: &Arc<dyn StorageBackend>,
        batch: &mut Vec<NewRecord>,
        metrics: &Option<Arc<Metrics>>,
        trigger: &str,
    ) {
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        match backend.append(std::mem::take(batch)).await {
            Ok(_) => {
                debug!("Persisted {} records ({})", count, trigger);
                if let Some(m) = metrics {
                    m.records_persisted(count);
                }
            }
            Err(e) => {
                error!("Failed to persist {} records: {}", count, e);
                if let Some(m) = metrics {
                    m.persistence_failed(count);
                }
            }
        }
    }

    /// Background writer loop that batches and commits writes
    async fn writer_loop(
        backend: Arc<dyn StorageBackend>,
        mut rx: mpsc::Receiver<NewRecord>,
        mut shutdown_rx: oneshot::Receiver<()>,
        flush_interval: Duration,
        max_batch_size: usize,
        metrics: Option<Arc<Metrics>>,
    ) {
        let mut batch = Vec::with_capacity(max_batch_size);
        let mut interval = tokio::time::interval(flush_interval);

        loop {
            tokio::select! {
                record = rx.recv() => {
                    match record {
                        Some(record) => {
                            batch.push(record);
                            if batch.len() >= max_batch_size {
                                Self::write_batch(&backend, &mut batch, &metrics, "max batch").await;
                            }
                        }
                        None => {
                            Self::write_batch(&backend, &mut batch, &metrics, "closed").await;
                            break;
                        }
                    }
                }

                _ = interval.tick() => {
                    Self::write_batch(&backend, &mut batch, &metrics, "interval").await;
                }

                _ = &mut shutdown_rx => {
                    // Take whatever is already queued, then stop
                    rx.close();
                    while let Some(record) = rx.recv().await {
                        batch.push(record);
                        if batch.len() >= max_batch_size {
                            Self::write_batch(&backend, &mut batch, &metrics, "shutdown").await;
                        }
                    }
                    Self::write_batch(&backend, &mut batch, &metrics, "shutdown").await;
                    break;
                }
            }
        }

        info!("Durable sink writer exited");
    }
}
