//! Storage backend trait for the durable sink.
//!
//! The sink only appends; reading recent records is offered for history
//! views built on top of the store.

use async_trait::async_trait;

use super::error::Result;
use super::models::{NewRecord, StoredRecord};

/// Append-only record store
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Append records in order, assigning ids and timestamps
    async fn append(&self, records: Vec<NewRecord>) -> Result<Vec<StoredRecord>>;

    /// Most recent records, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>>;

    /// Number of stored records
    async fn len(&self) -> Result<usize>;

    /// Force pending writes to disk
    async fn flush(&self) -> Result<()>;

    /// Flush and release the store
    async fn close(&self) -> Result<()>;
}
