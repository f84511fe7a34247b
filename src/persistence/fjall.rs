//! Fjall-based storage backend implementation.
//!
//! Records live in the `messages` partition keyed by their big-endian id,
//! so key order is insertion order.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use tracing::info;

use super::backend::StorageBackend;
use super::error::{PersistenceError, Result};
use super::models::{NewRecord, StoredRecord};

/// Fjall-based storage backend
pub struct FjallBackend {
    keyspace: Keyspace,
    messages: PartitionHandle,
    next_id: AtomicU64,
}

impl FjallBackend {
    /// Open a fjall backend at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let keyspace = Config::new(path).open()?;
        let messages = keyspace.open_partition("messages", PartitionCreateOptions::default())?;

        // Ids continue after the last stored record
        let next_id = match messages.last_key_value()? {
            Some((key, _)) => Self::decode_key(&key)? + 1,
            None => 1,
        };
        info!("Durable sink opened, next record id {}", next_id);

        Ok(Self {
            keyspace,
            messages,
            next_id: AtomicU64::new(next_id),
        })
    }

    fn decode_key(key: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| PersistenceError::BadKey { len: key.len() })?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Serialize a value using bincode
    fn serialize<T: bincode::Encode>(value: &T) -> Result<Vec<u8>> {
        bincode::encode_to_vec(value, bincode::config::standard()).map_err(PersistenceError::from)
    }

    /// Deserialize a value using bincode
    fn deserialize<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map(|(value, _)| value)
            .map_err(PersistenceError::from)
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl StorageBackend for FjallBackend {
    async fn append(&self, records: Vec<NewRecord>) -> Result<Vec<StoredRecord>> {
        let mut batch = self.keyspace.batch();
        let mut stored = Vec::with_capacity(records.len());
        let created_at_ms = Self::now_ms();

        for record in records {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let row = StoredRecord {
                id,
                topic: record.topic,
                payload: record.payload,
                created_at_ms,
            };
            batch.insert(&self.messages, id.to_be_bytes().to_vec(), Self::serialize(&row)?);
            stored.push(row);
        }

        batch.commit()?;
        Ok(stored)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>> {
        let mut result = Vec::with_capacity(limit.min(1024));
        for item in self.messages.iter().rev().take(limit) {
            let (_, value) = item?;
            result.push(Self::deserialize(&value)?);
        }
        Ok(result)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.messages.len()?)
    }

    async fn flush(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.flush().await
    }
}
