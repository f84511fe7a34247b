//! Data models for persistence.
//!
//! Stored values are serialized with bincode.

use bincode::{Decode, Encode};

/// A record waiting to be written; id and time are assigned by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub topic: String,
    pub payload: String,
}

impl NewRecord {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// One bridged message as written to the store
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct StoredRecord {
    /// Monotonic id, also the storage key
    pub id: u64,
    pub topic: String,
    pub payload: String,
    /// Milliseconds since the Unix epoch
    pub created_at_ms: u64,
}

impl StoredRecord {
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.created_at_ms as i64).unwrap_or_default()
    }
}
