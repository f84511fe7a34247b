//! Durable sink errors

use std::fmt;
use std::time::Duration;

/// Failure inside the sink writer or a storage backend
#[derive(Debug)]
pub enum PersistenceError {
    Io(std::io::Error),
    /// Record could not be encoded for storage
    Encode(String),
    /// Stored bytes could not be decoded into a record
    Decode(String),
    /// Backend rejected the operation
    Storage(String),
    /// A record key is not an 8-byte big-endian id
    BadKey { len: usize },
    /// Queued records were still being written when the grace period ran out
    ShutdownTimeout { grace: Duration },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Encode(e) => write!(f, "record encode error: {}", e),
            Self::Decode(e) => write!(f, "record decode error: {}", e),
            Self::Storage(e) => write!(f, "storage error: {}", e),
            Self::BadKey { len } => write!(f, "record key has {} bytes, expected 8", len),
            Self::ShutdownTimeout { grace } => {
                write!(f, "sink writer still busy after {:?}", grace)
            }
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<fjall::Error> for PersistenceError {
    fn from(err: fjall::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for PersistenceError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for PersistenceError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
