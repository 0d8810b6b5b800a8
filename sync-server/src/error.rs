//! Error types for chansync-server.
//!
//! Process-level failures ([`ServerError`]) stay inside the server. Anything
//! that fails while serving a single request is converted into a
//! [`SyncError`] and reported to that request's caller only.

use std::path::PathBuf;

use sync_core::SortError;
use sync_types::SyncError;

/// Main error type for chansync-server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Broker error.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Redis command error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored value has an unexpected shape.
    #[error("corrupt value at {key}")]
    Corrupt {
        /// Key holding the value.
        key: String,
    },

    /// Sort evaluation failed.
    #[error("sort failed: {0}")]
    Sort(#[from] SortError),

    /// Failure injected by a test double.
    #[error("injected failure: {0}")]
    Injected(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Pub/sub broker errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker connection is gone.
    #[error("broker closed")]
    Closed,

    /// The broker refused the command.
    #[error("broker rejected command: {0}")]
    Rejected(String),

    /// Redis connection or command error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        SyncError::Store(err.to_string())
    }
}

impl From<BrokerError> for SyncError {
    fn from(err: BrokerError) -> Self {
        SyncError::Store(err.to_string())
    }
}

/// Result type alias for process-level operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for broker operations.
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_surface_as_store_kind() {
        let err: SyncError = StorageError::Injected("disk on fire".into()).into();
        assert_eq!(err.kind(), "store_error");
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn server_errors_name_their_source() {
        let err: ServerError = StorageError::Injected("disk on fire".into()).into();
        assert_eq!(err.to_string(), "storage error: injected failure: disk on fire");

        let err: ServerError = BrokerError::Closed.into();
        assert_eq!(err.to_string(), "broker error: broker closed");
    }

    #[test]
    fn broker_errors_surface_as_store_kind() {
        let err: SyncError = BrokerError::Closed.into();
        assert_eq!(err.kind(), "store_error");
    }
}
