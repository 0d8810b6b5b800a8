//! Error types for chansync requests.

use thiserror::Error;

/// Errors that can occur while processing a single request.
///
/// Every variant is scoped to the request that produced it; none of them
/// is fatal to the server process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The request carries no record type.
    #[error("request lacks a record type")]
    MissingType,

    /// An update or delete was issued without a record id.
    #[error("request lacks a record id")]
    MissingId,

    /// The targeted record does not exist.
    #[error("record not found: {key}")]
    NotFound {
        /// Storage key that was looked up.
        key: String,
    },

    /// The operation name is not one of the recognized methods.
    #[error("unknown method: {0:?}")]
    UnknownMethod(String),

    /// The underlying store or broker call failed.
    #[error("store error: {0}")]
    Store(String),

    /// No store reply arrived within the configured bound.
    #[error("store operation timed out")]
    Timeout,

    /// The inbound envelope could not be decoded or is malformed.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// A schema hook halted the chain.
    #[error("aborted by hook: {0}")]
    Aborted(String),

    /// The connection or server exceeded its request quota.
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
}

impl SyncError {
    /// Stable machine-readable name sent to clients in error replies.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::MissingType => "missing_type",
            SyncError::MissingId => "missing_id",
            SyncError::NotFound { .. } => "not_found",
            SyncError::UnknownMethod(_) => "unknown_method",
            SyncError::Store(_) => "store_error",
            SyncError::Timeout => "timeout",
            SyncError::InvalidPacket(_) => "invalid_packet",
            SyncError::Aborted(_) => "aborted",
            SyncError::RateLimited(_) => "rate_limited",
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::InvalidPacket(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::NotFound {
            key: "todo:1".into(),
        };
        assert_eq!(err.to_string(), "record not found: todo:1");

        let err = SyncError::UnknownMethod("explode".into());
        assert_eq!(err.to_string(), "unknown method: \"explode\"");
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(SyncError::MissingType.kind(), "missing_type");
        assert_eq!(SyncError::MissingId.kind(), "missing_id");
        assert_eq!(SyncError::Timeout.kind(), "timeout");
        assert_eq!(SyncError::Store("boom".into()).kind(), "store_error");
    }

    #[test]
    fn json_errors_become_invalid_packet() {
        let err: SyncError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "invalid_packet");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
