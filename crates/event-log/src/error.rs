use thiserror::Error;

use crate::record::ExpectedRevision;

/// Errors returned by event log backends.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// The optimistic concurrency guard did not match the stream's last revision.
    #[error("concurrency conflict on {stream}: expected {expected}, actual {actual:?}")]
    ConcurrencyConflict {
        stream: String,
        expected: ExpectedRevision,
        actual: Option<u64>,
    },

    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("append failed: {0}")]
    Append(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EventLogError {
    pub fn conflict(stream: &str, expected: ExpectedRevision, actual: Option<u64>) -> Self {
        Self::ConcurrencyConflict {
            stream: stream.to_string(),
            expected,
            actual,
        }
    }

    /// Errors worth retrying after a backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Read(_) | Self::Subscribe(_) | Self::Database(_))
    }
}
