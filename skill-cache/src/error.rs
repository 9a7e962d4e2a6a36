//! Error types for cache operations
//!
//! Storage failures are split by what a caller can do about them: busy errors
//! are transient and worth retrying, corruption and other storage errors are
//! not.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backing store cannot be created, opened or queried
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Another writer held the database lock past the busy timeout
    #[error("Storage busy: {0}")]
    StorageBusyError(String),

    /// Database file is damaged or is not a database
    #[error("Cache database corrupt: {0}")]
    CorruptError(String),

    /// Invalid configuration or arguments
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Value could not be serialized for storage
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Filesystem error (cache directory, permissions)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Classify a SQLite error, prefixing the message with `context`.
    pub(crate) fn from_sqlite(context: &str, err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                CacheError::StorageBusyError(format!("{}: {}", context, err))
            }
            Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase) => {
                CacheError::CorruptError(format!("{}: {}", context, err))
            }
            _ => CacheError::StorageError(format!("{}: {}", context, err)),
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::StorageBusyError(_))
    }

    /// Whether the error indicates a damaged database file
    pub fn is_corruption(&self) -> bool {
        matches!(self, CacheError::CorruptError(_))
    }
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::from_sqlite("sqlite", err)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

impl From<String> for CacheError {
    fn from(s: String) -> Self {
        CacheError::Other(s)
    }
}

impl From<&str> for CacheError {
    fn from(s: &str) -> Self {
        CacheError::Other(s.to_string())
    }
}
