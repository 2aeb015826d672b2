//! Error types for the storage layer.
//!
//! All errors are propagated via [`StorageError`], which wraps the
//! underlying [`sqlx`] and I/O errors. Backends deliberately do not surface
//! load-time corruption or transient read failures as errors -- those
//! degrade to "absent" with a log line (see the [`crate::backend`] contract);
//! save failures do propagate so the write-behind flusher can retry them.

/// Errors that can occur in the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A `SQLite` or `PostgreSQL` operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unrecoverable backend misconfiguration detected at startup.
    #[error("configuration error: {0}")]
    Config(String),
}
