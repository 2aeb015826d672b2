//! Error types for the sync layer.

use strata_types::{LockKey, ProcessId};

/// Errors produced by transports, conflict handling, and transfer locks.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The transport could not publish or subscribe.
    #[error("transport error: {0}")]
    Transport(String),

    /// A storage operation performed on behalf of sync failed.
    #[error("storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),

    /// A sync message could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A database transport query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A transfer lock could not be acquired before the deadline.
    #[error("transfer lock for {key} not acquired after {waited_secs}s")]
    LockTimeout {
        /// The contested lock key.
        key: LockKey,
        /// How long this process waited before giving up.
        waited_secs: u64,
    },

    /// A guarded save was attempted while another process holds the lock.
    #[error("process {holder} holds the transfer lock for {key}")]
    NotLockHolder {
        /// The contested lock key.
        key: LockKey,
        /// The process currently holding the lease.
        holder: ProcessId,
    },
}
