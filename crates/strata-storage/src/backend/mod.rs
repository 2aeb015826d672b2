//! The [`StorageBackend`] contract and its implementations.
//!
//! A backend is the durable home of [`StorageRecord`] values. The set of
//! variants is closed and chosen once at startup via [`open_backend`]; it is
//! never switched at runtime.
//!
//! | Variant | Durability | Concurrent writers |
//! |---------|------------|--------------------|
//! | [`FileBackend`] | one JSON file per key | process-local only |
//! | [`SqliteBackend`] | single local DB file | process-local only |
//! | [`PostgresBackend`] | networked database | safe (row-level serialization) |
//! | [`MemoryBackend`] | none | process-local only |
//!
//! # Failure policy
//!
//! - `load`: a corrupt record or a transient read failure degrades to
//!   `Ok(None)` with a warning -- the caller treats absence as "use
//!   defaults". Loads only error on genuine programming mistakes.
//! - `save`/`delete`: errors propagate; the write-behind flusher retries on
//!   its next cycle.
//! - `health_check`: never errors; reports [`HealthStatus::Unhealthy`] with
//!   a reason instead.
//!
//! All operations may block on I/O and must be called off any
//! latency-sensitive thread.

use std::sync::Arc;

use async_trait::async_trait;
use strata_config::{BackendKind, StorageConfig};
use strata_types::ProfileKey;

use crate::error::StorageError;
use crate::record::StorageRecord;

mod file;
mod memory;
mod postgres;
mod sqlite;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

/// Result of a backend health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The backend answered the probe.
    Healthy,
    /// The backend failed the probe; the service reports itself degraded.
    Unhealthy(String),
}

impl HealthStatus {
    /// Whether the probe succeeded.
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Durable read/write of snapshot records, implemented identically by all
/// variants.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Load the record for a key, or `None` if absent (or unreadable --
    /// see the module-level failure policy).
    async fn load(&self, key: &ProfileKey) -> Result<Option<StorageRecord>, StorageError>;

    /// Durably write the whole record for a key, replacing any previous one.
    async fn save(&self, key: &ProfileKey, record: &StorageRecord) -> Result<(), StorageError>;

    /// Delete the record for a key. Returns `true` if a record existed.
    async fn delete(&self, key: &ProfileKey) -> Result<bool, StorageError>;

    /// List every key currently stored.
    async fn list_keys(&self) -> Result<Vec<ProfileKey>, StorageError>;

    /// Number of records currently stored.
    async fn entry_count(&self) -> Result<u64, StorageError>;

    /// Approximate total size of stored data in bytes, or `-1` when the
    /// backend cannot estimate it. Callers must treat negative values as
    /// "unknown", never as zero.
    async fn approximate_size_bytes(&self) -> Result<i64, StorageError>;

    /// Probe the backend.
    async fn health_check(&self) -> HealthStatus;
}

/// Open the backend selected by the configuration.
///
/// This is the only place a backend variant is chosen. Failing to open the
/// configured target (bad path, unreachable database) is the one fatal
/// error class in the storage layer -- everything after startup degrades
/// instead of failing.
///
/// # Errors
///
/// Returns [`StorageError`] if the configured target cannot be opened.
pub async fn open_backend(
    config: &StorageConfig,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let backend: Arc<dyn StorageBackend> = match config.backend {
        BackendKind::File => Arc::new(FileBackend::open(&config.data_dir).await?),
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(&config.sqlite_path).await?),
        BackendKind::Postgres => Arc::new(PostgresBackend::connect(&config.postgres).await?),
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
    };
    tracing::info!(backend = backend.name(), "Opened storage backend");
    Ok(backend)
}
