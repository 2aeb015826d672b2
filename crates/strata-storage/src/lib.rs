//! Durable backends, write-behind cache, and storage facade for Strata.
//!
//! This crate is the storage half of the Strata player-state store. It
//! persists [`strata_types::Snapshot`] values keyed by
//! `(player, group, mode)` and keeps a bounded in-memory cache in front of
//! the durable backend so the simulation thread never waits on I/O.
//!
//! # Architecture
//!
//! ```text
//! Application
//!     |
//!     +-- get/save ---------> StorageService (facade, per-key write locks)
//!                                 |
//!                                 +-- read-through/write-behind --> PlayerDataCache
//!                                 |       |
//!                                 |       +-- miss / flush --> StorageBackend
//!                                 |
//!                                 +-- interval flusher task --> StorageBackend
//!
//! StorageBackend variants: FileBackend | SqliteBackend | PostgresBackend | MemoryBackend
//! ```
//!
//! # Modules
//!
//! - [`backend`] -- the [`StorageBackend`] contract and its implementations
//! - [`record`] -- the durable [`StorageRecord`] envelope with revisions
//! - [`cache`] -- bounded LRU cache with dirty tracking
//! - [`service`] -- the [`StorageService`] facade the rest of the system uses
//! - [`error`] -- shared error types

pub mod backend;
pub mod cache;
pub mod error;
pub mod record;
pub mod service;

// Re-export primary types for convenience.
pub use backend::{open_backend, HealthStatus, StorageBackend};
pub use backend::{FileBackend, MemoryBackend, PostgresBackend, SqliteBackend};
pub use cache::{CacheStats, PlayerDataCache};
pub use error::StorageError;
pub use record::StorageRecord;
pub use service::StorageService;
