//! Shared type definitions for the Strata player-state store.
//!
//! Strata persists per-player state partitioned by logical group (one
//! inventory/vitals/progression pool per group and game mode). This crate
//! holds the data-only model shared by the storage and sync layers:
//!
//! - [`ids`] -- strongly-typed UUID wrappers ([`PlayerId`], [`ProcessId`])
//! - [`key`] -- cache and lock keys ([`ProfileKey`], [`LockKey`])
//! - [`snapshot`] -- the captured player state ([`Snapshot`]) and its parts
//!
//! Snapshots are immutable values: once captured they never reference live
//! engine objects and can be freely cloned between threads and processes.

pub mod ids;
pub mod key;
pub mod snapshot;

// Re-export primary types for convenience.
pub use ids::{PlayerId, ProcessId};
pub use key::{LockKey, ProfileKey};
pub use snapshot::{GameMode, ItemStack, Progression, Snapshot, StatusEffect, Vitals};
