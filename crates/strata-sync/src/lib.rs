//! Cross-process synchronization for snapshot storage.
//!
//! When several server processes share one durable store, each process's
//! write-behind cache can go stale or collide with another process's
//! writes. This crate keeps the caches coherent:
//!
//! ```text
//!   process A                                    process B
//!  ┌────────────────┐                          ┌────────────────┐
//!  │ SyncCoordinator│── Invalidate(key, rev) ─▶│ SyncCoordinator│
//!  │   │            │   LockRequest/Release    │   │            │
//!  │   ▼            │◀──── Heartbeat(held) ────│   ▼            │
//!  │ StorageService │                          │ StorageService │
//!  └───────┬────────┘      SyncTransport       └───────┬────────┘
//!          └────────────▶ shared durable ◀─────────────┘
//!                            storage
//! ```
//!
//! Messages carry keys and revisions, never snapshots; a receiver that
//! needs the data re-fetches it from durable storage. Conflicts between a
//! dirty local cache entry and a newer remote save resolve through a pure,
//! configurable strategy so all processes converge on the same winner.
//! Transfer locks are leases renewed by heartbeat: a crashed holder's
//! leases lapse on their own.

pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod lock;
pub mod message;
pub mod transport;

pub use conflict::resolve;
pub use coordinator::SyncCoordinator;
pub use error::SyncError;
pub use lock::LeaseTable;
pub use message::{SyncMessage, SyncPayload};
pub use transport::{
    connect_transport, DatabaseTransport, LoopbackTransport, NatsTransport, SyncTransport,
};
