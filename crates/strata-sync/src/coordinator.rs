//! Cross-process sync coordinator.
//!
//! One coordinator runs per server process, wrapping that process's
//! [`StorageService`]. It has three jobs:
//!
//! 1. **Invalidation**: after a guarded save it broadcasts the key and new
//!    revision so other processes drop stale cached copies. Incoming
//!    invalidations for clean cache entries just evict; for dirty entries
//!    the coordinator re-fetches the durable record and resolves the
//!    conflict (see [`crate::conflict`]).
//! 2. **Transfer locks**: session hand-offs between processes claim a
//!    `(player, group)` lease so only one process writes during the
//!    transfer window.
//! 3. **Liveness**: a heartbeat task renews this process's leases. A
//!    process that dies without releasing stops heartbeating, its leases
//!    lapse after the configured timeout, and the keys become claimable
//!    again. Shutdown deliberately does not release leases; reclamation is
//!    the one path that must also work after a crash.
//!
//! Lock claims are advisory and eventually consistent: two processes that
//! claim the same free key within one propagation window can both believe
//! they won. The save guard plus conflict resolution keeps that window from
//! corrupting data.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use strata_config::SyncConfig;
use strata_storage::StorageService;
use strata_types::{LockKey, ProcessId, ProfileKey, Snapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::conflict;
use crate::error::SyncError;
use crate::lock::LeaseTable;
use crate::message::{SyncMessage, SyncPayload};
use crate::transport::SyncTransport;

/// Delay between local acquisition attempts while a lock is contested.
const ACQUIRE_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Per-process sync coordinator. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct SyncCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    process_id: ProcessId,
    storage: StorageService,
    transport: Option<Arc<dyn SyncTransport>>,
    leases: LeaseTable,
    config: SyncConfig,
    shutdown_tx: watch::Sender<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl SyncCoordinator {
    /// Start a coordinator over `storage` using `transport`.
    ///
    /// When `config.enabled` is false, or when subscribing to the transport
    /// fails, the coordinator degrades to local-only operation: saves and
    /// locks still work within this process, nothing is broadcast, and a
    /// warning is logged. A storage layer that works beats a sync layer
    /// that refuses to start.
    pub async fn start(
        storage: StorageService,
        config: SyncConfig,
        transport: Arc<dyn SyncTransport>,
    ) -> Self {
        let process_id = config.process_id.map_or_else(ProcessId::new, ProcessId::from);
        let leases = LeaseTable::new(Duration::from_secs(config.heartbeat_timeout_secs));
        let (shutdown_tx, _) = watch::channel(false);

        let transport = if config.enabled {
            match transport.subscribe().await {
                Ok(rx) => Some((transport, rx)),
                Err(e) => {
                    tracing::warn!(
                        transport = transport.kind(),
                        error = %e,
                        "Sync transport unavailable; running local-only"
                    );
                    None
                }
            }
        } else {
            None
        };

        let inner = Arc::new(CoordinatorInner {
            process_id,
            storage,
            transport: transport.as_ref().map(|(t, _)| Arc::clone(t)),
            leases,
            config,
            shutdown_tx,
            tasks: StdMutex::new(Vec::new()),
        });

        if let Some((_, mut rx)) = transport {
            let mut handles = Vec::with_capacity(2);

            let receiver = Arc::clone(&inner);
            let mut shutdown = receiver.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        message = rx.recv() => match message {
                            Some(message) => receiver.handle_message(message).await,
                            None => {
                                tracing::warn!("Sync transport stream ended");
                                break;
                            }
                        },
                    }
                }
            }));

            let beater = Arc::clone(&inner);
            let mut shutdown = beater.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                let period = Duration::from_secs(beater.config.heartbeat_interval_secs.max(1));
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // The immediate first tick would heartbeat an empty table.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => beater.beat().await,
                    }
                }
            }));

            if let Ok(mut tasks) = inner.tasks.lock() {
                *tasks = handles;
            }

            tracing::info!(
                process_id = %inner.process_id,
                transport = inner.transport.as_ref().map_or("none", |t| t.kind()),
                "Sync coordinator started"
            );
        }

        Self { inner }
    }

    /// This process's identity on the sync channel.
    pub fn process_id(&self) -> ProcessId {
        self.inner.process_id
    }

    /// Whether cross-process sync is actually active (enabled and the
    /// transport came up).
    pub fn is_active(&self) -> bool {
        self.inner.transport.is_some()
    }

    /// The wrapped storage service.
    pub fn storage(&self) -> &StorageService {
        &self.inner.storage
    }

    /// Save a snapshot, guarded by the transfer lock, and broadcast the
    /// invalidation.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotLockHolder`] if another live process holds
    /// the transfer lock for this key, and [`SyncError::Storage`] if the
    /// save itself fails. Broadcast failures are logged, not returned: the
    /// save is durable either way.
    pub async fn save_owned(
        &self,
        key: &ProfileKey,
        snapshot: Snapshot,
    ) -> Result<u64, SyncError> {
        if self.is_active() {
            let lock_key = key.lock_key();
            if let Some(holder) = self.inner.leases.holder_of(&lock_key) {
                if holder != self.inner.process_id {
                    return Err(SyncError::NotLockHolder {
                        key: lock_key,
                        holder,
                    });
                }
            }
        }

        let revision = self.inner.storage.save_snapshot(key, snapshot).await?;
        self.inner
            .broadcast(SyncPayload::Invalidate {
                key: key.clone(),
                revision,
            })
            .await;
        Ok(revision)
    }

    /// Claim the transfer lock for `key`, waiting up to the configured
    /// timeout for the current holder to release or lapse.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LockTimeout`] if the key stays contested past
    /// `lock_timeout_secs`.
    pub async fn acquire_transfer_lock(&self, key: &LockKey) -> Result<(), SyncError> {
        let timeout = Duration::from_secs(self.inner.config.lock_timeout_secs);
        let started = tokio::time::Instant::now();

        loop {
            if self.inner.leases.try_acquire(key, self.inner.process_id) {
                self.inner
                    .broadcast(SyncPayload::LockRequest { key: key.clone() })
                    .await;
                tracing::debug!(key = %key, "Acquired transfer lock");
                return Ok(());
            }

            if started.elapsed() >= timeout {
                return Err(SyncError::LockTimeout {
                    key: key.clone(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::time::sleep(ACQUIRE_RETRY_INTERVAL).await;
        }
    }

    /// Release the transfer lock for `key` if this process holds it.
    ///
    /// Returns `true` if a lease was actually released.
    pub async fn release_transfer_lock(&self, key: &LockKey) -> bool {
        let released = self.inner.leases.release(key, self.inner.process_id);
        if released {
            self.inner
                .broadcast(SyncPayload::LockRelease { key: key.clone() })
                .await;
            tracing::debug!(key = %key, "Released transfer lock");
        }
        released
    }

    /// Whether this process currently holds the transfer lock for `key`.
    pub fn holds_lock(&self, key: &LockKey) -> bool {
        self.inner.leases.is_held_by(key, self.inner.process_id)
    }

    /// The live holder of the transfer lock for `key`, if any.
    pub fn lock_holder(&self, key: &LockKey) -> Option<ProcessId> {
        self.inner.leases.holder_of(key)
    }

    /// Stop the receiver and heartbeat tasks.
    ///
    /// Held leases are NOT released: other processes reclaim them through
    /// heartbeat expiry, the same path that covers a crashed process.
    pub async fn shutdown(&self) {
        drop(self.inner.shutdown_tx.send(true));
        let handles = self
            .inner
            .tasks
            .lock()
            .map(|mut tasks| tasks.drain(..).collect::<Vec<_>>())
            .unwrap_or_default();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Sync task did not shut down cleanly");
            }
        }
        tracing::info!(process_id = %self.inner.process_id, "Sync coordinator stopped");
    }
}

impl CoordinatorInner {
    /// Publish a payload from this process, logging (not propagating)
    /// transport failures.
    async fn broadcast(&self, payload: SyncPayload) {
        let Some(transport) = &self.transport else {
            return;
        };
        let message = SyncMessage::new(self.process_id, payload);
        if let Err(e) = transport.publish(&message).await {
            tracing::warn!(error = %e, "Failed to broadcast sync message");
        }
    }

    /// Renew own leases and announce them.
    async fn beat(&self) {
        let held = self.leases.held_by(self.process_id);
        self.leases.renew_all(self.process_id, &held);
        self.leases.purge_expired();
        self.broadcast(SyncPayload::Heartbeat { held }).await;
    }

    async fn handle_message(&self, message: SyncMessage) {
        // Some transports echo our own messages back.
        if message.source == self.process_id {
            return;
        }

        match message.payload {
            SyncPayload::Invalidate { key, revision } => {
                if let Err(e) = self.apply_invalidate(&key, revision).await {
                    tracing::warn!(key = %key, error = %e, "Failed to apply invalidation");
                }
            }
            SyncPayload::LockRequest { key } => {
                if self.leases.try_acquire(&key, message.source) {
                    tracing::debug!(key = %key, holder = %message.source, "Observed lock claim");
                } else {
                    tracing::warn!(
                        key = %key,
                        claimant = %message.source,
                        "Contested lock claim ignored; lease already live"
                    );
                }
            }
            SyncPayload::LockRelease { key } => {
                self.leases.release(&key, message.source);
            }
            SyncPayload::Heartbeat { held } => {
                self.leases.renew_all(message.source, &held);
            }
        }
    }

    /// React to a remote save of `key` at `remote_revision`.
    async fn apply_invalidate(
        &self,
        key: &ProfileKey,
        remote_revision: u64,
    ) -> Result<(), SyncError> {
        if !self.storage.is_dirty(key).await {
            // Clean or absent: drop the cached copy, next read re-fetches.
            self.storage.invalidate_cache(key).await;
            return Ok(());
        }

        let local_revision = self.storage.cached_revision(key).await.unwrap_or(0);
        if remote_revision <= local_revision {
            // Our dirty copy is at least as new; it wins when it flushes.
            tracing::debug!(
                key = %key,
                local_revision,
                remote_revision,
                "Ignoring stale invalidation for dirty entry"
            );
            return Ok(());
        }

        // Dirty local state and a newer remote revision: a real conflict.
        let Some(remote) = self.storage.load_durable(key).await? else {
            // Remote record vanished between broadcast and fetch.
            self.storage.invalidate_cache(key).await;
            return Ok(());
        };
        let Some(local) = self.storage.get_record(key).await? else {
            return Ok(());
        };

        let prefer_local = self.leases.is_held_by(&key.lock_key(), self.process_id);
        let merged = conflict::resolve(
            self.config.conflict_strategy,
            &self.config.merge_rules,
            &local.snapshot,
            &remote.snapshot,
            prefer_local,
        );

        tracing::info!(
            key = %key,
            local_revision,
            remote_revision,
            strategy = ?self.config.conflict_strategy,
            "Resolved snapshot conflict"
        );

        let revision = self.storage.save_snapshot(key, merged).await?;
        self.broadcast(SyncPayload::Invalidate {
            key: key.clone(),
            revision,
        })
        .await;
        Ok(())
    }
}

impl std::fmt::Debug for CoordinatorInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorInner")
            .field("process_id", &self.process_id)
            .field("transport", &self.transport.as_ref().map(|t| t.kind()))
            .field("leases", &self.leases)
            .finish_non_exhaustive()
    }
}
