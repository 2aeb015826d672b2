//! The [`StorageService`] facade: the single storage API the rest of the
//! system uses.
//!
//! Composes a [`PlayerDataCache`] and a [`StorageBackend`], owns the
//! interval write-behind flusher task, serializes concurrent saves per key,
//! and exposes the administrative surface (stats, health, invalidation).
//!
//! Per-key mutexes guarantee at-most-one-in-flight-write-per-key within a
//! process; cross-process exclusivity is the sync coordinator's job, built
//! on top of this service.
//!
//! # Shutdown
//!
//! [`StorageService::shutdown`] stops the flush scheduler and synchronously
//! flushes all remaining dirty entries before returning. In-flight backend
//! calls are allowed to complete rather than being aborted, so a shutdown
//! never tears a write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use strata_config::CacheConfig;
use strata_types::{ProfileKey, Snapshot};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::backend::{HealthStatus, StorageBackend};
use crate::cache::{CacheStats, PlayerDataCache};
use crate::error::StorageError;
use crate::record::StorageRecord;

/// Facade unifying cache and backend. Cheap to clone.
#[derive(Clone)]
pub struct StorageService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    backend: Arc<dyn StorageBackend>,
    cache: PlayerDataCache,
    write_behind: bool,
    /// Per-key save locks. Entries are never removed; the map is bounded
    /// by the number of distinct keys a process ever writes.
    key_locks: Mutex<HashMap<ProfileKey, Arc<Mutex<()>>>>,
    shutdown_tx: watch::Sender<bool>,
    flusher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StorageService {
    /// Create the service and start its write-behind flusher task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(backend: Arc<dyn StorageBackend>, config: &CacheConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let service = Self {
            inner: Arc::new(ServiceInner {
                cache: PlayerDataCache::new(Arc::clone(&backend), config),
                backend,
                write_behind: config.write_behind,
                key_locks: Mutex::new(HashMap::new()),
                shutdown_tx,
                flusher: std::sync::Mutex::new(None),
            }),
        };

        let handle = tokio::spawn(run_flusher(
            Arc::clone(&service.inner),
            Duration::from_secs(config.flush_interval_secs.max(1)),
            shutdown_rx,
        ));
        if let Ok(mut slot) = service.inner.flusher.lock() {
            *slot = Some(handle);
        }

        tracing::info!(
            backend = service.inner.backend.name(),
            write_behind = config.write_behind,
            flush_interval_secs = config.flush_interval_secs,
            "Storage service started"
        );
        service
    }

    // =========================================================================
    // Snapshot access
    // =========================================================================

    /// Get the snapshot for a key, or `None` if no record exists.
    ///
    /// # Errors
    ///
    /// Propagates backend errors; absence and degraded reads are `Ok(None)`.
    pub async fn get_snapshot(&self, key: &ProfileKey) -> Result<Option<Snapshot>, StorageError> {
        Ok(self
            .inner
            .cache
            .get(key)
            .await?
            .map(|record| record.snapshot))
    }

    /// Get the full record (snapshot plus revision) for a key.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub async fn get_record(
        &self,
        key: &ProfileKey,
    ) -> Result<Option<StorageRecord>, StorageError> {
        self.inner.cache.get(key).await
    }

    /// Read the durable record for a key, bypassing the cache.
    ///
    /// The sync coordinator uses this to re-fetch a peer's write during
    /// conflict resolution; normal callers should use
    /// [`StorageService::get_snapshot`].
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub async fn load_durable(
        &self,
        key: &ProfileKey,
    ) -> Result<Option<StorageRecord>, StorageError> {
        self.inner.backend.load(key).await
    }

    /// Save a snapshot for a key, returning the new revision.
    ///
    /// Concurrent saves for the same key are serialized by a per-key mutex,
    /// so two saves never interleave partial writes. With write-behind
    /// enabled the durable write happens on the next flush cycle; with it
    /// disabled the record is flushed to the backend before this returns.
    ///
    /// # Errors
    ///
    /// With write-behind disabled, propagates the synchronous flush
    /// failure (the entry stays dirty and the flusher still retries it).
    pub async fn save_snapshot(
        &self,
        key: &ProfileKey,
        snapshot: Snapshot,
    ) -> Result<u64, StorageError> {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        let revision = self.inner.cache.put(key, snapshot).await;

        if !self.inner.write_behind {
            self.inner.cache.flush_key(key).await?;
        }

        Ok(revision)
    }

    /// Delete a key's record everywhere: cache entry and durable record.
    ///
    /// # Errors
    ///
    /// Propagates the backend delete failure.
    pub async fn delete_snapshot(&self, key: &ProfileKey) -> Result<bool, StorageError> {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        self.inner.cache.invalidate(key).await;
        self.inner.backend.delete(key).await
    }

    // =========================================================================
    // Administrative surface
    // =========================================================================

    /// Drop the cache entry for a key without flushing.
    ///
    /// Returns `true` if an entry existed.
    pub async fn invalidate_cache(&self, key: &ProfileKey) -> bool {
        self.inner.cache.invalidate(key).await
    }

    /// Flush dirty entries, then drop every cache entry.
    ///
    /// Returns the number of entries dropped.
    pub async fn clear_cache(&self) -> usize {
        self.inner.cache.clear().await
    }

    /// Whether the backend currently answers its health probe.
    pub async fn is_healthy(&self) -> bool {
        self.health().await.is_healthy()
    }

    /// Probe the backend.
    pub async fn health(&self) -> HealthStatus {
        self.inner.backend.health_check().await
    }

    /// Number of records in durable storage.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub async fn entry_count(&self) -> Result<u64, StorageError> {
        self.inner.backend.entry_count().await
    }

    /// Approximate durable storage size in bytes.
    ///
    /// Returns `-1` when the backend cannot estimate its size or the probe
    /// fails; callers must treat negative values as "unknown", not zero.
    pub async fn storage_size(&self) -> i64 {
        match self.inner.backend.approximate_size_bytes().await {
            Ok(size) => size,
            Err(e) => {
                tracing::warn!(error = %e, "Storage size probe failed");
                -1
            }
        }
    }

    /// List every key in durable storage.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    pub async fn all_keys(&self) -> Result<Vec<ProfileKey>, StorageError> {
        self.inner.backend.list_keys().await
    }

    /// Read the cache counters.
    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    // =========================================================================
    // Sync-layer hooks
    // =========================================================================

    /// Whether the cache entry for a key exists and is unflushed.
    pub async fn is_dirty(&self, key: &ProfileKey) -> bool {
        self.inner.cache.is_dirty(key).await
    }

    /// The cached revision for a key, if an entry exists.
    pub async fn cached_revision(&self, key: &ProfileKey) -> Option<u64> {
        self.inner.cache.cached_revision(key).await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop the flush scheduler and flush all remaining dirty entries.
    ///
    /// Idempotent. In-flight backend calls complete before this returns.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);

        let handle = self
            .inner
            .flusher
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Flusher task did not stop cleanly");
            }
        }

        let outcome = self.inner.cache.flush_dirty().await;
        if outcome.failed > 0 {
            tracing::error!(
                failed = outcome.failed,
                "Dirty entries could not be flushed during shutdown"
            );
        } else {
            tracing::info!(flushed = outcome.flushed, "Storage service shut down");
        }
    }

    /// Get (or create) the save lock for a key.
    async fn key_lock(&self, key: &ProfileKey) -> Arc<Mutex<()>> {
        let mut locks = self.inner.key_locks.lock().await;
        Arc::clone(
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

impl core::fmt::Debug for StorageService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StorageService")
            .field("backend", &self.inner.backend.name())
            .field("write_behind", &self.inner.write_behind)
            .finish_non_exhaustive()
    }
}

/// The interval flush loop. Runs until shutdown is signalled.
async fn run_flusher(
    inner: Arc<ServiceInner>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; skip it so a fresh service does not
    // flush an empty cache.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = inner.cache.flush_dirty().await;
                if outcome.flushed > 0 || outcome.failed > 0 {
                    tracing::debug!(
                        flushed = outcome.flushed,
                        failed = outcome.failed,
                        "Write-behind flush cycle"
                    );
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use strata_types::{GameMode, PlayerId};

    use crate::backend::MemoryBackend;

    use super::*;

    fn config(write_behind: bool, flush_interval_secs: u64) -> CacheConfig {
        CacheConfig {
            write_behind,
            max_entries: 100,
            ttl_minutes: 30,
            flush_interval_secs,
        }
    }

    fn key() -> ProfileKey {
        ProfileKey::new(PlayerId::new(), "hub", GameMode::Survival)
    }

    fn snapshot(key: &ProfileKey, level: u32) -> Snapshot {
        let mut snapshot = Snapshot::empty(key.player, "Tester", &key.group, key.mode);
        snapshot.progression.level = level;
        snapshot
    }

    #[tokio::test]
    async fn save_then_get_roundtrip() {
        let backend = Arc::new(MemoryBackend::new());
        let service = StorageService::start(backend, &config(true, 3600));
        let k = key();

        service.save_snapshot(&k, snapshot(&k, 7)).await.ok();
        let got = service.get_snapshot(&k).await.ok().flatten();
        assert_eq!(got.map(|s| s.progression.level), Some(7));

        service.shutdown().await;
    }

    #[tokio::test]
    async fn synchronous_mode_flushes_immediately() {
        let backend = Arc::new(MemoryBackend::new());
        let service =
            StorageService::start(Arc::clone(&backend) as Arc<dyn StorageBackend>, &config(false, 3600));
        let k = key();

        service.save_snapshot(&k, snapshot(&k, 3)).await.ok();

        // Durable without waiting for any flush cycle.
        let durable = backend.load(&k).await.ok().flatten();
        assert_eq!(durable.map(|r| r.snapshot.progression.level), Some(3));
        assert!(!service.is_dirty(&k).await);

        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn write_behind_flushes_within_one_interval() {
        let backend = Arc::new(MemoryBackend::new());
        let service =
            StorageService::start(Arc::clone(&backend) as Arc<dyn StorageBackend>, &config(true, 30));
        let k = key();

        service.save_snapshot(&k, snapshot(&k, 1)).await.ok();
        assert!(
            backend.load(&k).await.ok().flatten().is_none(),
            "write-behind must not touch the backend synchronously"
        );

        // One interval later the entry is durable.
        tokio::time::sleep(Duration::from_secs(31)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        assert!(backend.load(&k).await.ok().flatten().is_some());
        assert!(!service.is_dirty(&k).await);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_saves_serialize_per_key() {
        let backend = Arc::new(MemoryBackend::new());
        let service =
            StorageService::start(Arc::clone(&backend) as Arc<dyn StorageBackend>, &config(true, 3600));
        let k = key();

        let mut handles = Vec::new();
        for level in 0..16u32 {
            let service = service.clone();
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                service.save_snapshot(&k, snapshot(&k, level)).await
            }));
        }

        let mut revisions = Vec::new();
        for handle in handles {
            if let Ok(Ok(revision)) = handle.await {
                revisions.push(revision);
            }
        }
        assert_eq!(revisions.len(), 16);

        // Every save produced a distinct revision.
        let mut sorted = revisions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 16, "revisions must never collide");

        service.shutdown().await;

        // The backend holds exactly the cache's final record -- one of the
        // submitted snapshots, not an interleaving.
        let durable = backend.load(&k).await.ok().flatten();
        let cached = service.get_record(&k).await.ok().flatten();
        assert_eq!(durable, cached);
    }

    #[tokio::test]
    async fn shutdown_flushes_dirty_entries() {
        let backend = Arc::new(MemoryBackend::new());
        let service =
            StorageService::start(Arc::clone(&backend) as Arc<dyn StorageBackend>, &config(true, 3600));
        let k = key();

        service.save_snapshot(&k, snapshot(&k, 9)).await.ok();
        assert!(backend.load(&k).await.ok().flatten().is_none());

        service.shutdown().await;

        let durable = backend.load(&k).await.ok().flatten();
        assert_eq!(durable.map(|r| r.snapshot.progression.level), Some(9));
    }

    #[tokio::test]
    async fn admin_surface_reports_unknown_size() {
        let backend = Arc::new(MemoryBackend::new());
        let service = StorageService::start(backend, &config(true, 3600));

        assert_eq!(service.storage_size().await, -1);
        assert!(service.is_healthy().await);
        assert_eq!(service.entry_count().await.ok(), Some(0));

        let k = key();
        service.save_snapshot(&k, snapshot(&k, 1)).await.ok();
        assert_eq!(service.clear_cache().await, 1);
        assert_eq!(service.entry_count().await.ok(), Some(1));

        service.shutdown().await;
    }

    #[tokio::test]
    async fn delete_removes_cache_and_durable_record() {
        let backend = Arc::new(MemoryBackend::new());
        let service =
            StorageService::start(Arc::clone(&backend) as Arc<dyn StorageBackend>, &config(false, 3600));
        let k = key();

        service.save_snapshot(&k, snapshot(&k, 2)).await.ok();
        assert_eq!(service.delete_snapshot(&k).await.ok(), Some(true));
        assert!(service.get_snapshot(&k).await.ok().flatten().is_none());
        assert!(backend.load(&k).await.ok().flatten().is_none());

        service.shutdown().await;
    }
}
