//! Bounded read-through/write-behind cache for snapshot records.
//!
//! The cache minimizes backend round-trips and batches writes. Reads fall
//! through to the backend on a miss; writes only mark the entry dirty --
//! durable persistence happens when [`PlayerDataCache::flush_dirty`] runs
//! (the [`crate::service::StorageService`] flusher calls it on a fixed
//! interval) or when a dirty entry is about to be evicted.
//!
//! # Invariants
//!
//! - At most one entry exists per key within a process.
//! - A `get` immediately after a `put` for the same key observes the
//!   just-written value; the writer has no staleness window.
//! - Entry count never exceeds the configured maximum; the
//!   least-recently-accessed entry is evicted first, and a dirty victim is
//!   flushed before removal -- eviction never loses data.
//! - Clean entries unaccessed past the TTL expire; dirty entries survive
//!   until flushed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use strata_config::CacheConfig;
use strata_types::{ProfileKey, Snapshot};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::record::StorageRecord;

/// One cached record with its bookkeeping.
#[derive(Debug, Clone)]
struct CacheEntry {
    record: StorageRecord,
    dirty: bool,
    last_access: Instant,
}

/// Read-only snapshot of the cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Gets served from the cache.
    pub hits: u64,
    /// Gets that had to consult the backend.
    pub misses: u64,
    /// Backend fetches performed (a miss for an absent key still loads).
    pub loads: u64,
    /// Entries removed by the LRU bound or TTL expiry.
    pub evictions: u64,
    /// Current number of entries.
    pub entries: usize,
    /// Configured maximum number of entries.
    pub capacity: usize,
}

/// Outcome of one write-behind flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Dirty entries persisted this cycle.
    pub flushed: usize,
    /// Dirty entries whose save failed; they stay dirty and retry next
    /// cycle.
    pub failed: usize,
}

/// Bounded LRU cache with dirty tracking in front of a [`StorageBackend`].
pub struct PlayerDataCache {
    backend: Arc<dyn StorageBackend>,
    entries: Mutex<HashMap<ProfileKey, CacheEntry>>,
    max_entries: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

impl PlayerDataCache {
    /// Create a cache in front of `backend` sized by `config`.
    pub fn new(backend: Arc<dyn StorageBackend>, config: &CacheConfig) -> Self {
        Self {
            backend,
            entries: Mutex::new(HashMap::new()),
            max_entries: config.max_entries.max(1),
            ttl: Duration::from_secs(config.ttl_minutes.saturating_mul(60)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get the record for a key, consulting the backend on a miss.
    ///
    /// # Errors
    ///
    /// Propagates backend errors other than the degraded-to-absent cases
    /// handled inside the backend itself.
    pub async fn get(&self, key: &ProfileKey) -> Result<Option<StorageRecord>, StorageError> {
        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(key) {
                if entry.dirty || entry.last_access.elapsed() < self.ttl {
                    entry.last_access = Instant::now();
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.record.clone()));
                }
                // Clean and unaccessed past the TTL.
                entries.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let loaded = self.backend.load(key).await?;
        self.loads.fetch_add(1, Ordering::Relaxed);

        let Some(record) = loaded else {
            return Ok(None);
        };

        let victims = {
            let mut entries = self.entries.lock().await;
            match entries.entry(key.clone()) {
                std::collections::hash_map::Entry::Occupied(mut occupied) => {
                    // Someone wrote this key while we were loading; their
                    // copy wins (writer-sees-own-write guarantee).
                    let entry = occupied.get_mut();
                    entry.last_access = Instant::now();
                    return Ok(Some(entry.record.clone()));
                }
                std::collections::hash_map::Entry::Vacant(vacant) => {
                    vacant.insert(CacheEntry {
                        record: record.clone(),
                        dirty: false,
                        last_access: Instant::now(),
                    });
                }
            }
            self.evict_over_bound(&mut entries, Some(key))
        };
        self.flush_evicted(victims).await;

        Ok(Some(record))
    }

    /// Replace/create the entry for a key and mark it dirty.
    ///
    /// Does not touch the backend synchronously (except to flush a dirty
    /// eviction victim when the bound is exceeded). Returns the new
    /// revision.
    pub async fn put(&self, key: &ProfileKey, snapshot: Snapshot) -> u64 {
        let (revision, victims) = {
            let mut entries = self.entries.lock().await;
            let record = match entries.get(key) {
                Some(entry) => StorageRecord::next(snapshot, entry.record.revision),
                None => StorageRecord::first(snapshot),
            };
            let revision = record.revision;
            entries.insert(
                key.clone(),
                CacheEntry {
                    record,
                    dirty: true,
                    last_access: Instant::now(),
                },
            );
            (revision, self.evict_over_bound(&mut entries, Some(key)))
        };
        self.flush_evicted(victims).await;
        revision
    }

    /// Drop the entry for a key without flushing.
    ///
    /// Used when another process announces it now owns fresher data.
    /// Returns `true` if an entry existed.
    pub async fn invalidate(&self, key: &ProfileKey) -> bool {
        self.entries.lock().await.remove(key).is_some()
    }

    /// Flush dirty entries first, then drop everything.
    ///
    /// Returns the number of entries dropped.
    pub async fn clear(&self) -> usize {
        self.flush_dirty().await;
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        entries.clear();
        count
    }

    /// Persist every dirty entry, then expire clean entries past the TTL.
    ///
    /// A failed save leaves the entry dirty for the next cycle. A save that
    /// races with a newer `put` does not clear the newer entry's dirty flag.
    pub async fn flush_dirty(&self) -> FlushOutcome {
        let dirty: Vec<(ProfileKey, StorageRecord)> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter(|(_, entry)| entry.dirty)
                .map(|(key, entry)| (key.clone(), entry.record.clone()))
                .collect()
        };

        let mut outcome = FlushOutcome::default();
        for (key, record) in dirty {
            match self.backend.save(&key, &record).await {
                Ok(()) => {
                    let mut entries = self.entries.lock().await;
                    if let Some(entry) = entries.get_mut(&key) {
                        if entry.record.revision == record.revision {
                            entry.dirty = false;
                        }
                    }
                    outcome.flushed = outcome.flushed.saturating_add(1);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Flush failed; will retry next cycle");
                    outcome.failed = outcome.failed.saturating_add(1);
                }
            }
        }

        self.expire_clean().await;
        outcome
    }

    /// Persist one key's entry now if it is dirty.
    ///
    /// Used by the service when write-behind is disabled and on shutdown
    /// paths that must not wait for the next flush cycle. Returns `true`
    /// if a dirty entry was persisted.
    ///
    /// # Errors
    ///
    /// Propagates the backend save failure; the entry stays dirty.
    pub async fn flush_key(&self, key: &ProfileKey) -> Result<bool, StorageError> {
        let record = {
            let entries = self.entries.lock().await;
            match entries.get(key) {
                Some(entry) if entry.dirty => entry.record.clone(),
                _ => return Ok(false),
            }
        };

        self.backend.save(key, &record).await?;

        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            if entry.record.revision == record.revision {
                entry.dirty = false;
            }
        }
        Ok(true)
    }

    /// Whether the entry for a key exists and is dirty.
    pub async fn is_dirty(&self, key: &ProfileKey) -> bool {
        self.entries
            .lock()
            .await
            .get(key)
            .is_some_and(|entry| entry.dirty)
    }

    /// The cached revision for a key, if present.
    pub async fn cached_revision(&self, key: &ProfileKey) -> Option<u64> {
        self.entries
            .lock()
            .await
            .get(key)
            .map(|entry| entry.record.revision)
    }

    /// Current number of entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Read the running counters.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.lock().await.len(),
            capacity: self.max_entries,
        }
    }

    /// Remove least-recently-accessed entries beyond the bound.
    ///
    /// `protect` is never selected (the key that triggered enforcement).
    /// Dirty victims are returned so the caller can flush them after the
    /// lock is released.
    fn evict_over_bound(
        &self,
        entries: &mut HashMap<ProfileKey, CacheEntry>,
        protect: Option<&ProfileKey>,
    ) -> Vec<(ProfileKey, StorageRecord)> {
        let mut dirty_victims = Vec::new();

        while entries.len() > self.max_entries {
            let victim = entries
                .iter()
                .filter(|(key, _)| protect != Some(*key))
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());

            let Some(victim) = victim else { break };
            if let Some(entry) = entries.remove(&victim) {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                if entry.dirty {
                    dirty_victims.push((victim, entry.record));
                }
            }
        }

        dirty_victims
    }

    /// Persist records evicted while dirty; reinsert on failure so nothing
    /// is lost.
    async fn flush_evicted(&self, victims: Vec<(ProfileKey, StorageRecord)>) {
        for (key, record) in victims {
            if let Err(e) = self.backend.save(&key, &record).await {
                tracing::warn!(key = %key, error = %e, "Eviction flush failed; keeping entry dirty");
                let mut entries = self.entries.lock().await;
                entries.entry(key).or_insert(CacheEntry {
                    record,
                    dirty: true,
                    last_access: Instant::now(),
                });
            } else {
                tracing::debug!(key = %key, "Flushed dirty entry before eviction");
            }
        }
    }

    /// Drop clean entries unaccessed past the TTL.
    async fn expire_clean(&self) {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.dirty || entry.last_access.elapsed() < self.ttl);
        let expired = before.saturating_sub(entries.len());
        if expired > 0 {
            self.evictions
                .fetch_add(u64::try_from(expired).unwrap_or(0), Ordering::Relaxed);
            tracing::debug!(expired, "Expired unaccessed cache entries");
        }
    }
}

impl core::fmt::Debug for PlayerDataCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PlayerDataCache")
            .field("backend", &self.backend.name())
            .field("max_entries", &self.max_entries)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
