//! Transfer-lock lease table.
//!
//! Each process keeps its own view of who holds which `(player, group)`
//! transfer lock, fed by `LockRequest`, `LockRelease`, and `Heartbeat`
//! messages. Leases expire after the heartbeat timeout: if a holder dies
//! without releasing, its leases lapse and the keys become claimable again.
//! There is no central arbiter; the table is a cache of observed claims.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use strata_types::{LockKey, ProcessId};
use tokio::time::Instant;

/// A single observed lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Lease {
    holder: ProcessId,
    renewed_at: Instant,
}

impl Lease {
    fn live(&self, ttl: Duration) -> bool {
        self.renewed_at.elapsed() < ttl
    }
}

/// Thread-safe table of transfer-lock leases with heartbeat expiry.
#[derive(Debug)]
pub struct LeaseTable {
    leases: Mutex<HashMap<LockKey, Lease>>,
    ttl: Duration,
}

impl LeaseTable {
    /// Create an empty table. `ttl` is the heartbeat timeout: a lease not
    /// renewed within it is treated as abandoned.
    pub fn new(ttl: Duration) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Claim `key` for `holder` if it is free, expired, or already theirs.
    ///
    /// Returns `true` on success. Re-acquiring an own lease renews it.
    pub fn try_acquire(&self, key: &LockKey, holder: ProcessId) -> bool {
        let Ok(mut leases) = self.leases.lock() else {
            return false;
        };
        match leases.get(key) {
            Some(lease) if lease.holder != holder && lease.live(self.ttl) => false,
            _ => {
                leases.insert(
                    key.clone(),
                    Lease {
                        holder,
                        renewed_at: Instant::now(),
                    },
                );
                true
            }
        }
    }

    /// Drop the lease on `key` if `holder` owns it. Returns `true` if a
    /// lease was removed.
    pub fn release(&self, key: &LockKey, holder: ProcessId) -> bool {
        let Ok(mut leases) = self.leases.lock() else {
            return false;
        };
        match leases.get(key) {
            Some(lease) if lease.holder == holder => {
                leases.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Extend every lease `holder` owns among `held`, claiming any of them
    /// that lapsed in the meantime.
    ///
    /// Driven by incoming heartbeats, and by the local heartbeat task for
    /// this process's own leases.
    pub fn renew_all(&self, holder: ProcessId, held: &[LockKey]) {
        let Ok(mut leases) = self.leases.lock() else {
            return;
        };
        for key in held {
            let claimable = leases
                .get(key)
                .is_none_or(|lease| lease.holder == holder || !lease.live(self.ttl));
            if claimable {
                leases.insert(
                    key.clone(),
                    Lease {
                        holder,
                        renewed_at: Instant::now(),
                    },
                );
            }
        }
    }

    /// The live holder of `key`, if any.
    pub fn holder_of(&self, key: &LockKey) -> Option<ProcessId> {
        let Ok(leases) = self.leases.lock() else {
            return None;
        };
        leases
            .get(key)
            .filter(|lease| lease.live(self.ttl))
            .map(|lease| lease.holder)
    }

    /// Whether `holder` currently holds a live lease on `key`.
    pub fn is_held_by(&self, key: &LockKey, holder: ProcessId) -> bool {
        self.holder_of(key) == Some(holder)
    }

    /// All keys currently leased to `holder`.
    pub fn held_by(&self, holder: ProcessId) -> Vec<LockKey> {
        let Ok(leases) = self.leases.lock() else {
            return Vec::new();
        };
        leases
            .iter()
            .filter(|(_, lease)| lease.holder == holder && lease.live(self.ttl))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove lapsed leases. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut leases) = self.leases.lock() else {
            return 0;
        };
        let before = leases.len();
        leases.retain(|_, lease| lease.live(self.ttl));
        before.saturating_sub(leases.len())
    }

    /// Number of live leases in the table.
    pub fn len(&self) -> usize {
        self.leases
            .lock()
            .map(|leases| {
                leases
                    .values()
                    .filter(|lease| lease.live(self.ttl))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Whether the table holds no live leases.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use strata_types::PlayerId;

    use super::*;

    fn key() -> LockKey {
        LockKey {
            player: PlayerId::new(),
            group: "survival_worlds".to_owned(),
        }
    }

    #[tokio::test]
    async fn acquire_is_exclusive_between_holders() {
        let table = LeaseTable::new(Duration::from_secs(30));
        let (a, b) = (ProcessId::new(), ProcessId::new());
        let key = key();

        assert!(table.try_acquire(&key, a));
        assert!(!table.try_acquire(&key, b));
        // Re-acquiring an own lease is a renewal, not a conflict.
        assert!(table.try_acquire(&key, a));
        assert_eq!(table.holder_of(&key), Some(a));
    }

    #[tokio::test]
    async fn release_requires_ownership() {
        let table = LeaseTable::new(Duration::from_secs(30));
        let (a, b) = (ProcessId::new(), ProcessId::new());
        let key = key();

        assert!(table.try_acquire(&key, a));
        assert!(!table.release(&key, b));
        assert_eq!(table.holder_of(&key), Some(a));
        assert!(table.release(&key, a));
        assert!(table.holder_of(&key).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn lease_lapses_only_after_ttl() {
        let table = LeaseTable::new(Duration::from_secs(30));
        let (a, b) = (ProcessId::new(), ProcessId::new());
        let key = key();

        assert!(table.try_acquire(&key, a));

        // Just short of the timeout the lease still blocks others.
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!table.try_acquire(&key, b));

        // Past the timeout the lease is abandoned and claimable.
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(table.holder_of(&key).is_none());
        assert!(table.try_acquire(&key, b));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_renewal_keeps_lease_alive() {
        let table = LeaseTable::new(Duration::from_secs(30));
        let (a, b) = (ProcessId::new(), ProcessId::new());
        let key = key();

        assert!(table.try_acquire(&key, a));
        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(20)).await;
            table.renew_all(a, std::slice::from_ref(&key));
        }

        // 80 seconds elapsed, far past a single TTL, but renewed throughout.
        assert!(!table.try_acquire(&key, b));
        assert_eq!(table.holder_of(&key), Some(a));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_leases() {
        let table = LeaseTable::new(Duration::from_secs(30));
        let a = ProcessId::new();
        let (first, second) = (key(), key());

        assert!(table.try_acquire(&first, a));
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(table.try_acquire(&second, a));
        tokio::time::advance(Duration::from_secs(15)).await;

        // First is 35s old, second 15s old.
        assert_eq!(table.purge_expired(), 1);
        assert!(table.holder_of(&first).is_none());
        assert_eq!(table.holder_of(&second), Some(a));
    }
}
