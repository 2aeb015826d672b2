//! Simulated-cluster tests: several coordinators sharing one durable
//! store and one loopback transport, standing in for server processes
//! sharing a database and a broker.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::items_after_statements,
    clippy::missing_panics_doc,
    clippy::too_many_lines
)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use strata_config::{CacheConfig, ConflictStrategy, SyncConfig};
use strata_storage::{MemoryBackend, StorageBackend, StorageService};
use strata_sync::{LoopbackTransport, SyncCoordinator, SyncError};
use strata_types::{GameMode, PlayerId, ProfileKey, Snapshot};

fn cache_config(write_behind: bool) -> CacheConfig {
    CacheConfig {
        write_behind,
        max_entries: 100,
        ttl_minutes: 30,
        flush_interval_secs: 3600,
    }
}

fn sync_config() -> SyncConfig {
    SyncConfig {
        enabled: true,
        lock_timeout_secs: 1,
        heartbeat_interval_secs: 5,
        heartbeat_timeout_secs: 30,
        ..SyncConfig::default()
    }
}

/// Spin up one simulated server process.
async fn process(
    backend: &Arc<MemoryBackend>,
    transport: &LoopbackTransport,
    config: SyncConfig,
    write_behind: bool,
) -> SyncCoordinator {
    let storage = StorageService::start(
        Arc::clone(backend) as Arc<dyn StorageBackend>,
        &cache_config(write_behind),
    );
    SyncCoordinator::start(storage, config, Arc::new(transport.clone())).await
}

/// Let in-flight messages drain through the loopback forwarders.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn sample_key() -> ProfileKey {
    ProfileKey::new(PlayerId::new(), "survival_worlds", GameMode::Survival)
}

#[tokio::test]
async fn remote_save_invalidates_clean_cache() {
    let backend = Arc::new(MemoryBackend::new());
    let transport = LoopbackTransport::new();
    let a = process(&backend, &transport, sync_config(), false).await;
    let b = process(&backend, &transport, sync_config(), false).await;

    let key = sample_key();
    let first = Snapshot::empty(key.player, "Alice", &key.group, key.mode);
    a.save_owned(&key, first).await.expect("save");
    settle().await;

    // B reads and caches the first version.
    let seen = b.storage().get_snapshot(&key).await.expect("get");
    assert!(seen.is_some());
    assert!(b.storage().cached_revision(&key).await.is_some());

    // A saves an update; B's clean cached copy must drop.
    let mut second = Snapshot::empty(key.player, "Alice", &key.group, key.mode);
    second.progression.level = 5;
    a.save_owned(&key, second).await.expect("save");
    settle().await;

    assert!(b.storage().cached_revision(&key).await.is_none());
    let seen = b.storage().get_snapshot(&key).await.expect("get").expect("present");
    assert_eq!(seen.progression.level, 5);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn dirty_conflict_merges_and_keeps_gains() {
    let backend = Arc::new(MemoryBackend::new());
    let transport = LoopbackTransport::new();

    let merge_config = SyncConfig {
        conflict_strategy: ConflictStrategy::FieldMerge,
        ..sync_config()
    };
    // A flushes synchronously (its saves are durable immediately); B runs
    // write-behind so its save stays dirty in cache.
    let a = process(&backend, &transport, merge_config.clone(), false).await;
    let b = process(&backend, &transport, merge_config, true).await;

    let key = sample_key();

    // B accumulates progress locally, unflushed.
    let mut b_snapshot = Snapshot::empty(key.player, "Alice", &key.group, key.mode);
    b_snapshot.progression.level = 30;
    b_snapshot.progression.total_experience = 1395;
    b_snapshot.balance = Some(Decimal::new(150, 0));
    b.save_owned(&key, b_snapshot).await.expect("save");
    assert!(b.storage().is_dirty(&key).await);

    // Revisions and capture times are millisecond-granular; make A's later.
    tokio::time::sleep(Duration::from_millis(5)).await;

    // A saves a newer but poorer snapshot straight to durable storage.
    let mut a_snapshot = Snapshot::empty(key.player, "Alice", &key.group, key.mode);
    a_snapshot.progression.level = 12;
    a_snapshot.progression.total_experience = 352;
    a_snapshot.balance = Some(Decimal::new(80, 0));
    a.save_owned(&key, a_snapshot).await.expect("save");
    settle().await;

    // B detected the conflict and merged instead of discarding either side.
    let merged = b.storage().get_snapshot(&key).await.expect("get").expect("present");
    assert_eq!(merged.progression.level, 30);
    assert_eq!(merged.progression.total_experience, 1395);
    assert_eq!(merged.balance, Some(Decimal::new(150, 0)));

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn transfer_lock_excludes_other_processes() {
    let backend = Arc::new(MemoryBackend::new());
    let transport = LoopbackTransport::new();
    let a = process(&backend, &transport, sync_config(), false).await;
    let b = process(&backend, &transport, sync_config(), false).await;

    let key = sample_key();
    let lock = key.lock_key();

    a.acquire_transfer_lock(&lock).await.expect("acquire");
    settle().await;
    assert_eq!(b.lock_holder(&lock), Some(a.process_id()));

    // A guarded save on B is refused while A holds the lease.
    let snapshot = Snapshot::empty(key.player, "Alice", &key.group, key.mode);
    let refused = b.save_owned(&key, snapshot.clone()).await;
    assert!(matches!(refused, Err(SyncError::NotLockHolder { .. })));

    // And B cannot claim the lease itself.
    let contested = b.acquire_transfer_lock(&lock).await;
    assert!(matches!(contested, Err(SyncError::LockTimeout { .. })));

    // Release propagates and unblocks B entirely.
    assert!(a.release_transfer_lock(&lock).await);
    settle().await;
    b.acquire_transfer_lock(&lock).await.expect("acquire after release");
    b.save_owned(&key, snapshot).await.expect("guarded save");

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn crashed_holder_leases_lapse_after_heartbeat_timeout() {
    let backend = Arc::new(MemoryBackend::new());
    let transport = LoopbackTransport::new();
    let a = process(&backend, &transport, sync_config(), false).await;
    let b = process(&backend, &transport, sync_config(), false).await;

    let key = sample_key();
    let lock = key.lock_key();

    a.acquire_transfer_lock(&lock).await.expect("acquire");
    settle().await;
    assert_eq!(b.lock_holder(&lock), Some(a.process_id()));

    // A dies without releasing. Shutdown intentionally keeps the lease.
    a.shutdown().await;

    // Within the heartbeat timeout the lease still blocks B.
    let contested = b.acquire_transfer_lock(&lock).await;
    assert!(matches!(contested, Err(SyncError::LockTimeout { .. })));

    // Once A's silence exceeds the timeout, the lease lapses.
    tokio::time::advance(Duration::from_secs(31)).await;
    settle().await;
    b.acquire_transfer_lock(&lock)
        .await
        .expect("reclaim abandoned lease");
    assert!(b.holds_lock(&lock));

    b.shutdown().await;
}

#[tokio::test]
async fn disabled_sync_degrades_to_plain_storage() {
    let backend = Arc::new(MemoryBackend::new());
    let transport = LoopbackTransport::new();
    let config = SyncConfig {
        enabled: false,
        ..sync_config()
    };
    let solo = process(&backend, &transport, config, false).await;

    assert!(!solo.is_active());

    // Saves and locks still work locally.
    let key = sample_key();
    let snapshot = Snapshot::empty(key.player, "Alice", &key.group, key.mode);
    let revision = solo.save_owned(&key, snapshot).await.expect("save");
    assert!(revision > 0);
    solo.acquire_transfer_lock(&key.lock_key())
        .await
        .expect("local lock");

    solo.shutdown().await;
}
