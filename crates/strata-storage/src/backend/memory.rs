//! In-process storage backend with no durability.
//!
//! Holds records in a map behind a lock. Data is lost when the process
//! exits; this variant exists for tests and throwaway development servers
//! where durability does not matter.

use std::collections::BTreeMap;

use async_trait::async_trait;
use strata_types::ProfileKey;
use tokio::sync::RwLock;

use crate::backend::{HealthStatus, StorageBackend};
use crate::error::StorageError;
use crate::record::StorageRecord;

/// Storage backend keeping all records in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<BTreeMap<ProfileKey, StorageRecord>>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, key: &ProfileKey) -> Result<Option<StorageRecord>, StorageError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn save(&self, key: &ProfileKey, record: &StorageRecord) -> Result<(), StorageError> {
        self.records
            .write()
            .await
            .insert(key.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &ProfileKey) -> Result<bool, StorageError> {
        Ok(self.records.write().await.remove(key).is_some())
    }

    async fn list_keys(&self) -> Result<Vec<ProfileKey>, StorageError> {
        Ok(self.records.read().await.keys().cloned().collect())
    }

    async fn entry_count(&self) -> Result<u64, StorageError> {
        let len = self.records.read().await.len();
        Ok(u64::try_from(len).unwrap_or(u64::MAX))
    }

    async fn approximate_size_bytes(&self) -> Result<i64, StorageError> {
        // No meaningful durable size.
        Ok(-1)
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use strata_types::{GameMode, PlayerId, Snapshot};

    use super::*;

    #[tokio::test]
    async fn roundtrip_and_delete() {
        let backend = MemoryBackend::new();
        let key = ProfileKey::new(PlayerId::new(), "hub", GameMode::Survival);
        let record = StorageRecord::first(Snapshot::empty(
            key.player,
            "Alice",
            &key.group,
            key.mode,
        ));

        assert!(backend.load(&key).await.ok().flatten().is_none());

        backend.save(&key, &record).await.ok();
        assert_eq!(backend.load(&key).await.ok().flatten(), Some(record));
        assert_eq!(backend.entry_count().await.ok(), Some(1));

        assert_eq!(backend.delete(&key).await.ok(), Some(true));
        assert_eq!(backend.delete(&key).await.ok(), Some(false));
    }

    #[tokio::test]
    async fn size_is_unknown() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.approximate_size_bytes().await.ok(), Some(-1));
    }
}
