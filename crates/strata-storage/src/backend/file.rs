//! File-backed storage: one JSON file per `(player, group, mode)`.
//!
//! The directory layout is a stable on-disk contract that backup and
//! migration tooling depends on verbatim:
//!
//! ```text
//! <data_dir>/players/<player-uuid>/<group>.<mode>.json
//! ```
//!
//! Writes go to a sibling `.tmp` file first and are renamed into place, so
//! a crash mid-write never leaves a partially written record. There is no
//! concurrent-writer safety beyond process-local locking; this variant is
//! for single-process deployments.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use strata_types::{GameMode, PlayerId, ProfileKey};
use uuid::Uuid;

use crate::backend::{HealthStatus, StorageBackend};
use crate::error::StorageError;
use crate::record::StorageRecord;

/// File extension for snapshot records.
const EXT: &str = "json";

/// Storage backend keeping one JSON file per key under a data directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    players_dir: PathBuf,
}

impl FileBackend {
    /// Open (and create if missing) the data directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let players_dir = data_dir.as_ref().join("players");
        tokio::fs::create_dir_all(&players_dir).await?;
        tracing::info!(dir = %players_dir.display(), "Opened file backend");
        Ok(Self { players_dir })
    }

    /// Path of the record file for a key.
    ///
    /// Group names are part of the file name, so they must not contain
    /// path separators.
    fn record_path(&self, key: &ProfileKey) -> Result<PathBuf, StorageError> {
        if key.group.contains(['/', '\\']) {
            return Err(StorageError::Config(format!(
                "group name contains a path separator: {:?}",
                key.group
            )));
        }
        Ok(self
            .players_dir
            .join(key.player.to_string())
            .join(format!("{}.{}.{}", key.group, key.mode, EXT)))
    }

    /// Parse `<group>.<mode>.json` back into its parts.
    ///
    /// The mode is the last dot-separated segment before the extension;
    /// group names themselves may contain dots.
    fn parse_file_name(name: &str) -> Option<(String, GameMode)> {
        let stem = name.strip_suffix(&format!(".{EXT}"))?;
        let (group, mode_str) = stem.rsplit_once('.')?;
        let mode = GameMode::parse(mode_str)?;
        Some((group.to_owned(), mode))
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self, key: &ProfileKey) -> Result<Option<StorageRecord>, StorageError> {
        let path = self.record_path(key)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                // Transient read failure degrades to absent; the caller
                // falls back to defaults.
                tracing::warn!(key = %key, error = %e, "Failed to read snapshot file");
                return Ok(None);
            }
        };

        match serde_json::from_str::<StorageRecord>(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    path = %path.display(),
                    error = %e,
                    "Corrupt snapshot file treated as absent"
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, key: &ProfileKey, record: &StorageRecord) -> Result<(), StorageError> {
        let path = self.record_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(record)?;

        // Write-then-rename so a crash never leaves a torn record.
        let tmp = path.with_extension(format!("{EXT}.tmp"));
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(key = %key, revision = record.revision, "Saved snapshot file");
        Ok(())
    }

    async fn delete(&self, key: &ProfileKey) -> Result<bool, StorageError> {
        let path = self.record_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list_keys(&self) -> Result<Vec<ProfileKey>, StorageError> {
        let mut keys = Vec::new();
        let mut players = tokio::fs::read_dir(&self.players_dir).await?;

        while let Some(player_entry) = players.next_entry().await? {
            let dir_name = player_entry.file_name();
            let Some(player) = dir_name.to_str().and_then(|s| s.parse::<Uuid>().ok()) else {
                tracing::debug!(entry = ?dir_name, "Skipping non-player directory");
                continue;
            };

            let mut files = tokio::fs::read_dir(player_entry.path()).await?;
            while let Some(file_entry) = files.next_entry().await? {
                let file_name = file_entry.file_name();
                let Some((group, mode)) =
                    file_name.to_str().and_then(Self::parse_file_name)
                else {
                    continue;
                };
                keys.push(ProfileKey::new(PlayerId::from(player), group, mode));
            }
        }

        Ok(keys)
    }

    async fn entry_count(&self) -> Result<u64, StorageError> {
        let keys = self.list_keys().await?;
        Ok(u64::try_from(keys.len()).unwrap_or(u64::MAX))
    }

    async fn approximate_size_bytes(&self) -> Result<i64, StorageError> {
        let mut total: u64 = 0;
        let mut players = tokio::fs::read_dir(&self.players_dir).await?;

        while let Some(player_entry) = players.next_entry().await? {
            if !player_entry.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(player_entry.path()).await?;
            while let Some(file_entry) = files.next_entry().await? {
                let meta = file_entry.metadata().await?;
                total = total.saturating_add(meta.len());
            }
        }

        Ok(i64::try_from(total).unwrap_or(i64::MAX))
    }

    async fn health_check(&self) -> HealthStatus {
        match tokio::fs::metadata(&self.players_dir).await {
            Ok(meta) if meta.is_dir() => HealthStatus::Healthy,
            Ok(_) => HealthStatus::Unhealthy(format!(
                "{} is not a directory",
                self.players_dir.display()
            )),
            Err(e) => HealthStatus::Unhealthy(format!("data directory inaccessible: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_roundtrip() {
        let parsed = FileBackend::parse_file_name("survival_worlds.creative.json");
        assert_eq!(
            parsed,
            Some(("survival_worlds".to_owned(), GameMode::Creative))
        );
    }

    #[test]
    fn file_name_group_may_contain_dots() {
        let parsed = FileBackend::parse_file_name("sky.block.survival.json");
        assert_eq!(parsed, Some(("sky.block".to_owned(), GameMode::Survival)));
    }

    #[test]
    fn file_name_rejects_unknown_mode() {
        assert_eq!(FileBackend::parse_file_name("hub.hardcore.json"), None);
        assert_eq!(FileBackend::parse_file_name("hub.survival.yaml"), None);
        assert_eq!(FileBackend::parse_file_name("nodots"), None);
    }
}
