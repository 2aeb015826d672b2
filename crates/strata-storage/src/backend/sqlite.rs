//! Embedded `SQLite` storage backend.
//!
//! A single local database file holding one row per `(player, group, mode)`.
//! Good for one server process; it shares the file backend's consistency
//! caveat (single writer expected). The pool is capped at one connection so
//! writes serialize at the pool rather than contending on the file lock.
//!
//! Uses runtime query construction (not compile-time checked) to avoid
//! requiring a live database at build time. All queries are parameterized.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use strata_types::{GameMode, PlayerId, ProfileKey};
use uuid::Uuid;

use crate::backend::{HealthStatus, StorageBackend};
use crate::error::StorageError;
use crate::record::StorageRecord;

/// Storage backend over a single local `SQLite` database file.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

/// A row from the `snapshots` table.
#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    data: String,
    revision: i64,
    saved_at: chrono::DateTime<chrono::Utc>,
}

/// A key-columns-only row from the `snapshots` table.
#[derive(Debug, sqlx::FromRow)]
struct KeyRow {
    player_id: String,
    group_name: String,
    mode: String,
}

impl SqliteBackend {
    /// Open (and create if missing) the database file and ensure the schema.
    ///
    /// Pass `:memory:` as the path for an ephemeral database.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Database`] if the file cannot be opened or
    /// the schema cannot be created.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        // One connection: SQLite allows a single writer anyway, and an
        // in-memory database must not be split across pool connections.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS snapshots (
                player_id  TEXT NOT NULL,
                group_name TEXT NOT NULL,
                mode       TEXT NOT NULL,
                data       TEXT NOT NULL,
                revision   INTEGER NOT NULL,
                saved_at   TEXT NOT NULL,
                PRIMARY KEY (player_id, group_name, mode)
            )",
        )
        .execute(&pool)
        .await?;

        tracing::info!(path, "Opened SQLite backend");
        Ok(Self { pool })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self, key: &ProfileKey) -> Result<Option<StorageRecord>, StorageError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r"SELECT data, revision, saved_at
              FROM snapshots
              WHERE player_id = ?1 AND group_name = ?2 AND mode = ?3",
        )
        .bind(key.player.to_string())
        .bind(&key.group)
        .bind(key.mode.as_str())
        .fetch_optional(&self.pool)
        .await;

        let row = match row {
            Ok(row) => row,
            Err(e) => {
                // Transient read failure degrades to absent.
                tracing::warn!(key = %key, error = %e, "SQLite load failed");
                return Ok(None);
            }
        };

        Ok(row.and_then(|row| decode_row(key, &row)))
    }

    async fn save(&self, key: &ProfileKey, record: &StorageRecord) -> Result<(), StorageError> {
        let data = serde_json::to_string(&record.snapshot)?;
        let revision = i64::try_from(record.revision).unwrap_or(i64::MAX);

        sqlx::query(
            r"INSERT INTO snapshots (player_id, group_name, mode, data, revision, saved_at)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6)
              ON CONFLICT (player_id, group_name, mode) DO UPDATE SET
                data = excluded.data,
                revision = excluded.revision,
                saved_at = excluded.saved_at",
        )
        .bind(key.player.to_string())
        .bind(&key.group)
        .bind(key.mode.as_str())
        .bind(data)
        .bind(revision)
        .bind(record.saved_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(key = %key, revision = record.revision, "Saved snapshot row");
        Ok(())
    }

    async fn delete(&self, key: &ProfileKey) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r"DELETE FROM snapshots
              WHERE player_id = ?1 AND group_name = ?2 AND mode = ?3",
        )
        .bind(key.player.to_string())
        .bind(&key.group)
        .bind(key.mode.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_keys(&self) -> Result<Vec<ProfileKey>, StorageError> {
        let rows = sqlx::query_as::<_, KeyRow>(
            r"SELECT player_id, group_name, mode FROM snapshots",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            let Ok(player) = row.player_id.parse::<Uuid>() else {
                tracing::warn!(player_id = %row.player_id, "Skipping row with invalid player id");
                continue;
            };
            let Some(mode) = GameMode::parse(&row.mode) else {
                tracing::warn!(mode = %row.mode, "Skipping row with unknown mode");
                continue;
            };
            keys.push(ProfileKey::new(
                PlayerId::from(player),
                row.group_name.clone(),
                mode,
            ));
        }
        Ok(keys)
    }

    async fn entry_count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(r"SELECT COUNT(*) FROM snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn approximate_size_bytes(&self) -> Result<i64, StorageError> {
        let size: i64 = sqlx::query_scalar(
            r"SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(size)
    }

    async fn health_check(&self) -> HealthStatus {
        match sqlx::query_scalar::<_, i64>(r"SELECT 1")
            .fetch_one(&self.pool)
            .await
        {
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(format!("SQLite probe failed: {e}")),
        }
    }
}

/// Decode a fetched row, treating corrupt snapshot JSON as absent.
fn decode_row(key: &ProfileKey, row: &SnapshotRow) -> Option<StorageRecord> {
    match serde_json::from_str(&row.data) {
        Ok(snapshot) => Some(StorageRecord {
            snapshot,
            revision: u64::try_from(row.revision).unwrap_or(0),
            saved_at: row.saved_at,
        }),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Corrupt snapshot row treated as absent");
            None
        }
    }
}
