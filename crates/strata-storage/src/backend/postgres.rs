//! Networked `PostgreSQL` storage backend.
//!
//! The only variant safe for multiple server processes writing concurrently
//! without external coordination: the database serializes writes per row.
//! The connection pool is fully tunable (max size, minimum idle,
//! connect/idle/max-lifetime timeouts) via
//! [`strata_config::PostgresConfig`].
//!
//! Uses runtime query construction (not compile-time checked) to avoid
//! requiring a live database at build time. All queries are parameterized.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use strata_config::PostgresConfig;
use strata_types::{GameMode, PlayerId, ProfileKey};
use uuid::Uuid;

use crate::backend::{HealthStatus, StorageBackend};
use crate::error::StorageError;
use crate::record::StorageRecord;

/// Storage backend over a pooled `PostgreSQL` connection.
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

/// A row from the `snapshots` table.
#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    data: serde_json::Value,
    revision: i64,
    saved_at: chrono::DateTime<chrono::Utc>,
}

/// A key-columns-only row from the `snapshots` table.
#[derive(Debug, sqlx::FromRow)]
struct KeyRow {
    player_id: Uuid,
    group_name: String,
    mode: String,
}

impl PostgresBackend {
    /// Connect to `PostgreSQL` and ensure the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] if the URL cannot be parsed and
    /// [`StorageError::Database`] if the connection or schema setup fails.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StorageError> {
        let connect_options: PgConnectOptions = config.url.parse().map_err(
            |e: sqlx::Error| StorageError::Config(format!("invalid database URL: {e}")),
        )?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect_with(connect_options)
            .await?;

        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS snapshots (
                player_id  UUID NOT NULL,
                group_name TEXT NOT NULL,
                mode       TEXT NOT NULL,
                data       JSONB NOT NULL,
                revision   BIGINT NOT NULL,
                saved_at   TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (player_id, group_name, mode)
            )",
        )
        .execute(&pool)
        .await?;

        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connected to PostgreSQL backend"
        );

        Ok(Self { pool })
    }

    /// Return a reference to the underlying [`PgPool`].
    ///
    /// The database sync transport shares this pool for its notify table.
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn load(&self, key: &ProfileKey) -> Result<Option<StorageRecord>, StorageError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r"SELECT data, revision, saved_at
              FROM snapshots
              WHERE player_id = $1 AND group_name = $2 AND mode = $3",
        )
        .bind(key.player.into_inner())
        .bind(&key.group)
        .bind(key.mode.as_str())
        .fetch_optional(&self.pool)
        .await;

        let row = match row {
            Ok(row) => row,
            Err(e) => {
                // Transient read failure degrades to absent.
                tracing::warn!(key = %key, error = %e, "PostgreSQL load failed");
                return Ok(None);
            }
        };

        Ok(row.and_then(|row| decode_row(key, row)))
    }

    async fn save(&self, key: &ProfileKey, record: &StorageRecord) -> Result<(), StorageError> {
        let data = serde_json::to_value(&record.snapshot)?;
        let revision = i64::try_from(record.revision).unwrap_or(i64::MAX);

        sqlx::query(
            r"INSERT INTO snapshots (player_id, group_name, mode, data, revision, saved_at)
              VALUES ($1, $2, $3, $4, $5, $6)
              ON CONFLICT (player_id, group_name, mode) DO UPDATE SET
                data = EXCLUDED.data,
                revision = EXCLUDED.revision,
                saved_at = EXCLUDED.saved_at",
        )
        .bind(key.player.into_inner())
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
              WHERE player_id = $1 AND group_name = $2 AND mode = $3",
        )
        .bind(key.player.into_inner())
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
        for row in rows {
            let Some(mode) = GameMode::parse(&row.mode) else {
                tracing::warn!(mode = %row.mode, "Skipping row with unknown mode");
                continue;
            };
            keys.push(ProfileKey::new(
                PlayerId::from(row.player_id),
                row.group_name,
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
        let size: i64 =
            sqlx::query_scalar(r"SELECT pg_total_relation_size('snapshots')")
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
            Err(e) => HealthStatus::Unhealthy(format!("PostgreSQL probe failed: {e}")),
        }
    }
}

/// Decode a fetched row, treating corrupt snapshot JSON as absent.
fn decode_row(key: &ProfileKey, row: SnapshotRow) -> Option<StorageRecord> {
    match serde_json::from_value(row.data) {
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
