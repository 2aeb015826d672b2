//! Database-polled transport.
//!
//! For deployments that already share a `PostgreSQL` backend but have no
//! message broker: messages are rows in a `sync_messages` table, and every
//! subscriber polls for rows past its cursor. Latency is bounded by the
//! poll interval rather than being push-immediate, which is acceptable for
//! invalidations (one stale read) and heartbeats (TTL slack).
//!
//! The publisher side occasionally prunes rows old enough that every live
//! subscriber must have passed them.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::message::SyncMessage;
use crate::transport::SyncTransport;

/// Rows older than this are pruned; far larger than any sane poll interval.
const PRUNE_AGE: &str = "5 minutes";

/// How many poll ticks between prune attempts.
const PRUNE_EVERY_TICKS: u32 = 120;

/// Transport over a polled `sync_messages` table in shared `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct DatabaseTransport {
    pool: PgPool,
    poll_interval: Duration,
}

/// One fetched message row.
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    payload: serde_json::Value,
}

impl DatabaseTransport {
    /// Prepare the message table on the given pool.
    ///
    /// The pool is shared with the `PostgreSQL` storage backend.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Database`] if the table cannot be created.
    pub async fn open(pool: PgPool, poll_interval_ms: u64) -> Result<Self, SyncError> {
        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS sync_messages (
                id      BIGSERIAL PRIMARY KEY,
                payload JSONB NOT NULL,
                sent_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&pool)
        .await?;

        tracing::info!(poll_interval_ms, "Opened database sync transport");
        Ok(Self {
            pool,
            poll_interval: Duration::from_millis(poll_interval_ms),
        })
    }

    /// Current high-water mark; new subscribers start past existing rows.
    async fn cursor(&self) -> Result<i64, SyncError> {
        let max: i64 = sqlx::query_scalar(r"SELECT COALESCE(MAX(id), 0) FROM sync_messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(max)
    }
}

#[async_trait]
impl SyncTransport for DatabaseTransport {
    fn kind(&self) -> &'static str {
        "database"
    }

    async fn publish(&self, message: &SyncMessage) -> Result<(), SyncError> {
        let payload = serde_json::to_value(message)?;
        sqlx::query(r"INSERT INTO sync_messages (payload) VALUES ($1)")
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<SyncMessage>, SyncError> {
        let mut cursor = self.cursor().await?;
        let pool = self.pool.clone();
        let poll_interval = self.poll_interval;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut ticks: u32 = 0;

            loop {
                ticker.tick().await;
                ticks = ticks.wrapping_add(1);

                let rows = sqlx::query_as::<_, MessageRow>(
                    r"SELECT id, payload FROM sync_messages
                      WHERE id > $1 ORDER BY id LIMIT 256",
                )
                .bind(cursor)
                .fetch_all(&pool)
                .await;

                let rows = match rows {
                    Ok(rows) => rows,
                    Err(e) => {
                        tracing::warn!(error = %e, "Sync message poll failed; retrying");
                        continue;
                    }
                };

                for row in rows {
                    cursor = cursor.max(row.id);
                    match serde_json::from_value::<SyncMessage>(row.payload) {
                        Ok(message) => {
                            if tx.send(message).await.is_err() {
                                tracing::debug!("Database sync subscription closed");
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(id = row.id, error = %e, "Dropping undecodable sync row");
                        }
                    }
                }

                if ticks.is_multiple_of(PRUNE_EVERY_TICKS) {
                    let pruned = sqlx::query(
                        r"DELETE FROM sync_messages
                          WHERE sent_at < now() - $1::interval",
                    )
                    .bind(PRUNE_AGE)
                    .execute(&pool)
                    .await;
                    if let Err(e) = pruned {
                        tracing::debug!(error = %e, "Sync message prune failed");
                    }
                }
            }
        });

        Ok(rx)
    }
}
