//! Broadcast transports for sync messages.
//!
//! A transport is fire-and-forget fan-out: every message published by one
//! process is delivered to every subscribed process, including (on some
//! transports) the publisher itself. The coordinator filters out its own
//! messages by source id, so self-delivery is harmless.
//!
//! Three implementations:
//!
//! | transport  | topology                         | extra infrastructure |
//! |------------|----------------------------------|----------------------|
//! | `nats`     | NATS subject pub/sub             | NATS server          |
//! | `database` | polled table in shared Postgres  | none (reuses the DB) |
//! | `loopback` | in-process broadcast channel     | none                 |

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use strata_config::{SyncConfig, TransportKind};
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::message::SyncMessage;

mod database;
mod loopback;
mod nats;

pub use database::DatabaseTransport;
pub use loopback::LoopbackTransport;
pub use nats::NatsTransport;

/// Fan-out message channel between server processes.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Short transport name for logs.
    fn kind(&self) -> &'static str;

    /// Broadcast one message to all processes.
    async fn publish(&self, message: &SyncMessage) -> Result<(), SyncError>;

    /// Open a stream of incoming messages.
    ///
    /// The returned receiver yields messages until the transport closes.
    /// Whether the subscriber sees its own published messages is
    /// transport-dependent; callers must filter by source id.
    async fn subscribe(&self) -> Result<mpsc::Receiver<SyncMessage>, SyncError>;
}

/// Build the transport selected by `config`.
///
/// The database transport rides on the storage backend's `PostgreSQL` pool,
/// so `postgres` must be provided when that transport is selected.
///
/// # Errors
///
/// Returns [`SyncError::Transport`] if the selected transport cannot be
/// reached or its prerequisites are missing.
pub async fn connect_transport(
    config: &SyncConfig,
    postgres: Option<&PgPool>,
) -> Result<Arc<dyn SyncTransport>, SyncError> {
    match config.transport {
        TransportKind::Loopback => Ok(Arc::new(LoopbackTransport::new())),
        TransportKind::Nats => {
            let transport =
                NatsTransport::connect(&config.nats_url, config.subject.clone()).await?;
            Ok(Arc::new(transport))
        }
        TransportKind::Database => {
            let pool = postgres.ok_or_else(|| {
                SyncError::Transport(
                    "database transport requires the PostgreSQL storage backend".to_owned(),
                )
            })?;
            let transport = DatabaseTransport::open(pool.clone(), config.poll_interval_ms).await?;
            Ok(Arc::new(transport))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_is_the_default_selection() {
        let config = SyncConfig::default();
        let transport = connect_transport(&config, None).await.ok();
        assert_eq!(transport.map(|t| t.kind()), Some("loopback"));
    }

    #[tokio::test]
    async fn database_selection_requires_a_pool() {
        let config = SyncConfig {
            transport: TransportKind::Database,
            ..SyncConfig::default()
        };
        let result = connect_transport(&config, None).await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }
}
