//! NATS transport.
//!
//! All processes publish and subscribe on one configurable subject. NATS
//! delivery is at-most-once, which matches the wire format's design: a
//! dropped invalidation means one stale read until the next save, and
//! dropped heartbeats are absorbed by the lease TTL.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::message::SyncMessage;
use crate::transport::SyncTransport;

/// Transport over a NATS subject.
#[derive(Debug, Clone)]
pub struct NatsTransport {
    client: async_nats::Client,
    subject: String,
}

impl NatsTransport {
    /// Connect to the NATS server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] if the server is unreachable.
    pub async fn connect(url: &str, subject: impl Into<String>) -> Result<Self, SyncError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| SyncError::Transport(format!("NATS connect failed: {e}")))?;
        let subject = subject.into();
        tracing::info!(url, subject, "Connected to NATS sync transport");
        Ok(Self { client, subject })
    }
}

#[async_trait]
impl SyncTransport for NatsTransport {
    fn kind(&self) -> &'static str {
        "nats"
    }

    async fn publish(&self, message: &SyncMessage) -> Result<(), SyncError> {
        let bytes = message.to_bytes()?;
        self.client
            .publish(self.subject.clone(), bytes.into())
            .await
            .map_err(|e| SyncError::Transport(format!("NATS publish failed: {e}")))?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<SyncMessage>, SyncError> {
        let mut subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .map_err(|e| SyncError::Transport(format!("NATS subscribe failed: {e}")))?;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            while let Some(frame) = subscriber.next().await {
                match SyncMessage::from_bytes(&frame.payload) {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // A malformed frame is dropped, not fatal.
                        tracing::warn!(error = %e, "Dropping undecodable sync frame");
                    }
                }
            }
            tracing::debug!("NATS sync subscription closed");
        });

        Ok(rx)
    }
}
