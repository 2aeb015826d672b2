//! In-process loopback transport.
//!
//! Backed by a tokio broadcast channel. Clones of one `LoopbackTransport`
//! share the channel, which is how tests wire several coordinators into a
//! simulated cluster without any external infrastructure. A single-process
//! deployment can use it as a no-op transport.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::SyncError;
use crate::message::SyncMessage;
use crate::transport::SyncTransport;

const CHANNEL_CAPACITY: usize = 256;

/// Transport over an in-process broadcast channel.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    sender: broadcast::Sender<SyncMessage>,
}

impl LoopbackTransport {
    /// Create a transport with a fresh private channel.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncTransport for LoopbackTransport {
    fn kind(&self) -> &'static str {
        "loopback"
    }

    async fn publish(&self, message: &SyncMessage) -> Result<(), SyncError> {
        // Zero subscribers is not an error; the message just has no audience.
        drop(self.sender.send(message.clone()));
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<SyncMessage>, SyncError> {
        let mut upstream = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                match upstream.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Loopback subscriber lagged; messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use strata_types::{LockKey, PlayerId, ProcessId};

    use super::*;
    use crate::message::SyncPayload;

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let transport = LoopbackTransport::new();
        let mut first = transport.subscribe().await.ok();
        let mut second = transport.clone().subscribe().await.ok();

        let message = SyncMessage::new(
            ProcessId::new(),
            SyncPayload::LockRequest {
                key: LockKey {
                    player: PlayerId::new(),
                    group: "hub".to_owned(),
                },
            },
        );
        transport.publish(&message).await.ok();

        for rx in [first.as_mut(), second.as_mut()].into_iter().flatten() {
            let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
                .await
                .ok()
                .flatten();
            assert_eq!(received, Some(message.clone()));
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let transport = LoopbackTransport::new();
        let message = SyncMessage::new(ProcessId::new(), SyncPayload::Heartbeat { held: Vec::new() });
        assert!(transport.publish(&message).await.is_ok());
    }
}
