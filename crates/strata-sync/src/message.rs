//! Wire format for cross-process sync messages.
//!
//! Messages are deliberately small: an invalidation carries the key and the
//! new revision, never the snapshot itself. Receivers that actually need the
//! data re-fetch it from durable storage, so a lost message costs one stale
//! read at worst and large inventories never transit the broadcast channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_types::{LockKey, ProcessId, ProfileKey};

/// A single broadcast message between server processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// The process that sent this message.
    pub source: ProcessId,
    /// What the message announces.
    pub payload: SyncPayload,
    /// Wall-clock send time (diagnostics only; ordering uses revisions).
    pub sent_at: DateTime<Utc>,
}

/// The announcement carried by a [`SyncMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncPayload {
    /// A key was durably saved at the given revision; cached copies older
    /// than it are stale.
    Invalidate {
        /// The saved key.
        key: ProfileKey,
        /// The revision now durable for that key.
        revision: u64,
    },
    /// The sender claims the transfer lock for a player/group pair.
    LockRequest {
        /// The claimed lock key.
        key: LockKey,
    },
    /// The sender relinquishes a transfer lock it holds.
    LockRelease {
        /// The released lock key.
        key: LockKey,
    },
    /// Periodic liveness signal renewing every lease the sender holds.
    Heartbeat {
        /// All lock keys the sender currently holds.
        held: Vec<LockKey>,
    },
}

impl SyncMessage {
    /// Build a message from this process, stamped with the current time.
    pub fn new(source: ProcessId, payload: SyncPayload) -> Self {
        Self {
            source,
            payload,
            sent_at: Utc::now(),
        }
    }

    /// Encode to the JSON wire representation.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (it cannot for these types,
    /// but the transport treats encoding uniformly).
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from the JSON wire representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid message. Transports log
    /// and drop such frames rather than tearing down the subscription.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use strata_types::{GameMode, PlayerId};

    use super::*;

    #[test]
    fn wire_roundtrip() {
        let key = ProfileKey::new(PlayerId::new(), "survival_worlds", GameMode::Survival);
        let message = SyncMessage::new(
            ProcessId::new(),
            SyncPayload::Invalidate {
                key,
                revision: 42,
            },
        );

        let bytes = message.to_bytes().unwrap_or_default();
        let decoded = SyncMessage::from_bytes(&bytes).ok();
        assert_eq!(decoded, Some(message));
    }

    #[test]
    fn payload_is_tagged_for_foreign_consumers() {
        let message = SyncMessage::new(
            ProcessId::new(),
            SyncPayload::Heartbeat { held: Vec::new() },
        );
        let json = serde_json::to_value(&message).unwrap_or_default();
        assert_eq!(
            json.get("payload").and_then(|p| p.get("type")),
            Some(&serde_json::json!("heartbeat"))
        );
    }

    #[test]
    fn corrupt_frame_is_an_error_not_a_panic() {
        assert!(SyncMessage::from_bytes(b"not json").is_err());
    }
}
