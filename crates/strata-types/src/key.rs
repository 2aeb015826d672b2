//! Cache and lock keys.
//!
//! Every snapshot is scoped to exactly one `(player, group, mode)` triple --
//! that triple is the [`ProfileKey`] used by the cache and the backends.
//! Transfer locks are coarser: a session hand-off claims all modes of a
//! group at once, so leases are keyed by `(player, group)` only
//! ([`LockKey`]).

use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;
use crate::snapshot::GameMode;

/// The `(player, group, mode)` triple identifying one stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProfileKey {
    /// The player this profile belongs to.
    pub player: PlayerId,
    /// The logical group (world partition) name.
    pub group: String,
    /// The game mode variant within the group.
    pub mode: GameMode,
}

impl ProfileKey {
    /// Create a new profile key.
    pub fn new(player: PlayerId, group: impl Into<String>, mode: GameMode) -> Self {
        Self {
            player,
            group: group.into(),
            mode,
        }
    }

    /// The `(player, group)` pair this profile's transfer lock is keyed by.
    pub fn lock_key(&self) -> LockKey {
        LockKey {
            player: self.player,
            group: self.group.clone(),
        }
    }
}

impl core::fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}:{}", self.player, self.group, self.mode)
    }
}

/// The `(player, group)` pair a transfer lock (lease) is held on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockKey {
    /// The player whose session is being transferred.
    pub player: PlayerId,
    /// The group the lease covers (all modes).
    pub group: String,
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.player, self.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_colon_separated() {
        let player = PlayerId::new();
        let key = ProfileKey::new(player, "survival_worlds", GameMode::Survival);
        let text = key.to_string();
        assert!(text.starts_with(&player.to_string()));
        assert!(text.ends_with(":survival_worlds:survival"));
    }

    #[test]
    fn lock_key_drops_mode() {
        let player = PlayerId::new();
        let a = ProfileKey::new(player, "hub", GameMode::Survival).lock_key();
        let b = ProfileKey::new(player, "hub", GameMode::Creative).lock_key();
        // Different modes share one lease.
        assert_eq!(a, b);
    }

    #[test]
    fn key_roundtrip_serde() {
        let key = ProfileKey::new(PlayerId::new(), "hub", GameMode::Adventure);
        let json = serde_json::to_string(&key).ok();
        assert!(json.is_some());
        let restored: Result<ProfileKey, _> =
            serde_json::from_str(json.as_deref().unwrap_or(""));
        assert_eq!(restored.ok(), Some(key));
    }
}
