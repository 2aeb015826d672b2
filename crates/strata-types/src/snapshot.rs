//! The captured player state ([`Snapshot`]) and its component parts.
//!
//! A snapshot is a copy-on-capture value: item stacks, effects, and vitals
//! are copied out of the live engine at capture time and never reference
//! engine objects afterwards. The storage layer persists snapshots whole;
//! the sync layer compares and merges them field by field.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;

/// The game mode variant a snapshot is scoped to.
///
/// Groups keep separate state pools per mode so that, for example,
/// creative-mode items never leak into a survival inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    /// Standard survival play.
    Survival,
    /// Creative building mode.
    Creative,
    /// Adventure mode (restricted interaction).
    Adventure,
    /// Spectator mode (no interaction).
    Spectator,
}

impl GameMode {
    /// Stable lowercase name, used in file names and database columns.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Survival => "survival",
            Self::Creative => "creative",
            Self::Adventure => "adventure",
            Self::Spectator => "spectator",
        }
    }

    /// Parse the stable lowercase name back into a mode.
    ///
    /// Returns `None` for unknown names.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "survival" => Some(Self::Survival),
            "creative" => Some(Self::Creative),
            "adventure" => Some(Self::Adventure),
            "spectator" => Some(Self::Spectator),
            _ => None,
        }
    }
}

impl core::fmt::Display for GameMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stack of items occupying a container slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    /// Namespaced item identifier (e.g. `"minecraft:oak_log"`).
    pub item: String,
    /// Number of items in the stack.
    pub count: u32,
    /// Opaque item metadata (enchantments, display name, damage) as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl ItemStack {
    /// Create a plain stack with no metadata.
    pub fn new(item: impl Into<String>, count: u32) -> Self {
        Self {
            item: item.into(),
            count,
            meta: None,
        }
    }
}

/// A sparse container: occupied slot index to stack.
pub type Container = BTreeMap<u16, ItemStack>;

/// An active temporary effect on the player.
///
/// Effect identity for de-duplication is the `effect` name alone; two
/// effects with the same name but different amplifiers are considered
/// the same effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEffect {
    /// Namespaced effect identifier (e.g. `"minecraft:speed"`).
    pub effect: String,
    /// Effect strength (0 = level I).
    pub amplifier: u8,
    /// Remaining duration in ticks.
    pub duration_ticks: u32,
}

/// Player vitals at capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    /// Current health points.
    pub health: f64,
    /// Maximum health points.
    pub max_health: f64,
    /// Food level (0-20).
    pub hunger: u32,
    /// Saturation level.
    pub saturation: f32,
    /// Exhaustion accumulator.
    pub exhaustion: f32,
}

impl Default for Vitals {
    fn default() -> Self {
        Self {
            health: 20.0,
            max_health: 20.0,
            hunger: 20,
            saturation: 5.0,
            exhaustion: 0.0,
        }
    }
}

/// Experience progression at capture time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Progression {
    /// Progress toward the next level (0.0-1.0).
    pub exp_progress: f32,
    /// Current experience level.
    pub level: u32,
    /// Lifetime total experience points.
    pub total_experience: u64,
}

/// Immutable captured player state for one `(player, group, mode)` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The player this snapshot belongs to.
    pub player: PlayerId,
    /// Player display name at capture time (for tooling and logs).
    pub player_name: String,
    /// The group this snapshot is scoped to.
    pub group: String,
    /// The game mode this snapshot is scoped to.
    pub mode: GameMode,
    /// Main inventory slots.
    #[serde(default)]
    pub main: Container,
    /// Armor slots.
    #[serde(default)]
    pub armor: Container,
    /// Off-hand slot(s).
    #[serde(default)]
    pub off_hand: Container,
    /// Secondary vault (ender chest) slots.
    #[serde(default)]
    pub vault: Container,
    /// Vitals at capture time.
    #[serde(default)]
    pub vitals: Vitals,
    /// Experience progression at capture time.
    #[serde(default)]
    pub progression: Progression,
    /// Active temporary effects at capture time.
    #[serde(default)]
    pub effects: Vec<StatusEffect>,
    /// Economic balance, if the economy hook is installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,
    /// Real-world capture timestamp.
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create an empty snapshot with default vitals and no items.
    ///
    /// This is the value a caller receives semantics-wise when no record
    /// exists for a key ("use defaults").
    pub fn empty(
        player: PlayerId,
        player_name: impl Into<String>,
        group: impl Into<String>,
        mode: GameMode,
    ) -> Self {
        Self {
            player,
            player_name: player_name.into(),
            group: group.into(),
            mode,
            main: Container::new(),
            armor: Container::new(),
            off_hand: Container::new(),
            vault: Container::new(),
            vitals: Vitals::default(),
            progression: Progression::default(),
            effects: Vec::new(),
            balance: None,
            captured_at: Utc::now(),
        }
    }

    /// The profile key this snapshot is scoped to.
    pub fn key(&self) -> crate::key::ProfileKey {
        crate::key::ProfileKey::new(self.player, self.group.clone(), self.mode)
    }

    /// Total number of occupied slots across all four containers.
    pub fn occupied_slots(&self) -> usize {
        self.main
            .len()
            .saturating_add(self.armor.len())
            .saturating_add(self.off_hand.len())
            .saturating_add(self.vault.len())
    }
}
