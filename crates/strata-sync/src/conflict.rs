//! Conflict resolution between concurrently produced snapshots.
//!
//! Resolution is a pure function of the two snapshots and the configured
//! strategy, so every process reaches the same verdict for the same inputs
//! regardless of which one detected the conflict first. The only
//! process-dependent input is `prefer_local`, which encodes "the player is
//! connected here" for the `prefer_connected` rule.
//!
//! `last_write_wins` keeps whichever snapshot was captured later, wholesale.
//! `field_merge` starts from the newer snapshot (containers always travel as
//! a unit; merging item slots would duplicate items) and reconciles the
//! scalar field groups by their configured [`MergeRule`].

use rust_decimal::Decimal;
use strata_config::{ConflictStrategy, MergeRule, MergeRules};
use strata_types::{Progression, Snapshot, StatusEffect, Vitals};

/// Resolve two conflicting snapshots for the same key into one winner.
///
/// `prefer_local` should be `true` when the player is connected to this
/// process (in practice: this process holds the transfer lock).
pub fn resolve(
    strategy: ConflictStrategy,
    rules: &MergeRules,
    local: &Snapshot,
    remote: &Snapshot,
    prefer_local: bool,
) -> Snapshot {
    match strategy {
        ConflictStrategy::LastWriteWins => last_write_wins(local, remote).clone(),
        ConflictStrategy::FieldMerge => field_merge(rules, local, remote, prefer_local),
    }
}

/// The snapshot with the later capture time; ties keep the local one.
fn last_write_wins<'a>(local: &'a Snapshot, remote: &'a Snapshot) -> &'a Snapshot {
    if remote.captured_at > local.captured_at {
        remote
    } else {
        local
    }
}

fn field_merge(
    rules: &MergeRules,
    local: &Snapshot,
    remote: &Snapshot,
    prefer_local: bool,
) -> Snapshot {
    let newer = last_write_wins(local, remote);
    let connected = if prefer_local { local } else { remote };

    // Containers, identity fields, and the capture timestamp come from the
    // newer snapshot as a unit.
    let mut merged = newer.clone();

    merged.progression = merge_progression(
        rules.progression,
        local,
        remote,
        newer,
        connected,
    );
    merged.vitals = merge_vitals(rules.vitals, local, remote, newer, connected);
    merged.effects = merge_effects(rules.effects, local, remote, newer, connected);
    merged.balance = merge_balance(rules.balance, local, remote, newer, connected);
    merged
}

fn merge_progression(
    rule: MergeRule,
    local: &Snapshot,
    remote: &Snapshot,
    newer: &Snapshot,
    connected: &Snapshot,
) -> Progression {
    match rule {
        // Experience is only ever earned; the pointwise maximum never loses
        // progress to a stale snapshot.
        MergeRule::Higher => Progression {
            exp_progress: local
                .progression
                .exp_progress
                .max(remote.progression.exp_progress),
            level: local.progression.level.max(remote.progression.level),
            total_experience: local
                .progression
                .total_experience
                .max(remote.progression.total_experience),
        },
        MergeRule::PreferConnected => connected.progression,
        // Union has no meaning for scalars; fall back to newer.
        MergeRule::Newer | MergeRule::Union => newer.progression,
    }
}

fn merge_vitals(
    rule: MergeRule,
    local: &Snapshot,
    remote: &Snapshot,
    newer: &Snapshot,
    connected: &Snapshot,
) -> Vitals {
    match rule {
        MergeRule::Higher => Vitals {
            health: local.vitals.health.max(remote.vitals.health),
            max_health: local.vitals.max_health.max(remote.vitals.max_health),
            hunger: local.vitals.hunger.max(remote.vitals.hunger),
            saturation: local.vitals.saturation.max(remote.vitals.saturation),
            exhaustion: local.vitals.exhaustion.max(remote.vitals.exhaustion),
        },
        MergeRule::PreferConnected => connected.vitals.clone(),
        MergeRule::Newer | MergeRule::Union => newer.vitals.clone(),
    }
}

fn merge_effects(
    rule: MergeRule,
    local: &Snapshot,
    remote: &Snapshot,
    newer: &Snapshot,
    connected: &Snapshot,
) -> Vec<StatusEffect> {
    match rule {
        // Union keyed by effect name; where both sides carry the same
        // effect, the newer snapshot's amplifier and duration win.
        MergeRule::Union => {
            let older = if std::ptr::eq(newer, local) {
                remote
            } else {
                local
            };
            let mut merged = newer.effects.clone();
            for effect in &older.effects {
                if !merged.iter().any(|e| e.effect == effect.effect) {
                    merged.push(effect.clone());
                }
            }
            merged
        }
        MergeRule::PreferConnected => connected.effects.clone(),
        MergeRule::Newer | MergeRule::Higher => newer.effects.clone(),
    }
}

fn merge_balance(
    rule: MergeRule,
    local: &Snapshot,
    remote: &Snapshot,
    newer: &Snapshot,
    connected: &Snapshot,
) -> Option<Decimal> {
    match rule {
        // `None` means "economy hook absent", so any present balance beats
        // an absent one.
        MergeRule::Higher => local.balance.max(remote.balance),
        MergeRule::PreferConnected => connected.balance,
        MergeRule::Newer | MergeRule::Union => newer.balance,
    }
}
