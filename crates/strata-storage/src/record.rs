//! The durable [`StorageRecord`] envelope.
//!
//! Backends never store a bare snapshot: every durable write replaces the
//! whole record, and the record carries a strictly increasing revision the
//! sync layer uses for conflict comparison. Revisions are wall-clock
//! milliseconds bumped past the previous revision, so they increase even
//! when two writes land within the same millisecond.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_types::Snapshot;

/// A snapshot plus the bookkeeping the backend persists alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    /// The persisted snapshot.
    pub snapshot: Snapshot,
    /// Strictly increasing per-key revision used for conflict comparison.
    pub revision: u64,
    /// When this record was produced.
    pub saved_at: DateTime<Utc>,
}

impl StorageRecord {
    /// Create the first record for a key.
    pub fn first(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            revision: now_millis(),
            saved_at: Utc::now(),
        }
    }

    /// Create the successor record to one with `prev_revision`.
    ///
    /// The new revision is `max(prev_revision + 1, now_millis)`, so it is
    /// strictly greater than the previous one and still roughly tracks
    /// wall-clock time for cross-process comparison.
    pub fn next(snapshot: Snapshot, prev_revision: u64) -> Self {
        Self {
            snapshot,
            revision: prev_revision.saturating_add(1).max(now_millis()),
            saved_at: Utc::now(),
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use strata_types::{GameMode, PlayerId};

    use super::*;

    fn snapshot() -> Snapshot {
        Snapshot::empty(PlayerId::new(), "Alice", "hub", GameMode::Survival)
    }

    #[test]
    fn first_revision_is_wall_clock() {
        let record = StorageRecord::first(snapshot());
        // Any time after 2020 is > 1.5e12 ms.
        assert!(record.revision > 1_500_000_000_000);
    }

    #[test]
    fn next_revision_strictly_increases() {
        let first = StorageRecord::first(snapshot());
        let second = StorageRecord::next(snapshot(), first.revision);
        assert!(second.revision > first.revision);

        // Even from a revision far in the future, the successor grows.
        let future = u64::MAX - 1;
        let bumped = StorageRecord::next(snapshot(), future);
        assert_eq!(bumped.revision, u64::MAX);
    }

    #[test]
    fn record_roundtrip_serde() {
        let record = StorageRecord::first(snapshot());
        let json = serde_json::to_string(&record).ok();
        assert!(json.is_some());
        let restored: Result<StorageRecord, _> =
            serde_json::from_str(json.as_deref().unwrap_or(""));
        assert_eq!(restored.ok(), Some(record));
    }
}
