//! Conflict detection, recording, and resolution.
//!
//! A conflict is a pair of differing payloads for the same entity where
//! the winner is not determined by the replication protocol alone.
//! Payloads are opaque byte buffers; detection compares decoded
//! timestamps first and falls back to byte-level structural comparison.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use aegis_core::config::ConflictResolution;
use aegis_stores::StoreKind;

/// Maximum conflicts retained in memory; resolved records are evicted
/// first once the cap is reached.
pub const CONFLICT_LOG_CAPACITY: usize = 10_000;

/// How the conflicting write pair relates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    /// Both sides created the entity independently.
    Create,
    /// Both sides updated an existing entity.
    Update,
    /// One side deleted while the other wrote.
    Delete,
}

/// Resolution lifecycle of a conflict record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionState {
    /// Awaiting automatic or operator resolution.
    Pending,
    /// A winning payload was written to the target region.
    Resolved,
    /// Flagged for operator action under the manual policy.
    Manual,
}

/// Which side of a conflict wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// The source (primary) payload wins.
    Source,
    /// The target payload wins.
    Target,
}

/// Operator resolution choice.
#[derive(Debug, Clone)]
pub enum ResolutionChoice {
    /// Apply the recorded source payload.
    Source,
    /// Keep the recorded target payload.
    Target,
    /// Apply a literal replacement payload.
    Custom(Vec<u8>),
}

/// One recorded conflict. Append-only until resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    /// Record id.
    pub id: uuid::Uuid,
    /// When the conflict was detected.
    pub detected_at: chrono::DateTime<chrono::Utc>,
    /// Store the entity lives in.
    pub store: StoreKind,
    /// Collection, measurement, or keyspace.
    pub container: String,
    /// Entity id within the container.
    pub entity_id: String,
    /// Region the source payload came from.
    pub source_region: String,
    /// Region holding the conflicting payload.
    pub target_region: String,
    /// Conflict kind.
    pub kind: ConflictKind,
    /// Opaque source payload.
    pub source_payload: Vec<u8>,
    /// Opaque target payload.
    pub target_payload: Vec<u8>,
    /// Decoded source timestamp, if any.
    pub source_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    /// Decoded target timestamp, if any.
    pub target_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    /// Resolution state.
    pub resolution: ResolutionState,
}

impl ConflictRecord {
    /// Whether two payload/timestamp pairs are in conflict: a timestamp
    /// mismatch when both sides carry one, otherwise a byte-level
    /// difference.
    pub fn is_conflicting(
        source_payload: &[u8],
        source_ts: Option<chrono::DateTime<chrono::Utc>>,
        target_payload: &[u8],
        target_ts: Option<chrono::DateTime<chrono::Utc>>,
    ) -> bool {
        match (source_ts, target_ts) {
            (Some(s), Some(t)) => s != t || source_payload != target_payload,
            _ => source_payload != target_payload,
        }
    }

    /// Decide the winner under an automatic policy; `None` under manual.
    ///
    /// Both automatic policies compare the decoded timestamps (the
    /// `updatedAt` > `createdAt` > `timestamp` hierarchy, absent fields
    /// reading as epoch 0) and break ties toward the source for
    /// determinism.
    pub fn decide(&self, policy: ConflictResolution) -> Option<Winner> {
        match policy {
            ConflictResolution::Manual => None,
            ConflictResolution::LastWriteWins | ConflictResolution::TimestampBased => {
                let epoch = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(0)
                    .unwrap_or_else(chrono::Utc::now);
                let source = self.source_timestamp.unwrap_or(epoch);
                let target = self.target_timestamp.unwrap_or(epoch);
                if target > source {
                    Some(Winner::Target)
                } else {
                    Some(Winner::Source)
                }
            }
        }
    }
}

/// Append-only in-memory conflict log with a single resolver path.
pub struct ConflictLog {
    entries: RwLock<VecDeque<ConflictRecord>>,
    capacity: usize,
}

impl Default for ConflictLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictLog {
    /// Log with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(CONFLICT_LOG_CAPACITY)
    }

    /// Log with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append a record, evicting the oldest resolved record (or the
    /// oldest overall) past capacity.
    pub fn append(&self, record: ConflictRecord) {
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            if let Some(pos) = entries
                .iter()
                .position(|c| c.resolution == ResolutionState::Resolved)
            {
                entries.remove(pos);
            } else {
                entries.pop_front();
            }
        }
        entries.push_back(record);
    }

    /// Snapshot of all records, oldest first.
    pub fn list(&self) -> Vec<ConflictRecord> {
        self.entries.read().iter().cloned().collect()
    }

    /// Records still awaiting resolution.
    pub fn unresolved(&self) -> Vec<ConflictRecord> {
        self.entries
            .read()
            .iter()
            .filter(|c| c.resolution != ResolutionState::Resolved)
            .cloned()
            .collect()
    }

    /// Look up one record.
    pub fn get(&self, id: uuid::Uuid) -> Option<ConflictRecord> {
        self.entries.read().iter().find(|c| c.id == id).cloned()
    }

    /// Mark a record resolved. Concurrent resolutions of the same id
    /// serialize here, last write winning.
    pub fn mark_resolved(&self, id: uuid::Uuid) -> bool {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|c| c.id == id) {
            Some(record) => {
                record.resolution = ResolutionState::Resolved;
                true
            }
            None => false,
        }
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        source_ts: Option<&str>,
        target_ts: Option<&str>,
        resolution: ResolutionState,
    ) -> ConflictRecord {
        let parse = |s: &str| {
            chrono::DateTime::parse_from_rfc3339(s)
                .unwrap()
                .with_timezone(&chrono::Utc)
        };
        ConflictRecord {
            id: uuid::Uuid::new_v4(),
            detected_at: chrono::Utc::now(),
            store: StoreKind::Mongodb,
            container: "items".to_string(),
            entity_id: "a".to_string(),
            source_region: "east".to_string(),
            target_region: "west".to_string(),
            kind: ConflictKind::Update,
            source_payload: b"{\"v\":\"P\"}".to_vec(),
            target_payload: b"{\"v\":\"S\"}".to_vec(),
            source_timestamp: source_ts.map(parse),
            target_timestamp: target_ts.map(parse),
            resolution,
        }
    }

    #[test]
    fn test_last_write_wins_newer_source() {
        let record = record(
            Some("2024-01-01T00:00:10Z"),
            Some("2024-01-01T00:00:05Z"),
            ResolutionState::Pending,
        );
        assert_eq!(
            record.decide(ConflictResolution::LastWriteWins),
            Some(Winner::Source)
        );
    }

    #[test]
    fn test_last_write_wins_newer_target() {
        let record = record(
            Some("2024-01-01T00:00:05Z"),
            Some("2024-01-01T00:00:10Z"),
            ResolutionState::Pending,
        );
        assert_eq!(
            record.decide(ConflictResolution::LastWriteWins),
            Some(Winner::Target)
        );
    }

    #[test]
    fn test_tie_goes_to_source() {
        let record = record(
            Some("2024-01-01T00:00:10Z"),
            Some("2024-01-01T00:00:10Z"),
            ResolutionState::Pending,
        );
        assert_eq!(
            record.decide(ConflictResolution::LastWriteWins),
            Some(Winner::Source)
        );
    }

    #[test]
    fn test_missing_timestamps_read_as_epoch() {
        let record = record(None, Some("2024-01-01T00:00:10Z"), ResolutionState::Pending);
        assert_eq!(
            record.decide(ConflictResolution::TimestampBased),
            Some(Winner::Target)
        );
    }

    #[test]
    fn test_manual_policy_decides_nothing() {
        let record = record(
            Some("2024-01-01T00:00:10Z"),
            Some("2024-01-01T00:00:05Z"),
            ResolutionState::Pending,
        );
        assert_eq!(record.decide(ConflictResolution::Manual), None);
    }

    #[test]
    fn test_structural_comparison_without_timestamps() {
        assert!(ConflictRecord::is_conflicting(b"{\"a\":1}", None, b"{\"a\":2}", None));
        assert!(!ConflictRecord::is_conflicting(b"{\"a\":1}", None, b"{\"a\":1}", None));
    }

    #[test]
    fn test_log_eviction_prefers_resolved() {
        let log = ConflictLog::with_capacity(2);
        let resolved = record(None, None, ResolutionState::Resolved);
        let resolved_id = resolved.id;
        let pending = record(None, None, ResolutionState::Pending);
        let pending_id = pending.id;
        log.append(resolved);
        log.append(pending);
        log.append(record(None, None, ResolutionState::Pending));

        assert_eq!(log.len(), 2);
        assert!(log.get(resolved_id).is_none());
        assert!(log.get(pending_id).is_some());
    }

    #[test]
    fn test_mark_resolved() {
        let log = ConflictLog::new();
        let entry = record(None, None, ResolutionState::Manual);
        let id = entry.id;
        log.append(entry);

        assert!(log.mark_resolved(id));
        assert_eq!(log.get(id).unwrap().resolution, ResolutionState::Resolved);
        assert!(log.unresolved().is_empty());
        assert!(!log.mark_resolved(uuid::Uuid::new_v4()));
    }
}
