//! Process-wide disaster-recovery data model.
//!
//! `DisasterRecoveryStatus` is exclusively owned by the failover
//! orchestrator; every other component reads immutable snapshots taken
//! through `clone()`.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Maximum number of failover events retained in the status ring.
pub const FAILOVER_RING_CAPACITY: usize = 64;

/// Replication health of a secondary region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationState {
    /// The last sync pass completed without errors.
    Healthy,
    /// The last sync pass completed but skipped items or retried.
    Degraded,
    /// The last sync pass could not progress.
    Failed,
}

/// Replication status for one secondary region. Mutated only by the
/// replicator's sync task for that region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionReplicationStatus {
    /// Region name.
    pub region: String,
    /// Current replication state.
    pub state: ReplicationState,
    /// Wall time of the last successful sync pass.
    pub last_sync: Option<chrono::DateTime<chrono::Utc>>,
    /// Duration of the last sync pass, in milliseconds.
    pub lag_ms: u64,
    /// Last error observed, if any.
    pub last_error: Option<String>,
    /// Documents transferred since start.
    pub documents_synced: u64,
    /// Time-series points transferred since start.
    pub points_synced: u64,
    /// Keys transferred since start.
    pub keys_synced: u64,
    /// Bytes transferred since start.
    pub bytes_transferred: u64,
    /// Items skipped due to per-item data errors since start.
    pub items_skipped: u64,
}

impl RegionReplicationStatus {
    /// A fresh status for a region that has not synced yet.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            state: ReplicationState::Healthy,
            last_sync: None,
            lag_ms: 0,
            last_error: None,
            documents_synced: 0,
            points_synced: 0,
            keys_synced: 0,
            bytes_transferred: 0,
            items_skipped: 0,
        }
    }
}

/// Append-only audit record of one failover. Its terminal outcome is set
/// exactly once by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverEvent {
    /// Event id.
    pub id: uuid::Uuid,
    /// When the failover was initiated.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Region losing the primary role.
    pub from_region: String,
    /// Region gaining the primary role.
    pub to_region: String,
    /// Operator-supplied or automatic reason.
    pub reason: String,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
    /// Whether the failover committed.
    pub success: bool,
    /// Whether a rollback was performed.
    pub rolled_back: bool,
}

/// Process-wide DR state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisasterRecoveryStatus {
    /// Region currently holding the primary role.
    pub primary_region: String,
    /// Region currently serving traffic. Diverges from `primary_region`
    /// only mid-failover.
    pub active_region: String,
    /// Per-region replication snapshot.
    pub replication: HashMap<String, RegionReplicationStatus>,
    /// When the health monitor last completed a round.
    pub last_health_check: Option<chrono::DateTime<chrono::Utc>>,
    /// Aggregate health of the active region.
    pub healthy: bool,
    /// Recent failover events, newest last.
    pub recent_failovers: VecDeque<FailoverEvent>,
}

impl DisasterRecoveryStatus {
    /// Initial status with the given primary region.
    pub fn new(primary_region: impl Into<String>) -> Self {
        let primary = primary_region.into();
        Self {
            primary_region: primary.clone(),
            active_region: primary,
            replication: HashMap::new(),
            last_health_check: None,
            healthy: true,
            recent_failovers: VecDeque::new(),
        }
    }

    /// Record a failover event, evicting the oldest past capacity.
    pub fn push_failover(&mut self, event: FailoverEvent) {
        if self.recent_failovers.len() >= FAILOVER_RING_CAPACITY {
            self.recent_failovers.pop_front();
        }
        self.recent_failovers.push_back(event);
    }
}
