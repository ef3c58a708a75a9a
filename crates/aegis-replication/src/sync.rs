//! Per-store sync passes.
//!
//! Each pass takes a cancellation token and observes it between stores
//! and between items; there is no unbounded section. Per-item data
//! errors are counted and skipped, never aborting the pass.

use tokio_util::sync::CancellationToken;

use aegis_core::config::ConflictResolution;
use aegis_core::events::{DrEvent, EventBus};
use aegis_stores::{RegionStores, StoreError, StoreKind};

use crate::conflict::{
    ConflictKind, ConflictLog, ConflictRecord, ResolutionState, Winner,
};
use crate::error::{ReplicationError, Result};

/// Scan page size for the key-value keyspace walk.
const SCAN_PAGE: usize = 256;

/// Counters accumulated over one sync pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassCounters {
    /// Documents transferred.
    pub documents: u64,
    /// Time-series points transferred.
    pub points: u64,
    /// Keys transferred.
    pub keys: u64,
    /// Payload bytes transferred.
    pub bytes: u64,
    /// Items skipped on data errors.
    pub skipped: u64,
    /// Conflicts recorded.
    pub conflicts: u64,
}

impl PassCounters {
    /// Total items transferred.
    pub fn items(&self) -> u64 {
        self.documents + self.points + self.keys
    }

    fn merge(&mut self, other: PassCounters) {
        self.documents += other.documents;
        self.points += other.points;
        self.keys += other.keys;
        self.bytes += other.bytes;
        self.skipped += other.skipped;
        self.conflicts += other.conflicts;
    }
}

/// Everything one region's sync pass needs.
pub struct SyncContext<'a> {
    /// Primary region stores.
    pub source: &'a RegionStores,
    /// Secondary region stores.
    pub target: &'a RegionStores,
    /// Primary region name.
    pub source_region: &'a str,
    /// Secondary region name.
    pub target_region: &'a str,
    /// Lower bound of the change window; `None` replicates everything.
    pub last_sync: Option<chrono::DateTime<chrono::Utc>>,
    /// Conflict resolution policy.
    pub policy: ConflictResolution,
    /// Conflict log.
    pub conflicts: &'a ConflictLog,
    /// Event bus.
    pub events: &'a EventBus,
    /// Cancellation token, observed at least once per item.
    pub cancel: &'a CancellationToken,
}

impl<'a> SyncContext<'a> {
    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ReplicationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Run the full pass: documents, then points, then keys.
pub async fn sync_all(ctx: &SyncContext<'_>) -> Result<PassCounters> {
    let mut counters = PassCounters::default();
    counters.merge(sync_documents(ctx).await?);
    ctx.check_cancelled()?;
    counters.merge(sync_series(ctx).await?);
    ctx.check_cancelled()?;
    counters.merge(sync_keys(ctx).await?);
    Ok(counters)
}

/// Mirror changed documents, routing differing counterparts through
/// conflict detection.
pub async fn sync_documents(ctx: &SyncContext<'_>) -> Result<PassCounters> {
    let mut counters = PassCounters::default();

    for collection in ctx.source.documents.collections().await? {
        ctx.check_cancelled()?;

        let changed = ctx
            .source
            .documents
            .changed_since(&collection, ctx.last_sync)
            .await?;

        for version in changed {
            ctx.check_cancelled()?;

            if version.id.is_empty() {
                counters.skipped += 1;
                continue;
            }

            let counterpart = match ctx.target.documents.fetch(&collection, &version.id).await {
                Ok(counterpart) => counterpart,
                Err(StoreError::Data(message)) => {
                    tracing::warn!(collection, id = %version.id, %message, "skipping document");
                    counters.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match counterpart {
                Some(existing)
                    if ConflictRecord::is_conflicting(
                        &version.payload,
                        version.updated_at,
                        &existing.payload,
                        existing.updated_at,
                    ) =>
                {
                    let record = ConflictRecord {
                        id: uuid::Uuid::new_v4(),
                        detected_at: chrono::Utc::now(),
                        store: StoreKind::Mongodb,
                        container: collection.clone(),
                        entity_id: version.id.clone(),
                        source_region: ctx.source_region.to_string(),
                        target_region: ctx.target_region.to_string(),
                        kind: ConflictKind::Update,
                        source_payload: version.payload.clone(),
                        target_payload: existing.payload.clone(),
                        source_timestamp: version.updated_at,
                        target_timestamp: existing.updated_at,
                        resolution: ResolutionState::Pending,
                    };
                    counters.conflicts += 1;
                    resolve_or_record(ctx, record, &collection, &version).await?;
                }
                Some(_) => {
                    // Payloads already match; nothing to write.
                }
                None => {
                    counters.bytes += version.payload.len() as u64;
                    match ctx.target.documents.upsert(&collection, &version).await {
                        Ok(()) => counters.documents += 1,
                        Err(StoreError::Data(message)) => {
                            tracing::warn!(collection, id = %version.id, %message, "skipping document");
                            counters.skipped += 1;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    Ok(counters)
}

async fn resolve_or_record(
    ctx: &SyncContext<'_>,
    mut record: ConflictRecord,
    collection: &str,
    source: &aegis_stores::DocumentVersion,
) -> Result<()> {
    match record.decide(ctx.policy) {
        Some(winner) => {
            // A winning target payload already sits in the target region;
            // only a winning source needs a write.
            if winner == Winner::Source {
                ctx.target.documents.upsert(collection, source).await?;
            }
            record.resolution = ResolutionState::Resolved;
            let (id, container, entity_id) =
                (record.id, record.container.clone(), record.entity_id.clone());
            ctx.conflicts.append(record);
            ctx.events.publish(DrEvent::ConflictDetected {
                id,
                store: StoreKind::Mongodb.to_string(),
                container,
                entity_id,
                manual: false,
            });
        }
        None => {
            record.resolution = ResolutionState::Manual;
            let (id, container, entity_id) =
                (record.id, record.container.clone(), record.entity_id.clone());
            ctx.conflicts.append(record);
            ctx.events.publish(DrEvent::ConflictDetected {
                id,
                store: StoreKind::Mongodb.to_string(),
                container,
                entity_id,
                manual: true,
            });
        }
    }
    Ok(())
}

/// Mirror the time-series window `(last_sync, now]` into the target,
/// flushing at the end.
pub async fn sync_series(ctx: &SyncContext<'_>) -> Result<PassCounters> {
    let mut counters = PassCounters::default();

    let points = ctx
        .source
        .series
        .query_window(ctx.last_sync, chrono::Utc::now())
        .await?;

    for chunk in points.chunks(512) {
        ctx.check_cancelled()?;
        ctx.target.series.write_points(chunk).await?;
        counters.points += chunk.len() as u64;
        counters.bytes += chunk
            .iter()
            .map(|p| (p.measurement.len() + p.fields.len() * 16) as u64)
            .sum::<u64>();
    }

    ctx.target.series.flush().await?;
    Ok(counters)
}

/// Walk the keyspace with a cursor and reproduce each key in the target.
pub async fn sync_keys(ctx: &SyncContext<'_>) -> Result<PassCounters> {
    let mut counters = PassCounters::default();
    let mut cursor = 0u64;

    loop {
        ctx.check_cancelled()?;
        let (next, keys) = ctx.source.keys.scan_page(cursor, SCAN_PAGE).await?;

        for key in keys {
            ctx.check_cancelled()?;

            let record = match ctx.source.keys.read_key(&key).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(StoreError::Data(message)) => {
                    tracing::warn!(key, %message, "skipping key");
                    counters.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            counters.bytes += estimate_key_bytes(&record);
            match ctx.target.keys.write_key(&record).await {
                Ok(()) => counters.keys += 1,
                Err(StoreError::Data(message)) => {
                    tracing::warn!(key, %message, "skipping key");
                    counters.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if next == 0 {
            break;
        }
        cursor = next;
    }

    Ok(counters)
}

fn estimate_key_bytes(record: &aegis_stores::KeyRecord) -> u64 {
    use aegis_stores::KeyValuePayload;
    let value_len = match &record.value {
        KeyValuePayload::Text(v) => v.len(),
        KeyValuePayload::Hash(entries) => entries.iter().map(|(k, v)| k.len() + v.len()).sum(),
        KeyValuePayload::List(items) => items.iter().map(String::len).sum(),
        KeyValuePayload::Set(members) => members.iter().map(String::len).sum(),
        KeyValuePayload::SortedSet(members) => {
            members.iter().map(|(m, _)| m.len() + 8).sum()
        }
    };
    (record.key.len() + value_len) as u64
}
