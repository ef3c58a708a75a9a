//! The replicator: per-region sync loops and the operator surface.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use aegis_core::config::ConflictResolution;
use aegis_core::events::{DrEvent, EventBus};
use aegis_core::metrics::{names, MetricsRegistry};
use aegis_core::status::{RegionReplicationStatus, ReplicationState};
use aegis_stores::{DocumentVersion, KeyRecord, RegionStores, SeriesPoint, StoreKind};

use crate::conflict::{ConflictLog, ConflictRecord, ResolutionChoice};
use crate::error::{ReplicationError, Result};
use crate::sync::{sync_all, PassCounters, SyncContext};

/// Connection retry attempts within one pass.
const PASS_RETRIES: u32 = 3;
/// Initial retry delay; doubles per attempt, capped at 30 seconds.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Replicator role assignment and cadence.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// Current primary region.
    pub primary: String,
    /// Secondary regions in priority order.
    pub secondaries: Vec<String>,
    /// Interval between sync passes per region.
    pub sync_interval: Duration,
    /// Interval between health probe rounds.
    pub health_interval: Duration,
    /// Conflict resolution policy.
    pub policy: ConflictResolution,
}

struct RunningState {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct ReplicatorInner {
    regions: HashMap<String, RegionStores>,
    config: parking_lot::RwLock<ReplicatorConfig>,
    statuses: DashMap<String, RegionReplicationStatus>,
    conflicts: ConflictLog,
    events: Arc<EventBus>,
    metrics: Arc<MetricsRegistry>,
    running: tokio::sync::Mutex<Option<RunningState>>,
}

/// Cross-region replicator. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Replicator {
    inner: Arc<ReplicatorInner>,
}

impl Replicator {
    /// Create a replicator over the given region stores.
    pub fn new(
        regions: HashMap<String, RegionStores>,
        config: ReplicatorConfig,
        events: Arc<EventBus>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self> {
        if !regions.contains_key(&config.primary) {
            return Err(ReplicationError::UnknownRegion(config.primary.clone()));
        }
        for secondary in &config.secondaries {
            if !regions.contains_key(secondary) {
                return Err(ReplicationError::UnknownRegion(secondary.clone()));
            }
        }

        let statuses = DashMap::new();
        for secondary in &config.secondaries {
            statuses.insert(
                secondary.clone(),
                RegionReplicationStatus::new(secondary.clone()),
            );
        }

        Ok(Self {
            inner: Arc::new(ReplicatorInner {
                regions,
                config: parking_lot::RwLock::new(config),
                statuses,
                conflicts: ConflictLog::new(),
                events,
                metrics,
                running: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// Launch the per-secondary sync loops and the health probe loop.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            return Err(ReplicationError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let (secondaries, sync_interval, health_interval) = {
            let config = self.inner.config.read();
            (
                config.secondaries.clone(),
                config.sync_interval,
                config.health_interval,
            )
        };

        for region in secondaries {
            let inner = Arc::clone(&self.inner);
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move {
                run_sync_loop(inner, region, sync_interval, token).await;
            }));
        }

        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            run_probe_loop(inner, health_interval, token).await;
        }));

        *running = Some(RunningState { cancel, tasks });
        tracing::info!("replication started");
        Ok(())
    }

    /// Cancel all loops and wait for them to drain.
    pub async fn stop(&self) -> Result<()> {
        let state = self
            .inner
            .running
            .lock()
            .await
            .take()
            .ok_or(ReplicationError::NotRunning)?;

        state.cancel.cancel();
        for task in state.tasks {
            let _ = task.await;
        }
        tracing::info!("replication stopped");
        Ok(())
    }

    /// Whether the loops are running.
    pub async fn is_running(&self) -> bool {
        self.inner.running.lock().await.is_some()
    }

    /// Stop, reassign the primary role, and restart if previously running.
    pub async fn switch_primary(&self, new_primary: &str) -> Result<()> {
        if !self.inner.regions.contains_key(new_primary) {
            return Err(ReplicationError::UnknownRegion(new_primary.to_string()));
        }

        let was_running = match self.stop().await {
            Ok(()) => true,
            Err(ReplicationError::NotRunning) => false,
            Err(e) => return Err(e),
        };

        {
            let mut config = self.inner.config.write();
            let old_primary = std::mem::replace(&mut config.primary, new_primary.to_string());
            config.secondaries.retain(|r| r != new_primary);
            if !config.secondaries.contains(&old_primary) {
                config.secondaries.push(old_primary.clone());
            }

            self.inner.statuses.remove(new_primary);
            self.inner
                .statuses
                .entry(old_primary.clone())
                .or_insert_with(|| RegionReplicationStatus::new(old_primary));
        }
        tracing::info!(primary = new_primary, "primary role reassigned");

        if was_running {
            self.start().await?;
        }
        Ok(())
    }

    /// Current primary region name.
    pub fn primary(&self) -> String {
        self.inner.config.read().primary.clone()
    }

    /// Snapshot of all per-region replication statuses.
    pub fn status(&self) -> Vec<RegionReplicationStatus> {
        let mut statuses: Vec<RegionReplicationStatus> = self
            .inner
            .statuses
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        statuses.sort_by(|a, b| a.region.cmp(&b.region));
        statuses
    }

    /// Snapshot of the conflict log.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.inner.conflicts.list()
    }

    /// Run one sync pass for a region immediately. Used by the loops, the
    /// DR self-tests, and the test suite.
    pub async fn sync_region_once(
        &self,
        region: &str,
        cancel: &CancellationToken,
    ) -> Result<PassCounters> {
        sync_region(&self.inner, region, cancel).await
    }

    /// Probe every region's stores once.
    pub async fn probe_regions_once(&self) {
        probe_regions(&self.inner).await;
    }

    /// Apply an operator resolution to a recorded conflict.
    pub async fn resolve_conflict(
        &self,
        id: uuid::Uuid,
        choice: ResolutionChoice,
    ) -> Result<ConflictRecord> {
        let record = self
            .inner
            .conflicts
            .get(id)
            .ok_or(ReplicationError::ConflictNotFound(id))?;

        let payload = match choice {
            ResolutionChoice::Source => record.source_payload.clone(),
            ResolutionChoice::Target => record.target_payload.clone(),
            ResolutionChoice::Custom(payload) => payload,
        };

        let target = self
            .inner
            .regions
            .get(&record.target_region)
            .ok_or_else(|| ReplicationError::UnknownRegion(record.target_region.clone()))?;

        match record.store {
            StoreKind::Mongodb => {
                let value: serde_json::Value = serde_json::from_slice(&payload)
                    .map_err(|e| ReplicationError::InvalidResolution(e.to_string()))?;
                let version = DocumentVersion::from_json(record.entity_id.clone(), &value);
                target
                    .documents
                    .upsert(&record.container, &version)
                    .await?;
            }
            StoreKind::Influxdb => {
                let point: SeriesPoint = serde_json::from_slice(&payload)
                    .map_err(|e| ReplicationError::InvalidResolution(e.to_string()))?;
                target.series.write_points(&[point]).await?;
                target.series.flush().await?;
            }
            StoreKind::Redis => {
                let key: KeyRecord = serde_json::from_slice(&payload)
                    .map_err(|e| ReplicationError::InvalidResolution(e.to_string()))?;
                target.keys.write_key(&key).await?;
            }
        }

        self.inner.conflicts.mark_resolved(id);
        Ok(self
            .inner
            .conflicts
            .get(id)
            .unwrap_or(record))
    }
}

async fn run_sync_loop(
    inner: Arc<ReplicatorInner>,
    region: String,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        match sync_region(&inner, &region, &cancel).await {
            Ok(_) => {}
            Err(ReplicationError::Cancelled) => break,
            Err(e) => tracing::warn!(region = %region, error = %e, "sync pass failed"),
        }
    }
}

async fn run_probe_loop(
    inner: Arc<ReplicatorInner>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        probe_regions(&inner).await;
    }
}

async fn probe_regions(inner: &Arc<ReplicatorInner>) {
    // Scoped to the secondaries this replicator feeds; primary health is
    // the health monitor's concern.
    let region_names: Vec<String> = inner.config.read().secondaries.clone();
    for name in region_names {
        let Some(stores) = inner.regions.get(&name) else {
            continue;
        };
        if let Err(e) = stores.ping_all().await {
            inner.metrics.inc(names::HEALTH_CHECK_FAILURES_TOTAL);
            inner.events.publish(DrEvent::RegionUnhealthy {
                region: name.clone(),
                message: e.to_string(),
            });
            if let Some(mut status) = inner.statuses.get_mut(&name) {
                status.state = ReplicationState::Failed;
                status.last_error = Some(e.to_string());
            }
            tracing::warn!(region = %name, error = %e, "region probe failed");
        }
    }
}

async fn sync_region(
    inner: &Arc<ReplicatorInner>,
    region: &str,
    cancel: &CancellationToken,
) -> Result<PassCounters> {
    let (primary, policy) = {
        let config = inner.config.read();
        (config.primary.clone(), config.policy)
    };

    let source = inner
        .regions
        .get(&primary)
        .ok_or_else(|| ReplicationError::UnknownRegion(primary.clone()))?;
    let target = inner
        .regions
        .get(region)
        .ok_or_else(|| ReplicationError::UnknownRegion(region.to_string()))?;

    let last_sync = inner
        .statuses
        .get(region)
        .and_then(|status| status.last_sync);

    let started = std::time::Instant::now();
    let ctx = SyncContext {
        source,
        target,
        source_region: &primary,
        target_region: region,
        last_sync,
        policy,
        conflicts: &inner.conflicts,
        events: &inner.events,
        cancel,
    };

    let result = run_with_retry(&ctx, cancel).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(counters) => {
            let completed = chrono::Utc::now();
            let mut status = inner
                .statuses
                .entry(region.to_string())
                .or_insert_with(|| RegionReplicationStatus::new(region));
            status.state = if counters.skipped > 0 {
                ReplicationState::Degraded
            } else {
                ReplicationState::Healthy
            };
            status.last_sync = Some(completed);
            status.lag_ms = elapsed_ms;
            status.last_error = None;
            status.documents_synced += counters.documents;
            status.points_synced += counters.points;
            status.keys_synced += counters.keys;
            status.bytes_transferred += counters.bytes;
            status.items_skipped += counters.skipped;
            drop(status);

            inner.events.publish(DrEvent::SyncCompleted {
                region: region.to_string(),
                items: counters.items(),
                duration_ms: elapsed_ms,
            });
            tracing::debug!(
                region,
                documents = counters.documents,
                points = counters.points,
                keys = counters.keys,
                "sync pass complete"
            );
            Ok(counters)
        }
        Err(ReplicationError::Cancelled) => Err(ReplicationError::Cancelled),
        Err(e) => {
            // Counters and last_sync from prior passes are preserved.
            if let Some(mut status) = inner.statuses.get_mut(region) {
                status.state = ReplicationState::Failed;
                status.last_error = Some(e.to_string());
                status.lag_ms = elapsed_ms;
            }
            Err(e)
        }
    }
}

/// Retry the pass on connection failures with doubling backoff.
async fn run_with_retry(
    ctx: &SyncContext<'_>,
    cancel: &CancellationToken,
) -> Result<PassCounters> {
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 0;

    loop {
        match sync_all(ctx).await {
            Ok(counters) => return Ok(counters),
            Err(ReplicationError::Store(aegis_stores::StoreError::Connection(message)))
                if attempt < PASS_RETRIES =>
            {
                attempt += 1;
                tracing::warn!(attempt, %message, "connection lost mid-pass, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ReplicationError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(RETRY_MAX_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
}
