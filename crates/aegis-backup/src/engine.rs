//! Backup engine orchestration.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use aegis_core::config::{BackupSettings, EncryptionSettings, RetentionSettings};
use aegis_core::events::{DrEvent, EventBus};
use aegis_core::metrics::{names, MetricsRegistry};
use aegis_stores::{DumpContext, StoreDumper, StoreKind};

use crate::catalog::BackupCatalog;
use crate::error::{BackupError, Result};
use crate::record::{
    generate_backup_id, BackupKind, BackupRecord, RetentionTier, StorageLocator,
    StoreBackupResult,
};
use crate::retention::RetentionSweeper;
use crate::storage::{meta_keys, StorageBackend, UploadOptions};

/// Default per-store dump timeout.
const STORE_TIMEOUT: Duration = Duration::from_secs(600);

/// The backup engine. One instance per process; backup kinds are
/// serialized independently so a full and an incremental may coexist,
/// but never two of the same kind.
pub struct BackupEngine {
    storage: Arc<dyn StorageBackend>,
    catalog: BackupCatalog,
    dumpers: Vec<Arc<dyn StoreDumper>>,
    retention: RetentionSettings,
    encryption: EncryptionSettings,
    bucket: String,
    store_timeout: Duration,
    full_lock: Mutex<()>,
    incremental_lock: Mutex<()>,
    metrics: Arc<MetricsRegistry>,
    events: Arc<EventBus>,
}

impl BackupEngine {
    /// Create an engine over the given storage and per-store dumpers.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        dumpers: Vec<Arc<dyn StoreDumper>>,
        settings: &BackupSettings,
        metrics: Arc<MetricsRegistry>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            catalog: BackupCatalog::new(Arc::clone(&storage)),
            storage,
            dumpers,
            retention: settings.retention,
            encryption: settings.encryption.clone(),
            bucket: settings.storage.bucket_name(),
            store_timeout: STORE_TIMEOUT,
            full_lock: Mutex::new(()),
            incremental_lock: Mutex::new(()),
            metrics,
            events,
        }
    }

    /// Override the per-store timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// The engine's catalog.
    pub fn catalog(&self) -> &BackupCatalog {
        &self.catalog
    }

    /// Take a full backup tagged `daily`.
    pub async fn full_backup(&self, cancel: &CancellationToken) -> BackupRecord {
        self.full_backup_tagged(cancel, RetentionTier::Daily).await
    }

    /// Take a full backup with an explicit retention tier (used by
    /// scheduled weekly/monthly runs).
    pub async fn full_backup_tagged(
        &self,
        cancel: &CancellationToken,
        tier: RetentionTier,
    ) -> BackupRecord {
        let _guard = self.full_lock.lock().await;

        let started = std::time::Instant::now();
        let timestamp = chrono::Utc::now();
        let id = generate_backup_id(BackupKind::Full, timestamp);
        self.metrics.inc(names::BACKUP_TOTAL);
        tracing::info!(backup_id = %id, "starting full backup");

        let mut stores = Vec::new();
        for dumper in &self.dumpers {
            stores.push(
                self.run_store(dumper, &id, BackupKind::Full, None, timestamp, tier, cancel)
                    .await,
            );
        }

        let record =
            self.finish_record(id, BackupKind::Full, timestamp, stores, started, tier, None);
        self.store_record(&record).await;

        if record.success {
            let sweeper = RetentionSweeper::new(
                Arc::clone(&self.storage),
                self.catalog.clone(),
                self.retention,
            );
            match sweeper.sweep().await {
                Ok(report) if !report.deleted.is_empty() => {
                    tracing::info!(deleted = report.deleted.len(), "retention sweep complete");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "retention sweep failed"),
            }
        }

        self.publish_outcome(&record);
        record
    }

    /// Take an incremental backup: a delta since the last successful
    /// backup of each store, anchored on the most recent successful full.
    pub async fn incremental_backup(&self, cancel: &CancellationToken) -> BackupRecord {
        let _guard = self.incremental_lock.lock().await;

        let started = std::time::Instant::now();
        let timestamp = chrono::Utc::now();
        let id = generate_backup_id(BackupKind::Incremental, timestamp);
        self.metrics.inc(names::BACKUP_TOTAL);

        let base = match self.catalog.latest_successful_full().await {
            Ok(Some(base)) => base,
            Ok(None) => {
                let record = self.empty_failed_record(
                    id,
                    BackupKind::Incremental,
                    timestamp,
                    started,
                    "no successful full backup to base an incremental on",
                );
                self.store_record(&record).await;
                self.publish_outcome(&record);
                return record;
            }
            Err(e) => {
                let record = self.empty_failed_record(
                    id,
                    BackupKind::Incremental,
                    timestamp,
                    started,
                    format!("catalog unavailable: {}", e),
                );
                self.publish_outcome(&record);
                return record;
            }
        };

        let since = self.last_successful_per_store(&base).await;
        tracing::info!(backup_id = %id, base = %base.id, "starting incremental backup");

        let mut stores = Vec::new();
        for dumper in &self.dumpers {
            let store_since = since
                .iter()
                .find(|(kind, _)| *kind == dumper.kind())
                .map(|(_, ts)| *ts)
                .unwrap_or(base.timestamp);
            stores.push(
                self.run_store(
                    dumper,
                    &id,
                    BackupKind::Incremental,
                    Some(store_since),
                    timestamp,
                    RetentionTier::Daily,
                    cancel,
                )
                .await,
            );
        }

        let record = self.finish_record(
            id,
            BackupKind::Incremental,
            timestamp,
            stores,
            started,
            RetentionTier::Daily,
            Some(base.id),
        );
        self.store_record(&record).await;
        self.publish_outcome(&record);
        record
    }

    /// Apply one backup record to the given target dumpers, store by
    /// store. Fails on the first fatal error.
    pub async fn restore_record(
        &self,
        record: &BackupRecord,
        targets: &[Arc<dyn StoreDumper>],
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.restore_record_filtered(record, targets, None, cancel)
            .await
    }

    /// Apply one backup record, limited to a store subset when `stores`
    /// is given.
    pub async fn restore_record_filtered(
        &self,
        record: &BackupRecord,
        targets: &[Arc<dyn StoreDumper>],
        stores: Option<&[StoreKind]>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for store_result in &record.stores {
            if cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }
            if let Some(filter) = stores {
                if !filter.contains(&store_result.store) {
                    continue;
                }
            }
            if !store_result.success {
                return Err(BackupError::Restore(format!(
                    "backup {} has no usable {} archive",
                    record.id, store_result.store
                )));
            }
            let key = store_result.key.as_ref().ok_or_else(|| {
                BackupError::Restore(format!(
                    "backup {} is missing the {} object key",
                    record.id, store_result.store
                ))
            })?;

            let target = targets
                .iter()
                .find(|d| d.kind() == store_result.store)
                .ok_or_else(|| {
                    BackupError::Restore(format!(
                        "no restore target for store {}",
                        store_result.store
                    ))
                })?;

            let data = self.storage.download(key).await?;
            let scratch = tempfile::tempdir()?;
            let path = scratch
                .path()
                .join(format!("{}-{}.gz", store_result.store, record.id));
            tokio::fs::write(&path, &data).await?;

            let ctx = DumpContext::new()
                .with_cancel(cancel.child_token())
                .with_timeout(self.store_timeout);
            target.restore(&ctx, &path).await?;
            tracing::info!(backup_id = %record.id, store = %store_result.store, "store restored");
        }
        Ok(())
    }

    /// Per-store timestamp of the last successful backup, any kind.
    async fn last_successful_per_store(
        &self,
        base: &BackupRecord,
    ) -> Vec<(StoreKind, chrono::DateTime<chrono::Utc>)> {
        let records = self.catalog.list().await.unwrap_or_default();
        StoreKind::ALL
            .iter()
            .map(|kind| {
                let latest = records
                    .iter()
                    .filter(|r| {
                        r.store_result(*kind).map(|s| s.success).unwrap_or(false)
                    })
                    .map(|r| r.timestamp)
                    .max()
                    .unwrap_or(base.timestamp);
                (*kind, latest)
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_store(
        &self,
        dumper: &Arc<dyn StoreDumper>,
        id: &str,
        kind: BackupKind,
        since: Option<chrono::DateTime<chrono::Utc>>,
        timestamp: chrono::DateTime<chrono::Utc>,
        tier: RetentionTier,
        cancel: &CancellationToken,
    ) -> StoreBackupResult {
        let store = dumper.kind();
        if cancel.is_cancelled() {
            return StoreBackupResult::failed(store, "cancelled");
        }

        let scratch = match tempfile::tempdir() {
            Ok(scratch) => scratch,
            Err(e) => return StoreBackupResult::failed(store, e.to_string()),
        };
        let dest = scratch.path().join(format!("{}-{}.gz", store, id));

        let ctx = DumpContext::new()
            .with_cancel(cancel.child_token())
            .with_timeout(self.store_timeout);

        let artifact = match kind {
            BackupKind::Full => dumper.dump_full(&ctx, &dest).await,
            BackupKind::Incremental => {
                let since = since.unwrap_or(timestamp);
                dumper.dump_incremental(&ctx, since, &dest).await
            }
        };
        let artifact = match artifact {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!(store = %store, error = %e, "store dump failed");
                return StoreBackupResult::failed(store, e.to_string());
            }
        };

        let data = match tokio::fs::read(&artifact.path).await {
            Ok(data) => data,
            Err(e) => return StoreBackupResult::failed(store, e.to_string()),
        };

        let key = format!("backups/{}/{}.gz", store.as_str(), id);
        let options = self.upload_options(timestamp, tier);
        if let Err(e) = self.storage.upload(&key, Bytes::from(data), options).await {
            tracing::warn!(store = %store, error = %e, "archive upload failed");
            return StoreBackupResult::failed(store, e.to_string());
        }

        StoreBackupResult {
            store,
            size_bytes: artifact.size_bytes,
            success: true,
            error: None,
            collections: artifact.collections,
            key: Some(key),
        }
        // scratch drops here, deleting the local archive
    }

    fn upload_options(
        &self,
        timestamp: chrono::DateTime<chrono::Utc>,
        tier: RetentionTier,
    ) -> UploadOptions {
        let mut options = UploadOptions {
            content_type: Some("application/gzip".to_string()),
            encryption: self.encryption.enabled,
            encryption_key_id: self.encryption.key_id.clone(),
            ..Default::default()
        };
        options.metadata.insert(
            meta_keys::ENCRYPTED.to_string(),
            self.encryption.enabled.to_string(),
        );
        options.metadata.insert(
            meta_keys::TIMESTAMP.to_string(),
            timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        );
        options.metadata.insert(
            meta_keys::VERSION.to_string(),
            aegis_core::VERSION.to_string(),
        );
        options.metadata.insert(
            meta_keys::TIER.to_string(),
            format!("{:?}", tier).to_lowercase(),
        );
        options
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_record(
        &self,
        id: String,
        kind: BackupKind,
        timestamp: chrono::DateTime<chrono::Utc>,
        stores: Vec<StoreBackupResult>,
        started: std::time::Instant,
        tier: RetentionTier,
        base_id: Option<String>,
    ) -> BackupRecord {
        let success = stores.iter().all(|s| s.success);
        let errors: Vec<String> = stores.iter().filter_map(|s| s.error.clone()).collect();
        let total_size_bytes = stores.iter().map(|s| s.size_bytes).sum();

        if success {
            self.metrics.inc(names::BACKUP_SUCCESS_TOTAL);
        }
        self.metrics
            .set(names::BACKUP_SIZE_BYTES, total_size_bytes as f64);

        BackupRecord {
            locator: StorageLocator {
                bucket: self.bucket.clone(),
                prefix: "backups".to_string(),
            },
            id,
            kind,
            timestamp,
            stores,
            total_size_bytes,
            duration_ms: started.elapsed().as_millis() as u64,
            success,
            errors,
            tier,
            encrypted: self.encryption.enabled,
            base_id,
        }
    }

    fn empty_failed_record(
        &self,
        id: String,
        kind: BackupKind,
        timestamp: chrono::DateTime<chrono::Utc>,
        started: std::time::Instant,
        error: impl Into<String>,
    ) -> BackupRecord {
        BackupRecord {
            id,
            kind,
            timestamp,
            stores: Vec::new(),
            total_size_bytes: 0,
            duration_ms: started.elapsed().as_millis() as u64,
            success: false,
            errors: vec![error.into()],
            locator: StorageLocator {
                bucket: self.bucket.clone(),
                prefix: "backups".to_string(),
            },
            tier: RetentionTier::Daily,
            encrypted: self.encryption.enabled,
            base_id: None,
        }
    }

    async fn store_record(&self, record: &BackupRecord) {
        if let Err(e) = self.catalog.store(record).await {
            tracing::warn!(backup_id = %record.id, error = %e, "failed to persist backup record");
        }
    }

    fn publish_outcome(&self, record: &BackupRecord) {
        self.events.publish(DrEvent::BackupCompleted {
            backup_id: record.id.clone(),
            kind: record.kind.to_string(),
            success: record.success,
        });
        tracing::info!(
            backup_id = %record.id,
            success = record.success,
            size = record.total_size_bytes,
            duration_ms = record.duration_ms,
            "backup finished"
        );
    }
}
