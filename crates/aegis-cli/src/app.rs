//! Component wiring from configuration.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use aegis_backup::{create_storage_backend, BackupCatalog, BackupEngine, StorageBackend};
use aegis_core::config::{AegisConfig, StoreEndpoints};
use aegis_core::events::EventBus;
use aegis_core::metrics::MetricsRegistry;
use aegis_core::notify::Notifier;
use aegis_failover::{FailoverOrchestrator, LoggingController, LoggingRouter};
use aegis_recovery::{RecoveryEnvironment, RecoveryError, RecoveryPlanner};
use aegis_replication::{Replicator, ReplicatorConfig};
use aegis_stores::{
    InfluxBackupTool, InfluxTimeSeriesStore, MongoDocumentStore, MongoDumpTool,
    RedisKeyValueStore, RedisSnapshotTool, RegionStores, StoreDumper, StoreKind,
};

/// Default Redis snapshot location when the endpoint does not name one.
const DEFAULT_RDB_PATH: &str = "/var/lib/redis/dump.rdb";

/// Loaded configuration plus the shared platform services.
pub struct App {
    /// Validated configuration.
    pub config: AegisConfig,
    /// Shared event bus.
    pub events: Arc<EventBus>,
    /// Shared metrics registry.
    pub metrics: Arc<MetricsRegistry>,
    /// Configured notification sinks.
    pub notifier: Arc<Notifier>,
}

impl App {
    /// Load and validate the configuration file; configuration errors are
    /// fatal.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = AegisConfig::load(path)
            .map_err(|e| anyhow::anyhow!("{} ({})", e, path.display()))?;
        let notifier = Arc::new(Notifier::from_settings(
            &config.disaster_recovery.notifications,
        ));
        Ok(Self {
            config,
            events: Arc::new(EventBus::new()),
            metrics: Arc::new(MetricsRegistry::new()),
            notifier,
        })
    }

    /// Object storage backend for backups.
    pub async fn storage(&self) -> anyhow::Result<Arc<dyn StorageBackend>> {
        let backend =
            create_storage_backend(&self.config.disaster_recovery.backup.storage).await?;
        Ok(Arc::from(backend))
    }

    /// Connect production drivers for one endpoint set.
    pub async fn connect_stores(endpoints: &StoreEndpoints) -> anyhow::Result<RegionStores> {
        let documents = Arc::new(MongoDocumentStore::connect(&endpoints.mongodb).await?);
        let series = Arc::new(InfluxTimeSeriesStore::connect(&endpoints.influxdb));
        let keys = Arc::new(RedisKeyValueStore::connect(&endpoints.redis).await?);
        Ok(RegionStores {
            documents,
            series,
            keys,
        })
    }

    /// Connect every configured region.
    pub async fn connect_all_regions(&self) -> anyhow::Result<HashMap<String, RegionStores>> {
        let mut regions = HashMap::new();
        for region in &self.config.replication.regions {
            let stores = Self::connect_stores(&region.databases).await?;
            regions.insert(region.name.clone(), stores);
        }
        Ok(regions)
    }

    /// Production dumpers for one endpoint set.
    pub fn dumpers_for(
        endpoints: &StoreEndpoints,
        stores: &RegionStores,
    ) -> Vec<Arc<dyn StoreDumper>> {
        let snapshot_path: PathBuf = endpoints
            .redis
            .snapshot_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RDB_PATH));
        vec![
            Arc::new(MongoDumpTool::new(
                endpoints.mongodb.clone(),
                Arc::clone(&stores.documents),
            )),
            Arc::new(InfluxBackupTool::new(
                endpoints.influxdb.clone(),
                Arc::clone(&stores.series),
            )),
            Arc::new(RedisSnapshotTool::new(
                endpoints.redis.clone(),
                Arc::clone(&stores.keys),
                snapshot_path,
            )),
        ]
    }

    /// Backup engine over the primary-region endpoints.
    pub async fn backup_engine(&self) -> anyhow::Result<BackupEngine> {
        let settings = &self.config.disaster_recovery.backup;
        let storage = self.storage().await?;
        let stores = Self::connect_stores(&settings.databases).await?;
        let dumpers = Self::dumpers_for(&settings.databases, &stores);
        Ok(BackupEngine::new(
            storage,
            dumpers,
            settings,
            Arc::clone(&self.metrics),
            Arc::clone(&self.events),
        ))
    }

    /// Replicator over the given region stores.
    pub fn replicator(
        &self,
        regions: HashMap<String, RegionStores>,
    ) -> anyhow::Result<Replicator> {
        let dr = &self.config.disaster_recovery;
        let replicator = Replicator::new(
            regions,
            ReplicatorConfig {
                primary: self.config.primary_region().name.clone(),
                secondaries: self
                    .config
                    .secondary_regions()
                    .iter()
                    .map(|r| r.name.clone())
                    .collect(),
                sync_interval: Duration::from_secs(dr.replication.sync_interval),
                health_interval: Duration::from_secs(dr.recovery.health_check_interval),
                policy: self.config.replication.conflict_resolution,
            },
            Arc::clone(&self.events),
            Arc::clone(&self.metrics),
        )?;
        Ok(replicator)
    }

    /// Failover orchestrator over the given region stores.
    pub fn orchestrator(
        &self,
        regions: HashMap<String, RegionStores>,
        replicator: Replicator,
    ) -> FailoverOrchestrator {
        let dr = &self.config.disaster_recovery;
        FailoverOrchestrator::new(
            regions,
            self.config
                .secondary_regions()
                .iter()
                .map(|r| r.name.clone())
                .collect(),
            self.config.primary_region().name.clone(),
            Arc::new(LoggingRouter),
            Arc::new(LoggingController),
            replicator,
            dr.recovery.auto_failover,
            Duration::from_secs(dr.recovery.rto * 60),
            Arc::clone(&self.metrics),
            Arc::clone(&self.events),
            Arc::clone(&self.notifier),
        )
    }

    /// Recovery planner over the backup catalog.
    pub async fn planner(&self) -> anyhow::Result<RecoveryPlanner> {
        let storage = self.storage().await?;
        Ok(RecoveryPlanner::new(BackupCatalog::new(storage)))
    }
}

/// Recovery environment wired to the live backup engine and a target
/// region's stores.
pub struct LiveEnvironment {
    engine: BackupEngine,
    targets: Vec<Arc<dyn StoreDumper>>,
    target_stores: RegionStores,
}

impl LiveEnvironment {
    /// Build an environment restoring into `target_stores`.
    pub fn new(
        engine: BackupEngine,
        targets: Vec<Arc<dyn StoreDumper>>,
        target_stores: RegionStores,
    ) -> Self {
        Self {
            engine,
            targets,
            target_stores,
        }
    }
}

#[async_trait]
impl RecoveryEnvironment for LiveEnvironment {
    async fn restore_backups(
        &self,
        backup_ids: &[String],
        stores: Option<&[StoreKind]>,
        cancel: &CancellationToken,
    ) -> aegis_recovery::Result<()> {
        for id in backup_ids {
            let record = self.engine.catalog().load(id).await?;
            self.engine
                .restore_record_filtered(&record, &self.targets, stores, cancel)
                .await?;
        }
        Ok(())
    }

    async fn deploy_applications(
        &self,
        region: &str,
        _cancel: &CancellationToken,
    ) -> aegis_recovery::Result<()> {
        tracing::info!(region, "application rollout delegated to the deployment pipeline");
        Ok(())
    }

    async fn configure_networking(
        &self,
        region: &str,
        _cancel: &CancellationToken,
    ) -> aegis_recovery::Result<()> {
        tracing::info!(region, "routing update delegated to the network controller");
        Ok(())
    }

    async fn validate(
        &self,
        region: &str,
        _cancel: &CancellationToken,
    ) -> aegis_recovery::Result<()> {
        self.target_stores
            .ping_all()
            .await
            .map_err(|e| RecoveryError::Environment(format!("{}: {}", region, e)))
    }
}
