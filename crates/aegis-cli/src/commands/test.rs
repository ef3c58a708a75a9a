//! DR self-tests: exercise the backup, replication, and failover
//! machinery end-to-end against in-process stores, without touching
//! production infrastructure.

use clap::{Parser, ValueEnum};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use aegis_backup::{create_storage_backend, BackupEngine, StorageBackend};
use aegis_core::config::{
    BackupSettings, ConflictResolution, EncryptionSettings, RetentionSettings, StorageSettings,
};
use aegis_core::notify::Notifier;
use aegis_failover::{FailoverOrchestrator, LoggingController, LoggingRouter};
use aegis_replication::{Replicator, ReplicatorConfig};
use aegis_stores::{
    MemoryDocumentStore, MemoryDumper, MemoryKeyValueStore, MemoryTimeSeriesStore, RegionStores,
    StoreDumper,
};

use super::utils::{info, success};
use crate::app::App;

#[derive(Parser)]
pub struct TestArgs {
    /// Which self-test subset to run
    #[arg(long = "type", value_enum)]
    pub kind: TestKind,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum TestKind {
    Full,
    Backup,
    Replication,
    Failover,
}

struct MemoryRegion {
    documents: Arc<MemoryDocumentStore>,
    series: Arc<MemoryTimeSeriesStore>,
    keys: Arc<MemoryKeyValueStore>,
    stores: RegionStores,
}

fn memory_region() -> MemoryRegion {
    let documents = Arc::new(MemoryDocumentStore::new());
    let series = Arc::new(MemoryTimeSeriesStore::new());
    let keys = Arc::new(MemoryKeyValueStore::new());
    let stores = RegionStores {
        documents: documents.clone(),
        series: series.clone(),
        keys: keys.clone(),
    };
    MemoryRegion {
        documents,
        series,
        keys,
        stores,
    }
}

fn memory_dumpers(region: &MemoryRegion) -> Vec<Arc<dyn StoreDumper>> {
    vec![
        Arc::new(MemoryDumper::Documents(Arc::clone(&region.documents))),
        Arc::new(MemoryDumper::Series(Arc::clone(&region.series))),
        Arc::new(MemoryDumper::Keys(Arc::clone(&region.keys))),
    ]
}

fn scratch_settings(app: &App, root: &std::path::Path) -> BackupSettings {
    BackupSettings {
        databases: app.config.disaster_recovery.backup.databases.clone(),
        storage: StorageSettings::Local {
            root: root.to_path_buf(),
        },
        retention: RetentionSettings {
            daily: 7,
            weekly: 4,
            monthly: 12,
        },
        encryption: EncryptionSettings::default(),
    }
}

pub async fn execute(app: App, args: TestArgs) -> anyhow::Result<()> {
    match args.kind {
        TestKind::Backup => test_backup(&app).await?,
        TestKind::Replication => test_replication(&app).await?,
        TestKind::Failover => test_failover(&app).await?,
        TestKind::Full => {
            test_config(&app)?;
            test_backup(&app).await?;
            test_replication(&app).await?;
            test_failover(&app).await?;
        }
    }
    success("DR self-tests passed");
    Ok(())
}

fn test_config(app: &App) -> anyhow::Result<()> {
    // Load-time validation already ran; report the validated topology.
    info(&format!(
        "config: {} regions, primary {}, {} secondaries",
        app.config.replication.regions.len(),
        app.config.primary_region().name,
        app.config.secondary_regions().len()
    ));
    Ok(())
}

async fn test_backup(app: &App) -> anyhow::Result<()> {
    let scratch = tempfile::tempdir()?;
    let settings = scratch_settings(app, scratch.path());
    let storage: Arc<dyn StorageBackend> =
        Arc::from(create_storage_backend(&settings.storage).await?);

    let source = memory_region();
    source
        .documents
        .insert_json("items", serde_json::json!({"_id": "1", "v": "a"}));
    source
        .documents
        .insert_json("items", serde_json::json!({"_id": "2", "v": "b"}));

    let engine = BackupEngine::new(
        storage,
        memory_dumpers(&source),
        &settings,
        Arc::clone(&app.metrics),
        Arc::clone(&app.events),
    );

    let cancel = CancellationToken::new();
    let record = engine.full_backup(&cancel).await;
    if !record.success {
        anyhow::bail!("backup self-test failed: {}", record.errors.join("; "));
    }

    let target = memory_region();
    engine
        .restore_record(&record, &memory_dumpers(&target), &cancel)
        .await?;
    if target.documents.len() != 2 {
        anyhow::bail!("backup self-test failed: restore produced an incomplete document set");
    }

    info(&format!(
        "backup: round-trip of {} bytes via {} verified",
        record.total_size_bytes,
        settings.storage.bucket_name()
    ));
    Ok(())
}

async fn test_replication(app: &App) -> anyhow::Result<()> {
    let east = memory_region();
    let west = memory_region();

    east.documents.insert_json(
        "items",
        serde_json::json!({"_id": "a", "v": "P", "updatedAt": "2024-01-01T00:00:10Z"}),
    );
    west.documents.insert_json(
        "items",
        serde_json::json!({"_id": "a", "v": "S", "updatedAt": "2024-01-01T00:00:05Z"}),
    );

    let mut regions = HashMap::new();
    regions.insert("test-east".to_string(), east.stores.clone());
    regions.insert("test-west".to_string(), west.stores.clone());

    let replicator = Replicator::new(
        regions,
        ReplicatorConfig {
            primary: "test-east".to_string(),
            secondaries: vec!["test-west".to_string()],
            sync_interval: Duration::from_secs(30),
            health_interval: Duration::from_secs(30),
            policy: ConflictResolution::LastWriteWins,
        },
        Arc::clone(&app.events),
        Arc::clone(&app.metrics),
    )?;

    let counters = replicator
        .sync_region_once("test-west", &CancellationToken::new())
        .await?;

    let resolved = west
        .documents
        .get_json("items", "a")
        .and_then(|v| v.get("v").cloned());
    if resolved != Some(serde_json::json!("P")) {
        anyhow::bail!("replication self-test failed: last-write-wins did not apply the source");
    }
    if counters.conflicts != 1 || replicator.conflicts().len() != 1 {
        anyhow::bail!("replication self-test failed: conflict was not recorded");
    }

    info("replication: sync pass and last-write-wins conflict resolution verified");
    Ok(())
}

async fn test_failover(app: &App) -> anyhow::Result<()> {
    let east = memory_region();
    let west = memory_region();

    let mut regions = HashMap::new();
    regions.insert("test-east".to_string(), east.stores.clone());
    regions.insert("test-west".to_string(), west.stores.clone());

    let replicator = Replicator::new(
        regions.clone(),
        ReplicatorConfig {
            primary: "test-east".to_string(),
            secondaries: vec!["test-west".to_string()],
            sync_interval: Duration::from_secs(30),
            health_interval: Duration::from_secs(30),
            policy: ConflictResolution::LastWriteWins,
        },
        Arc::clone(&app.events),
        Arc::clone(&app.metrics),
    )?;

    let orchestrator = FailoverOrchestrator::new(
        regions,
        vec!["test-west".to_string()],
        "test-east",
        Arc::new(LoggingRouter),
        Arc::new(LoggingController),
        replicator,
        false,
        Duration::from_secs(15 * 60),
        Arc::clone(&app.metrics),
        Arc::clone(&app.events),
        Arc::new(Notifier::disabled()),
    );

    let event = orchestrator
        .execute_failover("test-west", "self-test")
        .await?;
    let status = orchestrator.status().await;
    if status.active_region != "test-west" || !event.success {
        anyhow::bail!("failover self-test failed: promotion did not commit");
    }

    info(&format!(
        "failover: validated protocol committed in {} ms",
        event.duration_ms
    ));
    Ok(())
}
