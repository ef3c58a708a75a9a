//! Planner tests over a real catalog in local object storage.

use std::sync::Arc;

use aegis_backup::{
    create_storage_backend, BackupCatalog, BackupKind, BackupRecord, RetentionTier,
    StorageBackend, StorageLocator,
};
use aegis_core::config::StorageSettings;
use aegis_recovery::{RecoveryError, RecoveryPlanner, StepAction, StepCategory};

fn record(id: &str, kind: BackupKind, timestamp: &str, base_id: Option<&str>) -> BackupRecord {
    BackupRecord {
        id: id.to_string(),
        kind,
        timestamp: chrono::DateTime::parse_from_rfc3339(timestamp)
            .unwrap()
            .with_timezone(&chrono::Utc),
        stores: Vec::new(),
        total_size_bytes: 1024,
        duration_ms: 1000,
        success: true,
        errors: Vec::new(),
        locator: StorageLocator {
            bucket: "dr".to_string(),
            prefix: "backups".to_string(),
        },
        tier: RetentionTier::Daily,
        encrypted: false,
        base_id: base_id.map(str::to_string),
    }
}

async fn catalog() -> (BackupCatalog, tempfile::TempDir) {
    let root = tempfile::tempdir().unwrap();
    let storage: Arc<dyn StorageBackend> = Arc::from(
        create_storage_backend(&StorageSettings::Local {
            root: root.path().to_path_buf(),
        })
        .await
        .unwrap(),
    );
    (BackupCatalog::new(storage), root)
}

fn pit(timestamp: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .unwrap()
        .with_timezone(&chrono::Utc)
}

#[tokio::test]
async fn test_plan_full_requires_a_backup() {
    let (catalog, _root) = catalog().await;
    let planner = RecoveryPlanner::new(catalog);
    assert!(matches!(
        planner.plan_full("west").await,
        Err(RecoveryError::NoBackup)
    ));
}

#[tokio::test]
async fn test_plan_full_is_the_canonical_chain() {
    let (catalog, _root) = catalog().await;
    catalog
        .store(&record("full-1", BackupKind::Full, "2024-06-01T00:00:00Z", None))
        .await
        .unwrap();

    let planner = RecoveryPlanner::new(catalog);
    let plan = planner.plan_full("west").await.unwrap();

    assert_eq!(plan.steps.len(), 4);
    assert_eq!(plan.backup_id.as_deref(), Some("full-1"));
    let categories: Vec<StepCategory> = plan.steps.iter().map(|s| s.category).collect();
    assert_eq!(
        categories,
        vec![
            StepCategory::Database,
            StepCategory::Application,
            StepCategory::Network,
            StepCategory::Validation,
        ]
    );

    // Linear dependency chain.
    for pair in plan.steps.windows(2) {
        assert_eq!(pair[1].dependencies, vec![pair[0].id]);
    }
    assert!(plan.estimated_secs > 0);
}

#[tokio::test]
async fn test_point_in_time_without_coverage_fails_at_plan_time() {
    let (catalog, _root) = catalog().await;
    // Only a full AFTER the requested point exists.
    catalog
        .store(&record("full-2", BackupKind::Full, "2024-06-10T00:00:00Z", None))
        .await
        .unwrap();

    let planner = RecoveryPlanner::new(catalog);
    let result = planner
        .plan_point_in_time("west", pit("2024-06-05T00:00:00Z"))
        .await;
    assert!(matches!(result, Err(RecoveryError::NoCoverage(_))));
}

#[tokio::test]
async fn test_point_in_time_selects_ordered_chain() {
    let (catalog, _root) = catalog().await;
    catalog
        .store(&record("full-1", BackupKind::Full, "2024-06-01T00:00:00Z", None))
        .await
        .unwrap();
    catalog
        .store(&record(
            "incr-1",
            BackupKind::Incremental,
            "2024-06-02T00:00:00Z",
            Some("full-1"),
        ))
        .await
        .unwrap();
    catalog
        .store(&record(
            "incr-2",
            BackupKind::Incremental,
            "2024-06-03T00:00:00Z",
            Some("full-1"),
        ))
        .await
        .unwrap();
    // Outside the window: after the requested point.
    catalog
        .store(&record(
            "incr-3",
            BackupKind::Incremental,
            "2024-06-08T00:00:00Z",
            Some("full-1"),
        ))
        .await
        .unwrap();

    let planner = RecoveryPlanner::new(catalog);
    let plan = planner
        .plan_point_in_time("west", pit("2024-06-04T00:00:00Z"))
        .await
        .unwrap();

    let restore = &plan.steps[0];
    match &restore.action {
        StepAction::RestoreBackups { backup_ids, .. } => {
            assert_eq!(backup_ids, &["full-1", "incr-1", "incr-2"]);
        }
        other => panic!("unexpected action: {:?}", other),
    }
}

#[tokio::test]
async fn test_newest_covering_full_is_selected() {
    let (catalog, _root) = catalog().await;
    catalog
        .store(&record("full-1", BackupKind::Full, "2024-06-01T00:00:00Z", None))
        .await
        .unwrap();
    catalog
        .store(&record("full-2", BackupKind::Full, "2024-06-05T00:00:00Z", None))
        .await
        .unwrap();
    catalog
        .store(&record(
            "incr-old",
            BackupKind::Incremental,
            "2024-06-02T00:00:00Z",
            Some("full-1"),
        ))
        .await
        .unwrap();

    let planner = RecoveryPlanner::new(catalog);
    let plan = planner
        .plan_point_in_time("west", pit("2024-06-06T00:00:00Z"))
        .await
        .unwrap();

    // The older incremental predates the chosen full and is excluded.
    assert_eq!(plan.backup_id.as_deref(), Some("full-2"));
    match &plan.steps[0].action {
        StepAction::RestoreBackups { backup_ids, .. } => {
            assert_eq!(backup_ids, &["full-2"]);
        }
        other => panic!("unexpected action: {:?}", other),
    }
}

#[tokio::test]
async fn test_partial_plan_limits_stores() {
    let (catalog, _root) = catalog().await;
    catalog
        .store(&record("full-1", BackupKind::Full, "2024-06-01T00:00:00Z", None))
        .await
        .unwrap();

    let planner = RecoveryPlanner::new(catalog);
    let plan = planner
        .plan_partial("west", vec![aegis_stores::StoreKind::Redis], None)
        .await
        .unwrap();

    assert_eq!(plan.steps.len(), 2);
    match &plan.steps[0].action {
        StepAction::RestoreBackups { stores, .. } => {
            assert_eq!(stores.as_deref(), Some(&[aegis_stores::StoreKind::Redis][..]));
        }
        other => panic!("unexpected action: {:?}", other),
    }
}
