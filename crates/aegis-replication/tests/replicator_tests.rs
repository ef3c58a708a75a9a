//! Replicator integration tests over in-memory region stores.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use aegis_core::config::ConflictResolution;
use aegis_core::events::EventBus;
use aegis_core::metrics::MetricsRegistry;
use aegis_core::status::ReplicationState;
use aegis_replication::{
    Replicator, ReplicatorConfig, ResolutionChoice, ResolutionState,
};
use aegis_stores::{
    KeyRecord, KeyValuePayload, MemoryDocumentStore, MemoryKeyValueStore, MemoryTimeSeriesStore,
    RegionStores, SeriesPoint, TimeSeriesStore,
};

struct RegionFixture {
    documents: Arc<MemoryDocumentStore>,
    series: Arc<MemoryTimeSeriesStore>,
    keys: Arc<MemoryKeyValueStore>,
    stores: RegionStores,
}

fn region() -> RegionFixture {
    let documents = Arc::new(MemoryDocumentStore::new());
    let series = Arc::new(MemoryTimeSeriesStore::new());
    let keys = Arc::new(MemoryKeyValueStore::new());
    let stores = RegionStores {
        documents: documents.clone(),
        series: series.clone(),
        keys: keys.clone(),
    };
    RegionFixture {
        documents,
        series,
        keys,
        stores,
    }
}

fn replicator(
    east: &RegionFixture,
    west: &RegionFixture,
    policy: ConflictResolution,
) -> Replicator {
    let mut regions = HashMap::new();
    regions.insert("east".to_string(), east.stores.clone());
    regions.insert("west".to_string(), west.stores.clone());

    Replicator::new(
        regions,
        ReplicatorConfig {
            primary: "east".to_string(),
            secondaries: vec!["west".to_string()],
            sync_interval: Duration::from_millis(50),
            health_interval: Duration::from_millis(50),
            policy,
        },
        Arc::new(EventBus::new()),
        Arc::new(MetricsRegistry::new()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_sync_copies_all_stores() {
    let east = region();
    let west = region();

    east.documents
        .insert_json("items", serde_json::json!({"_id": "1", "v": "a"}));
    east.series
        .write_points(&[SeriesPoint {
            measurement: "cpu".to_string(),
            timestamp_ms: 100,
            tags: Default::default(),
            fields: [("value".to_string(), 0.1)].into_iter().collect(),
        }])
        .await
        .unwrap();
    east.keys.put(KeyRecord {
        key: "k1".to_string(),
        ttl_ms: Some(60_000),
        value: KeyValuePayload::List(vec!["a".to_string(), "b".to_string()]),
    });

    let replicator = replicator(&east, &west, ConflictResolution::LastWriteWins);
    let counters = replicator
        .sync_region_once("west", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(counters.documents, 1);
    assert_eq!(counters.points, 1);
    assert_eq!(counters.keys, 1);
    assert_eq!(counters.conflicts, 0);

    // Target payloads equal source payloads.
    assert_eq!(
        west.documents.get_json("items", "1").unwrap(),
        serde_json::json!({"_id": "1", "v": "a"})
    );
    assert_eq!(west.series.all_points(), east.series.all_points());
    let copied = west.keys.get("k1").unwrap();
    assert_eq!(
        copied.value,
        KeyValuePayload::List(vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(copied.ttl_ms, Some(60_000));

    let status = &replicator.status()[0];
    assert_eq!(status.state, ReplicationState::Healthy);
    assert!(status.last_sync.is_some());
    assert_eq!(status.documents_synced, 1);
}

#[tokio::test]
async fn test_last_write_wins_source_newer() {
    let east = region();
    let west = region();

    east.documents.insert_json(
        "items",
        serde_json::json!({"_id": "a", "v": "P", "updatedAt": "2024-01-01T00:00:10Z"}),
    );
    west.documents.insert_json(
        "items",
        serde_json::json!({"_id": "a", "v": "S", "updatedAt": "2024-01-01T00:00:05Z"}),
    );

    let replicator = replicator(&east, &west, ConflictResolution::LastWriteWins);
    let counters = replicator
        .sync_region_once("west", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(counters.conflicts, 1);

    // Source wins: the target now reads the primary's payload.
    let resolved = west.documents.get_json("items", "a").unwrap();
    assert_eq!(resolved.get("v").unwrap(), "P");

    let conflicts = replicator.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].resolution, ResolutionState::Resolved);
    assert_eq!(conflicts[0].entity_id, "a");
}

#[tokio::test]
async fn test_last_write_wins_target_newer() {
    let east = region();
    let west = region();

    east.documents.insert_json(
        "items",
        serde_json::json!({"_id": "a", "v": "P", "updatedAt": "2024-01-01T00:00:05Z"}),
    );
    west.documents.insert_json(
        "items",
        serde_json::json!({"_id": "a", "v": "S", "updatedAt": "2024-01-01T00:00:10Z"}),
    );

    let replicator = replicator(&east, &west, ConflictResolution::LastWriteWins);
    replicator
        .sync_region_once("west", &CancellationToken::new())
        .await
        .unwrap();

    // Target wins: its payload is left in place.
    let kept = west.documents.get_json("items", "a").unwrap();
    assert_eq!(kept.get("v").unwrap(), "S");
    assert_eq!(
        replicator.conflicts()[0].resolution,
        ResolutionState::Resolved
    );
}

#[tokio::test]
async fn test_manual_policy_leaves_target_untouched() {
    let east = region();
    let west = region();

    east.documents.insert_json(
        "items",
        serde_json::json!({"_id": "a", "v": "P", "updatedAt": "2024-01-01T00:00:10Z"}),
    );
    west.documents.insert_json(
        "items",
        serde_json::json!({"_id": "a", "v": "S", "updatedAt": "2024-01-01T00:00:05Z"}),
    );

    let replicator = replicator(&east, &west, ConflictResolution::Manual);
    replicator
        .sync_region_once("west", &CancellationToken::new())
        .await
        .unwrap();

    // Untouched until the operator acts.
    assert_eq!(
        west.documents
            .get_json("items", "a")
            .unwrap()
            .get("v")
            .unwrap(),
        "S"
    );
    let conflict = &replicator.conflicts()[0];
    assert_eq!(conflict.resolution, ResolutionState::Manual);

    // Operator picks the source payload.
    let resolved = replicator
        .resolve_conflict(conflict.id, ResolutionChoice::Source)
        .await
        .unwrap();
    assert_eq!(resolved.resolution, ResolutionState::Resolved);
    assert_eq!(
        west.documents
            .get_json("items", "a")
            .unwrap()
            .get("v")
            .unwrap(),
        "P"
    );
}

#[tokio::test]
async fn test_resolve_conflict_with_custom_payload() {
    let east = region();
    let west = region();

    east.documents.insert_json(
        "items",
        serde_json::json!({"_id": "a", "v": "P", "updatedAt": "2024-01-01T00:00:10Z"}),
    );
    west.documents.insert_json(
        "items",
        serde_json::json!({"_id": "a", "v": "S", "updatedAt": "2024-01-01T00:00:05Z"}),
    );

    let replicator = replicator(&east, &west, ConflictResolution::Manual);
    replicator
        .sync_region_once("west", &CancellationToken::new())
        .await
        .unwrap();

    let conflict = &replicator.conflicts()[0];
    let merged = serde_json::json!({"_id": "a", "v": "merged"});
    replicator
        .resolve_conflict(
            conflict.id,
            ResolutionChoice::Custom(serde_json::to_vec(&merged).unwrap()),
        )
        .await
        .unwrap();

    assert_eq!(
        west.documents
            .get_json("items", "a")
            .unwrap()
            .get("v")
            .unwrap(),
        "merged"
    );
}

#[tokio::test]
async fn test_last_sync_advances_monotonically() {
    let east = region();
    let west = region();
    east.documents
        .insert_json("items", serde_json::json!({"_id": "1", "v": "a"}));

    let replicator = replicator(&east, &west, ConflictResolution::LastWriteWins);
    let cancel = CancellationToken::new();

    replicator.sync_region_once("west", &cancel).await.unwrap();
    let first = replicator.status()[0].last_sync.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let counters = replicator.sync_region_once("west", &cancel).await.unwrap();
    let second = replicator.status()[0].last_sync.unwrap();

    assert!(second > first);
    // Nothing changed since the first pass.
    assert_eq!(counters.documents, 0);
}

#[tokio::test]
async fn test_cancelled_pass_leaves_last_sync_unchanged() {
    let east = region();
    let west = region();
    east.documents
        .insert_json("items", serde_json::json!({"_id": "1", "v": "a"}));

    let replicator = replicator(&east, &west, ConflictResolution::LastWriteWins);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = replicator.sync_region_once("west", &cancel).await;
    assert!(result.is_err());
    assert!(replicator.status()[0].last_sync.is_none());
    assert!(west.documents.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_region_marked_failed() {
    let east = region();
    let west = region();
    east.documents
        .insert_json("items", serde_json::json!({"_id": "1", "v": "a"}));

    let replicator = replicator(&east, &west, ConflictResolution::LastWriteWins);
    let cancel = CancellationToken::new();

    // A successful pass accumulates counters first.
    replicator.sync_region_once("west", &cancel).await.unwrap();
    let synced_before = replicator.status()[0].documents_synced;

    west.documents.set_available(false);
    east.documents
        .insert_json("items", serde_json::json!({"_id": "2", "v": "b"}));
    // New document forces a target fetch, which fails.
    tokio::time::sleep(Duration::from_millis(5)).await;
    east.documents.insert_json(
        "items",
        serde_json::json!({"_id": "3", "v": "c", "updatedAt": chrono::Utc::now().to_rfc3339()}),
    );

    let result = replicator.sync_region_once("west", &cancel).await;
    assert!(result.is_err());

    let status = &replicator.status()[0];
    assert_eq!(status.state, ReplicationState::Failed);
    assert!(status.last_error.is_some());
    assert_eq!(status.documents_synced, synced_before);
}

#[tokio::test]
async fn test_switch_primary_reverses_direction() {
    let east = region();
    let west = region();

    let replicator = replicator(&east, &west, ConflictResolution::LastWriteWins);
    replicator.switch_primary("west").await.unwrap();
    assert_eq!(replicator.primary(), "west");

    west.documents
        .insert_json("items", serde_json::json!({"_id": "w", "v": "from-west"}));
    replicator
        .sync_region_once("east", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        east.documents
            .get_json("items", "w")
            .unwrap()
            .get("v")
            .unwrap(),
        "from-west"
    );
}

#[tokio::test]
async fn test_start_stop_lifecycle() {
    let east = region();
    let west = region();

    let replicator = replicator(&east, &west, ConflictResolution::LastWriteWins);
    replicator.start().await.unwrap();
    assert!(replicator.is_running().await);
    assert!(replicator.start().await.is_err());

    replicator.stop().await.unwrap();
    assert!(!replicator.is_running().await);
    assert!(replicator.stop().await.is_err());
}

#[tokio::test]
async fn test_probe_marks_unreachable_region() {
    let east = region();
    let west = region();

    let replicator = replicator(&east, &west, ConflictResolution::LastWriteWins);
    west.keys.set_available(false);
    replicator.probe_regions_once().await;

    let status = &replicator.status()[0];
    assert_eq!(status.state, ReplicationState::Failed);
}
