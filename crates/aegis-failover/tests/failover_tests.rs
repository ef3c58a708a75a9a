//! Failover orchestration integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use aegis_core::config::ConflictResolution;
use aegis_core::events::EventBus;
use aegis_core::metrics::{names, MetricsRegistry};
use aegis_core::notify::Notifier;
use aegis_failover::{
    FailoverError, FailoverOrchestrator, LoggingController, RegionController, TrafficRouter,
};
use aegis_health::{HealthMonitor, Probe, RegionProbe};
use aegis_replication::{Replicator, ReplicatorConfig};
use aegis_stores::{
    MemoryDocumentStore, MemoryKeyValueStore, MemoryTimeSeriesStore, RegionStores,
};

struct RegionFixture {
    documents: Arc<MemoryDocumentStore>,
    series: Arc<MemoryTimeSeriesStore>,
    keys: Arc<MemoryKeyValueStore>,
    stores: RegionStores,
}

impl RegionFixture {
    fn set_available(&self, available: bool) {
        self.documents.set_available(available);
        self.series.set_available(available);
        self.keys.set_available(available);
    }
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

#[derive(Default)]
struct RecordingRouter {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl TrafficRouter for RecordingRouter {
    async fn drain(&self, region: &str) -> aegis_failover::Result<()> {
        self.calls.lock().push(format!("drain:{}", region));
        Ok(())
    }

    async fn route_to(&self, region: &str) -> aegis_failover::Result<()> {
        self.calls.lock().push(format!("route:{}", region));
        Ok(())
    }

    async fn resume(&self, region: &str) -> aegis_failover::Result<()> {
        self.calls.lock().push(format!("resume:{}", region));
        Ok(())
    }
}

struct GatedRouter {
    entered_drain: Arc<Notify>,
    release_drain: Arc<Notify>,
}

#[async_trait]
impl TrafficRouter for GatedRouter {
    async fn drain(&self, _region: &str) -> aegis_failover::Result<()> {
        self.entered_drain.notify_one();
        self.release_drain.notified().await;
        Ok(())
    }

    async fn route_to(&self, _region: &str) -> aegis_failover::Result<()> {
        Ok(())
    }

    async fn resume(&self, _region: &str) -> aegis_failover::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingController {
    calls: Mutex<Vec<String>>,
    fail_promote: bool,
}

#[async_trait]
impl RegionController for RecordingController {
    async fn promote(&self, region: &str) -> aegis_failover::Result<()> {
        self.calls.lock().push(format!("promote:{}", region));
        if self.fail_promote {
            return Err(FailoverError::ValidationFailed(
                "replica promotion refused".to_string(),
            ));
        }
        Ok(())
    }

    async fn demote(&self, region: &str) -> aegis_failover::Result<()> {
        self.calls.lock().push(format!("demote:{}", region));
        Ok(())
    }
}

struct Harness {
    east: RegionFixture,
    west: RegionFixture,
    events: Arc<EventBus>,
    metrics: Arc<MetricsRegistry>,
    replicator: Replicator,
    regions: HashMap<String, RegionStores>,
}

fn harness() -> Harness {
    let east = region();
    let west = region();

    let mut regions = HashMap::new();
    regions.insert("east".to_string(), east.stores.clone());
    regions.insert("west".to_string(), west.stores.clone());

    let events = Arc::new(EventBus::new());
    let metrics = Arc::new(MetricsRegistry::new());
    let replicator = Replicator::new(
        regions.clone(),
        ReplicatorConfig {
            primary: "east".to_string(),
            secondaries: vec!["west".to_string()],
            sync_interval: Duration::from_secs(30),
            health_interval: Duration::from_secs(30),
            policy: ConflictResolution::LastWriteWins,
        },
        Arc::clone(&events),
        Arc::clone(&metrics),
    )
    .unwrap();

    Harness {
        east,
        west,
        events,
        metrics,
        replicator,
        regions,
    }
}

fn orchestrator_with(
    harness: &Harness,
    router: Arc<dyn TrafficRouter>,
    controller: Arc<dyn RegionController>,
    auto_failover: bool,
) -> FailoverOrchestrator {
    FailoverOrchestrator::new(
        harness.regions.clone(),
        vec!["west".to_string()],
        "east",
        router,
        controller,
        harness.replicator.clone(),
        auto_failover,
        Duration::from_secs(15 * 60),
        Arc::clone(&harness.metrics),
        Arc::clone(&harness.events),
        Arc::new(Notifier::disabled()),
    )
}

#[tokio::test]
async fn test_manual_failover_commits() {
    let harness = harness();
    let router = Arc::new(RecordingRouter::default());
    let controller = Arc::new(RecordingController::default());
    let orchestrator = orchestrator_with(
        &harness,
        Arc::clone(&router) as Arc<dyn TrafficRouter>,
        Arc::clone(&controller) as Arc<dyn RegionController>,
        false,
    );

    let event = orchestrator
        .execute_failover("west", "operator drill")
        .await
        .unwrap();

    assert!(event.success);
    assert!(!event.rolled_back);
    assert_eq!(event.from_region, "east");
    assert_eq!(event.to_region, "west");

    let status = orchestrator.status().await;
    assert_eq!(status.active_region, "west");
    assert_eq!(status.primary_region, "west");
    assert_eq!(status.recent_failovers.len(), 1);
    assert_eq!(harness.replicator.primary(), "west");

    assert_eq!(harness.metrics.counter(names::FAILOVER_TOTAL), 1);
    assert_eq!(harness.metrics.counter(names::FAILOVER_SUCCESS_TOTAL), 1);
    assert_eq!(harness.metrics.gauge(names::RTO_COMPLIANCE_RATIO), 1.0);

    let calls = router.calls.lock().clone();
    assert_eq!(calls, vec!["drain:east", "route:west"]);
    assert_eq!(controller.calls.lock().clone(), vec!["promote:west"]);
}

#[tokio::test]
async fn test_validation_refusal_has_no_side_effects() {
    let harness = harness();
    let orchestrator = orchestrator_with(
        &harness,
        Arc::new(RecordingRouter::default()),
        Arc::new(LoggingController),
        false,
    );

    harness.west.set_available(false);
    let result = orchestrator.execute_failover("west", "drill").await;
    assert!(matches!(result, Err(FailoverError::ValidationFailed(_))));

    let status = orchestrator.status().await;
    assert_eq!(status.active_region, "east");
    assert_eq!(status.primary_region, "east");
    assert!(status.recent_failovers.is_empty());
    assert_eq!(harness.metrics.counter(names::FAILOVER_TOTAL), 0);
}

#[tokio::test]
async fn test_promote_failure_rolls_back() {
    let harness = harness();
    let router = Arc::new(RecordingRouter::default());
    let controller = Arc::new(RecordingController {
        calls: Mutex::new(Vec::new()),
        fail_promote: true,
    });
    let orchestrator = orchestrator_with(
        &harness,
        Arc::clone(&router) as Arc<dyn TrafficRouter>,
        Arc::clone(&controller) as Arc<dyn RegionController>,
        false,
    );

    let result = orchestrator.execute_failover("west", "drill").await;
    match result {
        Err(FailoverError::RolledBack { phase, .. }) => assert_eq!(phase, "promoting"),
        other => panic!("expected rollback, got {:?}", other.map(|e| e.id)),
    }

    let status = orchestrator.status().await;
    assert_eq!(status.primary_region, "east");
    assert_eq!(status.active_region, "east");
    assert_eq!(status.recent_failovers.len(), 1);
    let event = &status.recent_failovers[0];
    assert!(!event.success);
    assert!(event.rolled_back);
    assert_eq!(harness.replicator.primary(), "east");

    // Ratio dipped below 1.0 on the failed attempt.
    assert!(harness.metrics.gauge(names::RTO_COMPLIANCE_RATIO) < 1.0);

    // Rollback rerouted to the original region and resumed it.
    let calls = router.calls.lock().clone();
    assert_eq!(calls, vec!["drain:east", "route:east", "resume:east"]);
}

#[tokio::test]
async fn test_concurrent_failover_rejected() {
    let harness = harness();
    let entered_drain = Arc::new(Notify::new());
    let release_drain = Arc::new(Notify::new());
    let router = Arc::new(GatedRouter {
        entered_drain: Arc::clone(&entered_drain),
        release_drain: Arc::clone(&release_drain),
    });
    let orchestrator = orchestrator_with(
        &harness,
        router as Arc<dyn TrafficRouter>,
        Arc::new(LoggingController),
        false,
    );

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.execute_failover("west", "drill").await })
    };

    // Wait until the first failover is mid-protocol.
    entered_drain.notified().await;

    let second = orchestrator.execute_failover("west", "impatient").await;
    assert!(matches!(second, Err(FailoverError::InProgress)));

    // State untouched by the rejected attempt.
    let status = orchestrator.status().await;
    assert!(status.recent_failovers.is_empty());

    release_drain.notify_one();
    let event = first.await.unwrap().unwrap();
    assert!(event.success);
    assert_eq!(orchestrator.status().await.recent_failovers.len(), 1);
}

#[tokio::test]
async fn test_failover_to_active_region_rejected() {
    let harness = harness();
    let orchestrator = orchestrator_with(
        &harness,
        Arc::new(RecordingRouter::default()),
        Arc::new(LoggingController),
        false,
    );

    let result = orchestrator.execute_failover("east", "drill").await;
    assert!(matches!(result, Err(FailoverError::AlreadyActive(_))));
}

#[tokio::test]
async fn test_auto_failover_after_two_unhealthy_rounds() {
    let harness = harness();
    let orchestrator = orchestrator_with(
        &harness,
        Arc::new(RecordingRouter::default()),
        Arc::new(LoggingController),
        true,
    );

    let cancel = CancellationToken::new();
    let watcher = orchestrator.spawn_auto_failover(cancel.clone());

    let monitor = Arc::new(HealthMonitor::new(
        vec![Arc::new(RegionProbe::new("east", harness.east.stores.clone())) as Arc<dyn Probe>],
        Arc::clone(&harness.events),
        Arc::clone(&harness.metrics),
    ));

    harness.east.set_available(false);
    monitor.run_round().await;
    monitor.run_round().await;

    // The watcher consumes the region-unhealthy event asynchronously.
    let mut committed = false;
    for _ in 0..100 {
        if orchestrator.status().await.active_region == "west" {
            committed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(committed, "auto-failover did not commit");

    let status = orchestrator.status().await;
    assert_eq!(status.recent_failovers.len(), 1);
    let event = &status.recent_failovers[0];
    assert!(event.success);
    assert_eq!(event.to_region, "west");
    assert_eq!(event.reason, "automatic");
    assert_eq!(harness.metrics.gauge(names::RTO_COMPLIANCE_RATIO), 1.0);
    assert_eq!(harness.metrics.counter(names::FAILOVER_SUCCESS_TOTAL), 1);

    cancel.cancel();
    let _ = watcher.await;
}

#[tokio::test]
async fn test_auto_failover_disabled_does_nothing() {
    let harness = harness();
    let orchestrator = orchestrator_with(
        &harness,
        Arc::new(RecordingRouter::default()),
        Arc::new(LoggingController),
        false,
    );

    let cancel = CancellationToken::new();
    let watcher = orchestrator.spawn_auto_failover(cancel.clone());

    let monitor = Arc::new(HealthMonitor::new(
        vec![Arc::new(RegionProbe::new("east", harness.east.stores.clone())) as Arc<dyn Probe>],
        Arc::clone(&harness.events),
        Arc::clone(&harness.metrics),
    ));

    harness.east.set_available(false);
    monitor.run_round().await;
    monitor.run_round().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = orchestrator.status().await;
    assert_eq!(status.active_region, "east");
    assert!(status.recent_failovers.is_empty());
    assert!(!status.healthy);

    cancel.cancel();
    let _ = watcher.await;
}
