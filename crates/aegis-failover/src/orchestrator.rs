//! The failover orchestrator and auto-failover watcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use aegis_core::events::{DrEvent, EventBus};
use aegis_core::metrics::{names, MetricsRegistry};
use aegis_core::notify::{Notification, NotificationKind, Notifier};
use aegis_core::status::{DisasterRecoveryStatus, FailoverEvent};
use aegis_replication::Replicator;
use aegis_stores::RegionStores;

use crate::control::{RegionController, TrafficRouter};
use crate::error::{FailoverError, Result};

/// Default verification timeout; timing out triggers rollback.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(60);

/// Phases of one failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverPhase {
    /// No failover in flight.
    Idle,
    /// Probing the target region.
    Validating,
    /// Stopping traffic to the active region.
    Draining,
    /// Promoting the target's stores.
    Promoting,
    /// Updating routing.
    Routing,
    /// Post-promotion verification.
    Verifying,
    /// Terminal: the failover committed.
    Committed,
    /// Reversing steps after an error.
    RollingBack,
    /// Terminal: the failover was reversed.
    RolledBack,
    /// Terminal: validation refused the target.
    Aborted,
}

impl FailoverPhase {
    fn as_str(&self) -> &'static str {
        match self {
            FailoverPhase::Idle => "idle",
            FailoverPhase::Validating => "validating",
            FailoverPhase::Draining => "draining",
            FailoverPhase::Promoting => "promoting",
            FailoverPhase::Routing => "routing",
            FailoverPhase::Verifying => "verifying",
            FailoverPhase::Committed => "committed",
            FailoverPhase::RollingBack => "rolling-back",
            FailoverPhase::RolledBack => "rolled-back",
            FailoverPhase::Aborted => "aborted",
        }
    }
}

struct OrchestratorInner {
    regions: HashMap<String, RegionStores>,
    secondaries_order: Vec<String>,
    router: Arc<dyn TrafficRouter>,
    controller: Arc<dyn RegionController>,
    replicator: Replicator,
    status: tokio::sync::RwLock<DisasterRecoveryStatus>,
    in_flight: AtomicBool,
    halted: AtomicBool,
    auto_failover: bool,
    rto: Duration,
    verify_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
    events: Arc<EventBus>,
    notifier: Arc<Notifier>,
}

/// The failover orchestrator. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct FailoverOrchestrator {
    inner: Arc<OrchestratorInner>,
}

/// Releases the in-flight flag when a failover attempt ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl FailoverOrchestrator {
    /// Create an orchestrator.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        regions: HashMap<String, RegionStores>,
        secondaries_order: Vec<String>,
        primary: impl Into<String>,
        router: Arc<dyn TrafficRouter>,
        controller: Arc<dyn RegionController>,
        replicator: Replicator,
        auto_failover: bool,
        rto: Duration,
        metrics: Arc<MetricsRegistry>,
        events: Arc<EventBus>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                regions,
                secondaries_order,
                router,
                controller,
                replicator,
                status: tokio::sync::RwLock::new(DisasterRecoveryStatus::new(primary)),
                in_flight: AtomicBool::new(false),
                halted: AtomicBool::new(false),
                auto_failover,
                rto,
                verify_timeout: VERIFY_TIMEOUT,
                metrics,
                events,
                notifier,
            }),
        }
    }

    /// Override the verification timeout.
    pub fn with_verify_timeout(self, timeout: Duration) -> Self {
        // Only meaningful before the orchestrator is shared.
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.verify_timeout = timeout;
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => Self { inner },
        }
    }

    /// Snapshot of the process-wide DR status, replication map included.
    pub async fn status(&self) -> DisasterRecoveryStatus {
        let mut snapshot = self.inner.status.read().await.clone();
        for region_status in self.inner.replicator.status() {
            snapshot
                .replication
                .insert(region_status.region.clone(), region_status);
        }
        snapshot
    }

    /// Record the outcome of a health round on the shared status.
    pub async fn record_health(&self, healthy: bool) {
        let mut status = self.inner.status.write().await;
        status.last_health_check = Some(chrono::Utc::now());
        status.healthy = healthy;
    }

    /// Execute a failover to `target`.
    ///
    /// Returns the committed audit event, or an error after rollback. A
    /// second call while one failover is in flight fails with
    /// [`FailoverError::InProgress`] and mutates nothing.
    pub async fn execute_failover(&self, target: &str, reason: &str) -> Result<FailoverEvent> {
        if self.inner.halted.load(Ordering::Acquire) {
            return Err(FailoverError::Halted);
        }
        let target_stores = self
            .inner
            .regions
            .get(target)
            .ok_or_else(|| FailoverError::UnknownRegion(target.to_string()))?;

        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FailoverError::InProgress);
        }
        let _guard = FlightGuard(&self.inner.in_flight);

        let (original_primary, original_active) = {
            let status = self.inner.status.read().await;
            (status.primary_region.clone(), status.active_region.clone())
        };
        if target == original_active {
            return Err(FailoverError::AlreadyActive(target.to_string()));
        }

        // Validating: reject with no side effects if the target is not
        // healthy.
        if let Err(e) = tokio::time::timeout(self.inner.verify_timeout, target_stores.ping_all())
            .await
            .map_err(|_| FailoverError::ValidationFailed("target probe timed out".to_string()))
            .and_then(|r| r.map_err(|e| FailoverError::ValidationFailed(e.to_string())))
        {
            tracing::warn!(target, error = %e, "failover aborted in validation");
            return Err(e);
        }

        let id = uuid::Uuid::new_v4();
        let started_at = chrono::Utc::now();
        let started = std::time::Instant::now();
        self.inner.metrics.inc(names::FAILOVER_TOTAL);
        self.inner.events.publish(DrEvent::FailoverStarted {
            id,
            from_region: original_active.clone(),
            to_region: target.to_string(),
            reason: reason.to_string(),
        });
        tracing::info!(%id, from = %original_active, to = target, reason, "failover started");

        let outcome = self
            .run_protocol(target, target_stores, &original_active)
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                let event = FailoverEvent {
                    id,
                    timestamp: started_at,
                    from_region: original_active.clone(),
                    to_region: target.to_string(),
                    reason: reason.to_string(),
                    duration_ms,
                    success: true,
                    rolled_back: false,
                };
                self.commit(event.clone()).await;
                Ok(event)
            }
            Err((phase, cause)) => {
                self.rollback(target, &original_primary, &original_active)
                    .await?;

                let event = FailoverEvent {
                    id,
                    timestamp: started_at,
                    from_region: original_active,
                    to_region: target.to_string(),
                    reason: reason.to_string(),
                    duration_ms,
                    success: false,
                    rolled_back: true,
                };
                self.finish_rolled_back(event).await;
                Err(FailoverError::RolledBack {
                    id,
                    phase: phase.as_str().to_string(),
                    reason: cause,
                })
            }
        }
    }

    /// Drain, promote, reroute, verify. Returns the failing phase on
    /// error.
    async fn run_protocol(
        &self,
        target: &str,
        target_stores: &RegionStores,
        original_active: &str,
    ) -> std::result::Result<(), (FailoverPhase, String)> {
        self.inner
            .router
            .drain(original_active)
            .await
            .map_err(|e| (FailoverPhase::Draining, e.to_string()))?;

        self.inner
            .controller
            .promote(target)
            .await
            .map_err(|e| (FailoverPhase::Promoting, e.to_string()))?;
        {
            let mut status = self.inner.status.write().await;
            status.primary_region = target.to_string();
        }
        self.inner
            .replicator
            .switch_primary(target)
            .await
            .map_err(|e| (FailoverPhase::Promoting, e.to_string()))?;

        self.inner
            .router
            .route_to(target)
            .await
            .map_err(|e| (FailoverPhase::Routing, e.to_string()))?;

        match tokio::time::timeout(self.inner.verify_timeout, target_stores.ping_all()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err((FailoverPhase::Verifying, e.to_string())),
            Err(_) => Err((
                FailoverPhase::Verifying,
                "verification timed out".to_string(),
            )),
        }
    }

    /// Reverse steps 2-4 in order. A failure here leaves the process in
    /// an indeterminate state: the orchestrator halts and refuses
    /// further commands.
    async fn rollback(
        &self,
        target: &str,
        original_primary: &str,
        original_active: &str,
    ) -> Result<()> {
        tracing::warn!(target, "rolling back failover");

        let result: Result<()> = async {
            self.inner.router.route_to(original_active).await?;
            self.inner.controller.demote(target).await?;
            self.inner.replicator.switch_primary(original_primary).await?;
            {
                let mut status = self.inner.status.write().await;
                status.primary_region = original_primary.to_string();
            }
            self.inner.router.resume(original_active).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            self.inner.halted.store(true, Ordering::Release);
            tracing::error!(error = %e, "rollback failed; orchestrator halted");
            return Err(FailoverError::RollbackFailed(e.to_string()));
        }
        Ok(())
    }

    async fn commit(&self, event: FailoverEvent) {
        let compliant = Duration::from_millis(event.duration_ms) <= self.inner.rto;
        self.inner.metrics.inc(names::FAILOVER_SUCCESS_TOTAL);
        self.inner.metrics.observe(
            names::FAILOVER_DURATION_SECONDS,
            event.duration_ms as f64 / 1000.0,
        );
        self.inner.metrics.adjust_ratio(
            names::RTO_COMPLIANCE_RATIO,
            if compliant { 0.1 } else { -0.1 },
        );

        {
            let mut status = self.inner.status.write().await;
            status.active_region = event.to_region.clone();
            status.healthy = true;
            status.push_failover(event.clone());
        }

        tracing::info!(
            id = %event.id,
            to = %event.to_region,
            duration_ms = event.duration_ms,
            "failover committed"
        );
        self.inner
            .events
            .publish(DrEvent::FailoverCommitted(event.clone()));
        self.inner
            .notifier
            .notify(
                Notification::new(
                    NotificationKind::FailoverCommitted,
                    vec![event.from_region.clone(), event.to_region.clone()],
                    format!("failover {} committed", event.id),
                )
                .with_duration_ms(event.duration_ms),
            )
            .await;
    }

    async fn finish_rolled_back(&self, event: FailoverEvent) {
        self.inner.metrics.observe(
            names::FAILOVER_DURATION_SECONDS,
            event.duration_ms as f64 / 1000.0,
        );
        self.inner
            .metrics
            .adjust_ratio(names::RTO_COMPLIANCE_RATIO, -0.1);

        {
            let mut status = self.inner.status.write().await;
            status.push_failover(event.clone());
        }

        self.inner
            .events
            .publish(DrEvent::FailoverRolledBack(event.clone()));
        self.inner
            .notifier
            .notify(
                Notification::new(
                    NotificationKind::FailoverRolledBack,
                    vec![event.from_region.clone(), event.to_region.clone()],
                    format!("failover {} rolled back", event.id),
                )
                .with_duration_ms(event.duration_ms),
            )
            .await;
    }

    /// Launch the auto-failover watcher: on a confirmed-unhealthy primary
    /// it promotes the first healthy secondary in configuration order.
    pub fn spawn_auto_failover(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let mut subscription = self.inner.events.subscribe("auto-failover");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = subscription.next() => match event {
                        Some(DrEvent::RegionUnhealthy { region, message }) => {
                            orchestrator.handle_unhealthy_region(&region, &message).await;
                        }
                        Some(DrEvent::ConflictDetected { id, container, entity_id, manual: true, .. }) => {
                            orchestrator
                                .inner
                                .notifier
                                .notify(Notification::new(
                                    NotificationKind::ConflictPending,
                                    Vec::new(),
                                    format!(
                                        "conflict {} on {}/{} awaits operator resolution",
                                        id, container, entity_id
                                    ),
                                ))
                                .await;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        })
    }

    async fn handle_unhealthy_region(&self, region: &str, message: &str) {
        let primary = {
            let mut status = self.inner.status.write().await;
            status.last_health_check = Some(chrono::Utc::now());
            if region == status.active_region {
                status.healthy = false;
            }
            status.primary_region.clone()
        };

        // Only confirmed (multi-round) failures reach this point.
        self.inner
            .notifier
            .notify(Notification::new(
                NotificationKind::HealthAlert,
                vec![region.to_string()],
                format!("region unhealthy: {}", message),
            ))
            .await;

        if region != primary || !self.inner.auto_failover {
            return;
        }

        let Some(target) = self.select_failover_target(region).await else {
            tracing::error!(primary = region, "no healthy secondary available for auto-failover");
            return;
        };

        match self.execute_failover(&target, "automatic").await {
            Ok(event) => {
                tracing::info!(id = %event.id, to = %target, "automatic failover committed");
            }
            Err(FailoverError::InProgress) => {
                tracing::debug!("auto-failover skipped, one already in flight");
            }
            Err(e) => {
                tracing::error!(error = %e, "automatic failover failed");
            }
        }
    }

    /// First healthy secondary in configuration order.
    async fn select_failover_target(&self, exclude: &str) -> Option<String> {
        for candidate in &self.inner.secondaries_order {
            if candidate == exclude {
                continue;
            }
            let Some(stores) = self.inner.regions.get(candidate) else {
                continue;
            };
            if stores.ping_all().await.is_ok() {
                return Some(candidate.clone());
            }
        }
        None
    }
}
