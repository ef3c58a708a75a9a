//! The health monitor: periodic rounds with two-round failure
//! confirmation.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use aegis_core::events::{DrEvent, EventBus};
use aegis_core::metrics::{names, MetricsRegistry};

use crate::error::{HealthError, Result};
use crate::probe::{HealthCheck, HealthStatus, Probe, ProbeOutcome, ProbeStatus};

/// Consecutive failing rounds required before a critical probe flips the
/// aggregate to unhealthy.
const CONFIRMATION_ROUNDS: u32 = 2;

/// Periodic health monitor over a fixed probe set.
pub struct HealthMonitor {
    probes: Vec<Arc<dyn Probe>>,
    streaks: Mutex<HashMap<String, u32>>,
    last: RwLock<Option<HealthStatus>>,
    events: Arc<EventBus>,
    metrics: Arc<MetricsRegistry>,
    running: Mutex<Option<CancellationToken>>,
}

impl HealthMonitor {
    /// Create a monitor over the given probes.
    pub fn new(
        probes: Vec<Arc<dyn Probe>>,
        events: Arc<EventBus>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            probes,
            streaks: Mutex::new(HashMap::new()),
            last: RwLock::new(None),
            events,
            metrics,
            running: Mutex::new(None),
        }
    }

    /// Most recent round, if one has completed.
    pub fn last_status(&self) -> Option<HealthStatus> {
        self.last.read().clone()
    }

    /// Execute one probe round.
    pub async fn run_round(&self) -> HealthStatus {
        let mut checks = Vec::with_capacity(self.probes.len());
        let mut healthy = true;

        for probe in &self.probes {
            let started = std::time::Instant::now();
            let outcome = match tokio::time::timeout(probe.timeout(), probe.execute()).await {
                Ok(outcome) => outcome,
                Err(_) => ProbeOutcome::fail(format!(
                    "probe timed out after {:?}",
                    probe.timeout()
                )),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let streak = {
                let mut streaks = self.streaks.lock();
                let entry = streaks.entry(probe.name().to_string()).or_insert(0);
                if outcome.status == ProbeStatus::Fail {
                    *entry += 1;
                } else {
                    *entry = 0;
                }
                *entry
            };

            // First miss is transient: reported as warn, aggregate unchanged.
            let status = match outcome.status {
                ProbeStatus::Fail if streak < CONFIRMATION_ROUNDS => ProbeStatus::Warn,
                status => status,
            };

            if outcome.status == ProbeStatus::Fail {
                self.metrics.inc(names::HEALTH_CHECK_FAILURES_TOTAL);
            }

            if status == ProbeStatus::Fail && probe.critical() {
                healthy = false;
                if let Some(region) = probe.region() {
                    self.events.publish(DrEvent::RegionUnhealthy {
                        region: region.to_string(),
                        message: outcome.message.clone(),
                    });
                }
            }

            checks.push(HealthCheck {
                name: probe.name().to_string(),
                status,
                message: outcome.message,
                duration_ms,
                timestamp: chrono::Utc::now(),
            });
        }

        let status = HealthStatus {
            healthy,
            checks,
            timestamp: chrono::Utc::now(),
        };
        *self.last.write() = Some(status.clone());

        if !status.healthy {
            tracing::warn!(
                failing = status
                    .checks
                    .iter()
                    .filter(|c| c.status == ProbeStatus::Fail)
                    .count(),
                "health round unhealthy"
            );
        }
        status
    }

    /// Launch the periodic round loop.
    pub fn start(self: Arc<Self>, interval: Duration) -> Result<JoinHandle<()>> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(HealthError::AlreadyRunning);
        }
        let cancel = CancellationToken::new();
        *running = Some(cancel.clone());
        drop(running);

        let monitor = Arc::clone(&self);
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                monitor.run_round().await;
            }
        }))
    }

    /// Stop the round loop.
    pub fn stop(&self) -> Result<()> {
        match self.running.lock().take() {
            Some(cancel) => {
                cancel.cancel();
                Ok(())
            }
            None => Err(HealthError::NotRunning),
        }
    }
}
