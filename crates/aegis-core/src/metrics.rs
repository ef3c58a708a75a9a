//! In-process metrics registry.
//!
//! A deliberately small registry: named counters and gauges backed by
//! atomic cells. Updates are linearizable with the events that produce
//! them because callers update metrics before publishing the event.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Well-known metric names.
pub mod names {
    /// Failovers initiated.
    pub const FAILOVER_TOTAL: &str = "failover_total";
    /// Failovers committed.
    pub const FAILOVER_SUCCESS_TOTAL: &str = "failover_success_total";
    /// Health probe failures.
    pub const HEALTH_CHECK_FAILURES_TOTAL: &str = "health_check_failures_total";
    /// Backups attempted.
    pub const BACKUP_TOTAL: &str = "backup_total";
    /// Backups fully successful.
    pub const BACKUP_SUCCESS_TOTAL: &str = "backup_success_total";
    /// Recovery plan executions.
    pub const RECOVERY_PLAN_EXECUTIONS_TOTAL: &str = "recovery_plan_executions_total";
    /// Duration of the last failover, in seconds.
    pub const FAILOVER_DURATION_SECONDS: &str = "failover_duration_seconds";
    /// Size of the last backup, in bytes.
    pub const BACKUP_SIZE_BYTES: &str = "backup_size_bytes";
    /// Moving RTO compliance indicator in [0, 1].
    pub const RTO_COMPLIANCE_RATIO: &str = "rto_compliance_ratio";
    /// Moving RPO compliance indicator in [0, 1].
    pub const RPO_COMPLIANCE_RATIO: &str = "rpo_compliance_ratio";
}

/// A monotonically increasing counter.
#[derive(Default)]
struct Counter(AtomicU64);

/// A gauge holding an `f64` in atomic bits.
struct Gauge(AtomicU64);

impl Gauge {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }
}

/// Registry of named counters and gauges.
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, Arc<Counter>>>,
    gauges: RwLock<HashMap<String, Arc<Gauge>>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Create a registry with the compliance ratio gauges seeded at 1.0.
    pub fn new() -> Self {
        let registry = Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
        };
        registry.set(names::RTO_COMPLIANCE_RATIO, 1.0);
        registry.set(names::RPO_COMPLIANCE_RATIO, 1.0);
        registry
    }

    fn counter_cell(&self, name: &str) -> Arc<Counter> {
        if let Some(cell) = self.counters.read().get(name) {
            return Arc::clone(cell);
        }
        let mut counters = self.counters.write();
        Arc::clone(
            counters
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Counter::default())),
        )
    }

    fn gauge_cell(&self, name: &str) -> Arc<Gauge> {
        if let Some(cell) = self.gauges.read().get(name) {
            return Arc::clone(cell);
        }
        let mut gauges = self.gauges.write();
        Arc::clone(
            gauges
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Gauge::new(0.0))),
        )
    }

    /// Increment a counter by one.
    pub fn inc(&self, name: &str) {
        self.inc_by(name, 1);
    }

    /// Increment a counter by `n`.
    pub fn inc_by(&self, name: &str, n: u64) {
        self.counter_cell(name).0.fetch_add(n, Ordering::AcqRel);
    }

    /// Read a counter. Unregistered counters read as zero.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.0.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Set a gauge to an absolute value.
    pub fn set(&self, name: &str, value: f64) {
        self.gauge_cell(name).set(value);
    }

    /// Record an observation. Gauges keep the most recent observation.
    pub fn observe(&self, name: &str, value: f64) {
        self.set(name, value);
    }

    /// Read a gauge. Unregistered gauges read as zero.
    pub fn gauge(&self, name: &str) -> f64 {
        self.gauges.read().get(name).map(|g| g.get()).unwrap_or(0.0)
    }

    /// Shift a ratio gauge by `delta`, clamping the result to [0, 1].
    pub fn adjust_ratio(&self, name: &str, delta: f64) {
        let cell = self.gauge_cell(name);
        let next = (cell.get() + delta).clamp(0.0, 1.0);
        cell.set(next);
    }

    /// Snapshot of every metric for display.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.0.load(Ordering::Acquire)))
            .collect();
        let gauges = self
            .gauges
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.get()))
            .collect();
        MetricsSnapshot { counters, gauges }
    }
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Counter values by name.
    pub counters: HashMap<String, u64>,
    /// Gauge values by name.
    pub gauges: HashMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let registry = MetricsRegistry::new();
        registry.inc(names::FAILOVER_TOTAL);
        registry.inc_by(names::FAILOVER_TOTAL, 2);
        assert_eq!(registry.counter(names::FAILOVER_TOTAL), 3);
        assert_eq!(registry.counter("unknown"), 0);
    }

    #[test]
    fn test_gauges() {
        let registry = MetricsRegistry::new();
        registry.set(names::BACKUP_SIZE_BYTES, 1024.0);
        assert_eq!(registry.gauge(names::BACKUP_SIZE_BYTES), 1024.0);
        registry.observe(names::FAILOVER_DURATION_SECONDS, 2.5);
        assert_eq!(registry.gauge(names::FAILOVER_DURATION_SECONDS), 2.5);
    }

    #[test]
    fn test_ratio_clamped() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.gauge(names::RTO_COMPLIANCE_RATIO), 1.0);

        registry.adjust_ratio(names::RTO_COMPLIANCE_RATIO, 0.1);
        assert_eq!(registry.gauge(names::RTO_COMPLIANCE_RATIO), 1.0);

        for _ in 0..20 {
            registry.adjust_ratio(names::RTO_COMPLIANCE_RATIO, -0.1);
        }
        assert_eq!(registry.gauge(names::RTO_COMPLIANCE_RATIO), 0.0);

        registry.adjust_ratio(names::RTO_COMPLIANCE_RATIO, 0.1);
        assert!((registry.gauge(names::RTO_COMPLIANCE_RATIO) - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_inc() {
        let registry = Arc::new(MetricsRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    registry.inc(names::BACKUP_TOTAL);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.counter(names::BACKUP_TOTAL), 8000);
    }
}
