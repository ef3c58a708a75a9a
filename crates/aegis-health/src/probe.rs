//! Probe kinds and the health check envelope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use aegis_stores::RegionStores;

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe result status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// The probe succeeded.
    Pass,
    /// Transient miss or non-critical degradation.
    Warn,
    /// Confirmed failure.
    Fail,
}

/// Raw outcome of one probe execution.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Pass, warn, or fail.
    pub status: ProbeStatus,
    /// Human-readable explanation.
    pub message: String,
}

impl ProbeOutcome {
    /// A passing outcome.
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::Pass,
            message: message.into(),
        }
    }

    /// A warning outcome.
    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::Warn,
            message: message.into(),
        }
    }

    /// A failing outcome.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::Fail,
            message: message.into(),
        }
    }
}

/// One emitted health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    /// Probe name.
    pub name: String,
    /// Result status.
    pub status: ProbeStatus,
    /// Human-readable explanation.
    pub message: String,
    /// Measured probe duration in milliseconds.
    pub duration_ms: u64,
    /// When the probe ran.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Aggregate status of one probe round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// False once any critical probe fails two consecutive rounds.
    pub healthy: bool,
    /// Per-probe checks for the round.
    pub checks: Vec<HealthCheck>,
    /// When the round completed.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A single health probe.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Probe name, stable across rounds.
    fn name(&self) -> &str;

    /// Critical probes drive the aggregate health state.
    fn critical(&self) -> bool {
        true
    }

    /// Per-probe timeout; exceeding it counts as a failure.
    fn timeout(&self) -> Duration {
        DEFAULT_PROBE_TIMEOUT
    }

    /// Region this probe is scoped to, if any. Region-scoped probes feed
    /// the auto-failover watcher.
    fn region(&self) -> Option<&str> {
        None
    }

    /// Execute the probe once.
    async fn execute(&self) -> ProbeOutcome;
}

/// HTTP reachability probe with an expected status code.
pub struct HttpProbe {
    name: String,
    url: String,
    expected_status: u16,
    client: reqwest::Client,
}

impl HttpProbe {
    /// Create a probe for `url` expecting `expected_status`.
    pub fn new(name: impl Into<String>, url: impl Into<String>, expected_status: u16) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            expected_status,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> ProbeOutcome {
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status().as_u16() == self.expected_status => {
                ProbeOutcome::pass(format!("{} returned {}", self.url, response.status()))
            }
            Ok(response) => ProbeOutcome::fail(format!(
                "{} returned {}, expected {}",
                self.url,
                response.status(),
                self.expected_status
            )),
            Err(e) => ProbeOutcome::fail(format!("{} unreachable: {}", self.url, e)),
        }
    }
}

/// Sweep over several HTTP endpoints; any mismatch fails the probe.
pub struct EndpointSweepProbe {
    name: String,
    endpoints: Vec<(String, u16)>,
    client: reqwest::Client,
}

impl EndpointSweepProbe {
    /// Create a sweep over `(url, expected_status)` pairs.
    pub fn new(name: impl Into<String>, endpoints: Vec<(String, u16)>) -> Self {
        Self {
            name: name.into(),
            endpoints,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Probe for EndpointSweepProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> ProbeOutcome {
        let mut failures = Vec::new();
        for (url, expected) in &self.endpoints {
            match self.client.get(url).send().await {
                Ok(response) if response.status().as_u16() == *expected => {}
                Ok(response) => {
                    failures.push(format!("{} returned {}", url, response.status()))
                }
                Err(e) => failures.push(format!("{} unreachable: {}", url, e)),
            }
        }
        if failures.is_empty() {
            ProbeOutcome::pass(format!("{} endpoints healthy", self.endpoints.len()))
        } else {
            ProbeOutcome::fail(failures.join("; "))
        }
    }
}

/// Ping probe over a single document store.
pub struct DocumentPingProbe {
    name: String,
    store: std::sync::Arc<dyn aegis_stores::DocumentStore>,
}

impl DocumentPingProbe {
    /// Create a ping probe for the store.
    pub fn new(
        name: impl Into<String>,
        store: std::sync::Arc<dyn aegis_stores::DocumentStore>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

#[async_trait]
impl Probe for DocumentPingProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> ProbeOutcome {
        match self.store.ping().await {
            Ok(()) => ProbeOutcome::pass("document store reachable"),
            Err(e) => ProbeOutcome::fail(e.to_string()),
        }
    }
}

/// Ping probe over a single time-series store.
pub struct SeriesPingProbe {
    name: String,
    store: std::sync::Arc<dyn aegis_stores::TimeSeriesStore>,
}

impl SeriesPingProbe {
    /// Create a ping probe for the store.
    pub fn new(
        name: impl Into<String>,
        store: std::sync::Arc<dyn aegis_stores::TimeSeriesStore>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

#[async_trait]
impl Probe for SeriesPingProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> ProbeOutcome {
        match self.store.ping().await {
            Ok(()) => ProbeOutcome::pass("time-series store reachable"),
            Err(e) => ProbeOutcome::fail(e.to_string()),
        }
    }
}

/// Ping probe over a single key-value store.
pub struct KeyValuePingProbe {
    name: String,
    store: std::sync::Arc<dyn aegis_stores::KeyValueStore>,
}

impl KeyValuePingProbe {
    /// Create a ping probe for the store.
    pub fn new(
        name: impl Into<String>,
        store: std::sync::Arc<dyn aegis_stores::KeyValueStore>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

#[async_trait]
impl Probe for KeyValuePingProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> ProbeOutcome {
        match self.store.ping().await {
            Ok(()) => ProbeOutcome::pass("key-value store reachable"),
            Err(e) => ProbeOutcome::fail(e.to_string()),
        }
    }
}

/// Probe over all three stores of one region.
pub struct RegionProbe {
    name: String,
    region: String,
    stores: RegionStores,
}

impl RegionProbe {
    /// Create a probe for the region's store set.
    pub fn new(region: impl Into<String>, stores: RegionStores) -> Self {
        let region = region.into();
        Self {
            name: format!("region/{}", region),
            region,
            stores,
        }
    }
}

#[async_trait]
impl Probe for RegionProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn region(&self) -> Option<&str> {
        Some(&self.region)
    }

    async fn execute(&self) -> ProbeOutcome {
        let mut failures = Vec::new();
        if let Err(e) = self.stores.documents.ping().await {
            failures.push(format!("documents: {}", e));
        }
        if let Err(e) = self.stores.series.ping().await {
            failures.push(format!("series: {}", e));
        }
        if let Err(e) = self.stores.keys.ping().await {
            failures.push(format!("keys: {}", e));
        }

        if failures.is_empty() {
            ProbeOutcome::pass("all stores reachable")
        } else {
            ProbeOutcome::fail(failures.join("; "))
        }
    }
}

/// Local resource utilization probe: warns past the soft thresholds,
/// fails past the hard ones.
pub struct ResourceProbe {
    name: String,
    memory_warn_ratio: f64,
    memory_fail_ratio: f64,
}

impl Default for ResourceProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe {
    /// Probe with the default thresholds (warn at 85% memory, fail at 95%).
    pub fn new() -> Self {
        Self {
            name: "local/resources".to_string(),
            memory_warn_ratio: 0.85,
            memory_fail_ratio: 0.95,
        }
    }
}

#[async_trait]
impl Probe for ResourceProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn critical(&self) -> bool {
        false
    }

    async fn execute(&self) -> ProbeOutcome {
        let mut system = sysinfo::System::new();
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return ProbeOutcome::warn("memory statistics unavailable");
        }
        let ratio = system.used_memory() as f64 / total as f64;
        let message = format!("memory utilization {:.0}%", ratio * 100.0);

        if ratio >= self.memory_fail_ratio {
            ProbeOutcome::fail(message)
        } else if ratio >= self.memory_warn_ratio {
            ProbeOutcome::warn(message)
        } else {
            ProbeOutcome::pass(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_stores::{MemoryDocumentStore, MemoryKeyValueStore, MemoryTimeSeriesStore};
    use std::sync::Arc;

    fn stores() -> (Arc<MemoryDocumentStore>, RegionStores) {
        let documents = Arc::new(MemoryDocumentStore::new());
        let stores = RegionStores {
            documents: documents.clone(),
            series: Arc::new(MemoryTimeSeriesStore::new()),
            keys: Arc::new(MemoryKeyValueStore::new()),
        };
        (documents, stores)
    }

    #[tokio::test]
    async fn test_region_probe_pass_and_fail() {
        let (documents, stores) = stores();
        let probe = RegionProbe::new("east", stores);
        assert_eq!(probe.execute().await.status, ProbeStatus::Pass);
        assert_eq!(probe.region(), Some("east"));

        documents.set_available(false);
        let outcome = probe.execute().await;
        assert_eq!(outcome.status, ProbeStatus::Fail);
        assert!(outcome.message.contains("documents"));
    }

    #[tokio::test]
    async fn test_resource_probe_reports() {
        let outcome = ResourceProbe::new().execute().await;
        assert!(!outcome.message.is_empty());
    }

    #[tokio::test]
    async fn test_store_ping_probes() {
        let (documents, stores) = stores();

        let doc_probe = DocumentPingProbe::new("east/documents", stores.documents.clone());
        let kv_probe = KeyValuePingProbe::new("east/keys", stores.keys.clone());
        assert_eq!(doc_probe.execute().await.status, ProbeStatus::Pass);
        assert_eq!(kv_probe.execute().await.status, ProbeStatus::Pass);

        documents.set_available(false);
        assert_eq!(doc_probe.execute().await.status, ProbeStatus::Fail);
        assert_eq!(kv_probe.execute().await.status, ProbeStatus::Pass);
    }
}
