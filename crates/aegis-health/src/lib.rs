//! # Aegis Health
//!
//! Periodic health probing for regions, stores, and service endpoints.
//!
//! Every probe returns a `{name, status, message, duration, timestamp}`
//! envelope. A single transient miss is reported as `warn`; two
//! consecutive failing rounds of a critical probe flip the aggregate to
//! unhealthy and, for region-scoped probes, publish a region-unhealthy
//! event consumed by the auto-failover watcher.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)]

pub mod error;
pub mod monitor;
pub mod probe;

pub use error::{HealthError, Result};
pub use monitor::HealthMonitor;
pub use probe::{
    DocumentPingProbe, EndpointSweepProbe, HealthCheck, HealthStatus, HttpProbe,
    KeyValuePingProbe, Probe, ProbeOutcome, ProbeStatus, RegionProbe, ResourceProbe,
    SeriesPingProbe,
};
