//! # Aegis Core
//!
//! Shared foundation for the Aegis disaster-recovery platform.
//!
//! This crate owns the pieces every other Aegis crate builds on:
//!
//! - `config`: the JSON configuration model and its load-time validation
//! - `status`: the process-wide DR data model (regions, replication status,
//!   failover audit events)
//! - `events`: a bounded, typed event bus with drop-oldest overflow semantics
//! - `metrics`: a small registry of atomic counters and gauges
//! - `notify`: best-effort notification sinks (webhook, Slack, email)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod notify;
pub mod status;

pub use config::{
    AegisConfig, BackupSettings, ConflictResolution, EncryptionSettings, NotificationSettings,
    RecoverySettings, RegionConfig, ReplicationSettings, RetentionSettings, StorageSettings,
    StoreEndpoints,
};
pub use error::{ConfigError, CoreResult, NotifyError};
pub use events::{DrEvent, EventBus, Subscription};
pub use metrics::{names, MetricsRegistry};
pub use notify::{Notification, NotificationKind, NotificationSink, Notifier};
pub use status::{
    DisasterRecoveryStatus, FailoverEvent, RegionReplicationStatus, ReplicationState,
};

/// Version information for the Aegis platform.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
