//! # Aegis Failover
//!
//! The failover orchestrator: a bounded protocol that stops traffic to a
//! failing region, promotes a secondary, updates routing, verifies, and
//! rolls back on any error between validation and verification.
//!
//! At most one failover is in flight per process. The orchestrator
//! exclusively owns the process-wide `DisasterRecoveryStatus`; observers
//! read snapshots.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)]

pub mod control;
pub mod error;
pub mod orchestrator;

pub use aegis_core::status::FailoverEvent;
pub use control::{LoggingController, LoggingRouter, RegionController, TrafficRouter};
pub use error::{FailoverError, Result};
pub use orchestrator::{FailoverOrchestrator, FailoverPhase};
