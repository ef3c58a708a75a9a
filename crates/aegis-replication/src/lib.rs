//! # Aegis Replication
//!
//! Continuous cross-region replication with explicit conflict accounting.
//!
//! One independent sync task per secondary region mirrors modified
//! documents, time-series points, and keys from the primary. Conflicts
//! are detected by timestamp comparison with a byte-level structural
//! tie-breaker, resolved per the configured policy, and recorded in an
//! append-only log the operator can inspect and resolve.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)]

pub mod conflict;
pub mod error;
pub mod replicator;
pub mod sync;

pub use conflict::{
    ConflictKind, ConflictLog, ConflictRecord, ResolutionChoice, ResolutionState, Winner,
};
pub use error::{ReplicationError, Result};
pub use replicator::{Replicator, ReplicatorConfig};
pub use sync::PassCounters;
