//! # Aegis Recovery
//!
//! Typed recovery plans and their executor.
//!
//! A plan is a DAG of steps (database restore, application deploy,
//! network configuration, validation). The planner resolves backup
//! coverage at plan time, so a point-in-time request without a covering
//! chain fails before anything runs. The executor walks the DAG
//! topologically, running steps concurrently where dependencies permit,
//! and halts scheduling on the first failure.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)]

pub mod error;
pub mod executor;
pub mod plan;

pub use error::{RecoveryError, Result};
pub use executor::{RecoveryEnvironment, RecoveryExecutor};
pub use plan::{
    RecoveryPlan, RecoveryPlanKind, RecoveryPlanner, RecoveryStep, StepAction, StepCategory,
    StepState,
};
