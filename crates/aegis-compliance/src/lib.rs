//! # Aegis Compliance
//!
//! Read-only evaluation of declarative compliance rules over the DR
//! configuration, rendered as a Markdown report. The evaluator never
//! touches stores or storage; it only inspects configuration.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(dead_code)]

pub mod evaluator;
pub mod report;

pub use evaluator::{
    evaluate, ComplianceReport, RequirementResult, Severity, Standard,
};
pub use report::render_markdown;
