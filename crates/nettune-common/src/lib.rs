//! nettune common - shared model for the host network tuning pipeline
//!
//! This crate provides:
//! - The change [`Plan`] model and workload profiles
//! - Typed command lines and the rendered plan artifact
//! - The allowlisted command executor
//! - Audit entries and sinks
//! - Error handling

pub mod audit;
pub mod command;
pub mod error;
pub mod exec;
pub mod plan;
pub mod profile;
pub mod rendered;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use audit::{AuditAction, AuditEntry, AuditFilter, AuditSink, JsonlAuditLog, MemoryAuditLog};
pub use command::{Binary, CommandLine};
pub use error::*;
pub use exec::{AllowlistedExecutor, CommandExecutor, CommandOutput};
pub use plan::*;
pub use profile::WorkloadProfile;
pub use rendered::RenderedPlan;
