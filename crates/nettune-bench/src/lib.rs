//! nettune bench - network probes and the keep/rollback decision
//!
//! [`BenchmarkEngine`] produces [`BenchmarkResult`] snapshots; [`compare`]
//! scores a before/after pair against a workload profile.

pub mod decision;
pub mod engine;
pub mod probes;
pub mod result;
pub mod scoring;

pub use decision::{compare, compare_with_objectives, objective_misses, Decision, DecisionResult};
pub use engine::{BenchmarkEngine, BenchmarkSettings, QUICK_PING_COUNT};
pub use result::{
    BenchmarkResult, BenchmarkTests, LatencyStats, Probe, ThroughputStats, TimingStats,
};
pub use scoring::{Grade, Metric, ProfilePolicy};
