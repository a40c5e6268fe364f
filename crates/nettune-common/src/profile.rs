//! Workload profiles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Workload the host is being tuned for.
///
/// Drives both benchmark sample counts and the decision criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadProfile {
    Gaming,
    Streaming,
    VideoCalls,
    BulkTransfer,
    Server,
    Balanced,
    Throughput,
    #[serde(alias = "low-latency")]
    LowLatency,
}

impl WorkloadProfile {
    pub const ALL: [WorkloadProfile; 8] = [
        WorkloadProfile::Gaming,
        WorkloadProfile::Streaming,
        WorkloadProfile::VideoCalls,
        WorkloadProfile::BulkTransfer,
        WorkloadProfile::Server,
        WorkloadProfile::Balanced,
        WorkloadProfile::Throughput,
        WorkloadProfile::LowLatency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadProfile::Gaming => "gaming",
            WorkloadProfile::Streaming => "streaming",
            WorkloadProfile::VideoCalls => "video_calls",
            WorkloadProfile::BulkTransfer => "bulk_transfer",
            WorkloadProfile::Server => "server",
            WorkloadProfile::Balanced => "balanced",
            WorkloadProfile::Throughput => "throughput",
            WorkloadProfile::LowLatency => "low_latency",
        }
    }

    /// Number of ICMP probes a full benchmark sends.
    pub fn ping_samples(&self) -> u32 {
        match self {
            WorkloadProfile::Gaming | WorkloadProfile::LowLatency => 30,
            WorkloadProfile::Throughput | WorkloadProfile::BulkTransfer => 10,
            _ => 20,
        }
    }

    /// Whether the decision for this profile cannot be made without a
    /// throughput measurement.
    pub fn requires_throughput(&self) -> bool {
        matches!(self, WorkloadProfile::Throughput | WorkloadProfile::BulkTransfer)
    }
}

impl Default for WorkloadProfile {
    fn default() -> Self {
        WorkloadProfile::Balanced
    }
}

impl fmt::Display for WorkloadProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        WorkloadProfile::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| format!("unknown profile: {}", s))
    }
}
