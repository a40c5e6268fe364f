//! Benchmark result records

use chrono::{DateTime, Utc};
use nettune_common::WorkloadProfile;
use serde::{Deserialize, Serialize};

/// Outcome of one probe; `metrics` is present exactly when `available` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Probe<T> {
    pub available: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<T>,
}

impl<T> Probe<T> {
    pub fn measured(metrics: T, message: impl Into<String>) -> Self {
        Self { available: true, message: message.into(), metrics: Some(metrics) }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self { available: false, message: message.into(), metrics: None }
    }

    pub fn metrics(&self) -> Option<&T> {
        if self.available {
            self.metrics.as_ref()
        } else {
            None
        }
    }
}

/// ICMP round-trip statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub host: String,
    pub transmitted: u32,
    pub received: u32,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    /// Spread between the fastest and slowest reply
    pub jitter_ms: f64,
    pub stddev_ms: f64,
    pub p95_ms: f64,
    pub packet_loss_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputStats {
    pub host: String,
    pub port: u16,
    pub throughput_mbps: f64,
    pub retransmits: u64,
    pub duration_secs: u32,
}

/// Repeated timing of DNS queries or TCP connects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingStats {
    pub target: String,
    pub samples: u32,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl TimingStats {
    pub fn from_samples(target: &str, samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let min_ms = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            target: target.to_string(),
            samples: samples.len() as u32,
            avg_ms: samples.iter().sum::<f64>() / samples.len() as f64,
            min_ms,
            max_ms,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkTests {
    pub latency: Probe<LatencyStats>,
    pub throughput: Probe<ThroughputStats>,
    pub dns: Probe<TimingStats>,
    pub connect_time: Probe<TimingStats>,
}

/// One benchmark snapshot; never modified after creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub profile: WorkloadProfile,
    pub timestamp: DateTime<Utc>,
    pub tests: BenchmarkTests,
    pub summary: String,
}

impl BenchmarkResult {
    pub fn new(profile: WorkloadProfile, tests: BenchmarkTests) -> Self {
        let summary = summarize(&tests);
        Self { profile, timestamp: Utc::now(), tests, summary }
    }
}

fn summarize(tests: &BenchmarkTests) -> String {
    let mut parts = Vec::new();
    if let Some(lat) = tests.latency.metrics() {
        parts.push(format!(
            "Latency: {:.2}ms (jitter {:.2}ms, loss {:.1}%)",
            lat.avg_ms, lat.jitter_ms, lat.packet_loss_pct
        ));
    }
    if let Some(conn) = tests.connect_time.metrics() {
        parts.push(format!("Connect: {:.2}ms", conn.avg_ms));
    }
    if let Some(dns) = tests.dns.metrics() {
        parts.push(format!("DNS: {:.2}ms", dns.avg_ms));
    }
    if let Some(tp) = tests.throughput.metrics() {
        parts.push(format!("Throughput: {:.2} Mbps", tp.throughput_mbps));
    }
    if parts.is_empty() {
        "No tests available".to_string()
    } else {
        parts.join(" | ")
    }
}
