//! Keep-or-rollback decision over a before/after benchmark pair

use crate::result::BenchmarkResult;
use crate::scoring::ProfilePolicy;
use chrono::{DateTime, Utc};
use nettune_common::{NetTuneError, Objectives, WorkloadProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Keep,
    Rollback,
    Uncertain,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::Keep => "KEEP",
            Decision::Rollback => "ROLLBACK",
            Decision::Uncertain => "UNCERTAIN",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub profile: WorkloadProfile,
    pub decision: Decision,
    pub score: i32,
    pub summary: String,
    pub reasons: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
    pub before_timestamp: DateTime<Utc>,
    pub after_timestamp: DateTime<Utc>,
}

/// Score `after` against `before` for a workload profile
pub fn compare(
    before: &BenchmarkResult,
    after: &BenchmarkResult,
    profile: WorkloadProfile,
) -> DecisionResult {
    let policy = ProfilePolicy::for_profile(profile);
    let mut result = DecisionResult {
        profile,
        decision: Decision::Uncertain,
        score: 0,
        summary: String::new(),
        reasons: Vec::new(),
        metrics: BTreeMap::new(),
        before_timestamp: before.timestamp,
        after_timestamp: after.timestamp,
    };

    let missing: Vec<String> = policy
        .required
        .iter()
        .filter_map(|metric| {
            let side = match (metric.read(before), metric.read(after)) {
                (Some(_), Some(_)) => return None,
                (None, Some(_)) => "before",
                (Some(_), None) => "after",
                (None, None) => "either",
            };
            Some(
                NetTuneError::BenchmarkUnavailable(format!(
                    "{} probe not available in {} run",
                    metric.probe(),
                    side
                ))
                .to_string(),
            )
        })
        .collect();
    if !missing.is_empty() {
        result.summary =
            format!("cannot judge {} changes without the required measurements", profile);
        result.reasons = missing;
        return result;
    }

    let mut total = 0;
    for table in policy.tables {
        let (score, scores) = table.evaluate(before, after);
        total += score;
        if policy.tables.len() > 1 {
            result.reasons.push(format!("{} score: {}", table.name, score));
        }
        for s in scores {
            result.reasons.push(s.reason);
            result.metrics.extend(s.metrics);
        }
    }
    result.score = total.div_euclid(policy.tables.len().max(1) as i32);

    result.decision = if result.score >= policy.keep_at {
        Decision::Keep
    } else if result.score <= policy.rollback_at {
        Decision::Rollback
    } else {
        Decision::Uncertain
    };
    result.summary = match result.decision {
        Decision::Keep => format!(
            "changes improved {} performance (score {}, keep at {})",
            profile, result.score, policy.keep_at
        ),
        Decision::Rollback => format!(
            "changes degraded {} performance (score {}, rollback at {})",
            profile, result.score, policy.rollback_at
        ),
        Decision::Uncertain => format!(
            "mixed results for {} (score {}); review the metrics",
            profile, result.score
        ),
    };
    tracing::info!("Decision for {}: {} (score {})", profile, result.decision, result.score);
    result
}

/// Like [`compare`], but a KEEP that misses a stated objective is downgraded to UNCERTAIN
pub fn compare_with_objectives(
    before: &BenchmarkResult,
    after: &BenchmarkResult,
    profile: WorkloadProfile,
    objectives: &Objectives,
) -> DecisionResult {
    let mut result = compare(before, after, profile);
    let misses = objective_misses(objectives, after);
    if !misses.is_empty() {
        if result.decision == Decision::Keep {
            result.decision = Decision::Uncertain;
            result.summary = format!("{}; objectives not met", result.summary);
        }
        result.reasons.extend(misses);
    }
    result
}

/// Objectives the run does not meet; an unmeasured objective counts as missed
pub fn objective_misses(objectives: &Objectives, result: &BenchmarkResult) -> Vec<String> {
    let latency = result.tests.latency.metrics();
    let throughput = result.tests.throughput.metrics();
    let mut misses = Vec::new();

    let mut check_max = |name: &str, limit: Option<f64>, value: Option<f64>| match (limit, value) {
        (Some(limit), Some(v)) if v > limit => misses.push(format!(
            "objective missed: {} {:.2} above {:.2}",
            name, v, limit
        )),
        (Some(_), None) => misses.push(format!("objective unmeasured: {}", name)),
        _ => {}
    };
    check_max("latency_p95_ms", objectives.latency_p95_ms, latency.map(|l| l.p95_ms));
    check_max("jitter_ms", objectives.jitter_ms, latency.map(|l| l.jitter_ms));
    check_max("loss_pct", objectives.loss_pct, latency.map(|l| l.packet_loss_pct));

    match (objectives.throughput_mbps, throughput.map(|t| t.throughput_mbps)) {
        (Some(floor), Some(v)) if v < floor => {
            misses.push(format!("objective missed: throughput_mbps {:.2} below {:.2}", v, floor))
        }
        (Some(_), None) => misses.push("objective unmeasured: throughput_mbps".to_string()),
        _ => {}
    }
    misses
}
