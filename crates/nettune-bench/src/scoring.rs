//! Per-profile scoring tables
//!
//! A criterion compares one metric between the before and after runs and
//! contributes signed points. Profiles combine one or more tables and set the
//! keep and rollback thresholds on the aggregate.

use crate::result::BenchmarkResult;
use nettune_common::WorkloadProfile;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    LatencyAvg,
    LatencyMax,
    Jitter,
    PacketLoss,
    Throughput,
    Retransmits,
    ConnectTime,
    DnsTime,
}

impl Metric {
    /// Prefix of the keys this metric contributes to the decision metrics map
    pub const fn key(&self) -> &'static str {
        match self {
            Metric::LatencyAvg => "latency_avg_ms",
            Metric::LatencyMax => "latency_max_ms",
            Metric::Jitter => "jitter_ms",
            Metric::PacketLoss => "packet_loss_pct",
            Metric::Throughput => "throughput_mbps",
            Metric::Retransmits => "retransmits",
            Metric::ConnectTime => "connect_ms",
            Metric::DnsTime => "dns_ms",
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Metric::LatencyAvg => "latency",
            Metric::LatencyMax => "max latency",
            Metric::Jitter => "jitter",
            Metric::PacketLoss => "packet loss",
            Metric::Throughput => "throughput",
            Metric::Retransmits => "retransmits",
            Metric::ConnectTime => "connect time",
            Metric::DnsTime => "DNS query time",
        }
    }

    const fn unit(&self) -> &'static str {
        match self {
            Metric::PacketLoss => "%",
            Metric::Throughput => " Mbps",
            Metric::Retransmits => "",
            _ => "ms",
        }
    }

    /// Probe that produces this metric
    pub const fn probe(&self) -> &'static str {
        match self {
            Metric::LatencyAvg | Metric::LatencyMax | Metric::Jitter | Metric::PacketLoss => {
                "latency"
            }
            Metric::Throughput | Metric::Retransmits => "throughput",
            Metric::ConnectTime => "connect_time",
            Metric::DnsTime => "dns",
        }
    }

    pub fn read(&self, result: &BenchmarkResult) -> Option<f64> {
        let tests = &result.tests;
        match self {
            Metric::LatencyAvg => tests.latency.metrics().map(|m| m.avg_ms),
            Metric::LatencyMax => tests.latency.metrics().map(|m| m.max_ms),
            Metric::Jitter => tests.latency.metrics().map(|m| m.jitter_ms),
            Metric::PacketLoss => tests.latency.metrics().map(|m| m.packet_loss_pct),
            Metric::Throughput => tests.throughput.metrics().map(|m| m.throughput_mbps),
            Metric::Retransmits => tests.throughput.metrics().map(|m| m.retransmits as f64),
            Metric::ConnectTime => tests.connect_time.metrics().map(|m| m.avg_ms),
            Metric::DnsTime => tests.dns.metrics().map(|m| m.avg_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Grade {
    Excellent,
    Good,
    Neutral,
    Caution,
    Bad,
}

impl Grade {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Grade::Excellent => "EXCELLENT",
            Grade::Good => "GOOD",
            Grade::Neutral => "NEUTRAL",
            Grade::Caution => "CAUTION",
            Grade::Bad => "BAD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LowerIsBetter,
    HigherIsBetter,
}

/// Band boundary as a factor of the before value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub factor: f64,
    /// Whether landing exactly on the boundary still counts
    pub inclusive: bool,
    pub points: i32,
    pub grade: Grade,
}

impl Band {
    pub const fn strict(factor: f64, points: i32, grade: Grade) -> Self {
        Self { factor, inclusive: false, points, grade }
    }

    pub const fn inclusive(factor: f64, points: i32, grade: Grade) -> Self {
        Self { factor, inclusive: true, points, grade }
    }

    fn hit(&self, direction: Direction, before: f64, after: f64) -> bool {
        let bound = before * self.factor;
        match (direction, self.inclusive) {
            (Direction::LowerIsBetter, false) => after < bound,
            (Direction::LowerIsBetter, true) => after <= bound,
            (Direction::HigherIsBetter, false) => after > bound,
            (Direction::HigherIsBetter, true) => after >= bound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    /// First matching band wins, `otherwise` applies past the last one
    Relative { direction: Direction, bands: &'static [Band], otherwise: (i32, Grade) },
    /// Loss is judged on absolute percentages as well as the change
    PacketLoss,
    /// Retransmit counts; zero before and after is the best outcome
    Retransmits,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Criterion {
    pub metric: Metric,
    pub rule: Rule,
    /// Points when the metric is missing from either run
    pub missing_points: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringTable {
    pub name: &'static str,
    pub criteria: &'static [Criterion],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilePolicy {
    /// Scores of several tables are averaged
    pub tables: &'static [ScoringTable],
    /// Metrics without which no decision is made
    pub required: &'static [Metric],
    pub keep_at: i32,
    pub rollback_at: i32,
}

/// Latency, jitter and loss dominate
pub const LATENCY_TABLE: ScoringTable = ScoringTable {
    name: "latency-focused",
    criteria: &[
        Criterion {
            metric: Metric::LatencyAvg,
            rule: Rule::Relative {
                direction: Direction::LowerIsBetter,
                bands: &[
                    Band::strict(0.95, 40, Grade::Excellent),
                    Band::strict(0.98, 30, Grade::Good),
                    Band::inclusive(1.02, 20, Grade::Neutral),
                    Band::inclusive(1.05, -20, Grade::Caution),
                ],
                otherwise: (-40, Grade::Bad),
            },
            missing_points: 0,
        },
        Criterion {
            metric: Metric::Jitter,
            rule: Rule::Relative {
                direction: Direction::LowerIsBetter,
                bands: &[
                    Band::strict(0.90, 30, Grade::Excellent),
                    Band::strict(0.95, 20, Grade::Good),
                    Band::inclusive(1.10, 10, Grade::Neutral),
                    Band::inclusive(1.25, -20, Grade::Caution),
                ],
                otherwise: (-30, Grade::Bad),
            },
            missing_points: 0,
        },
        Criterion { metric: Metric::PacketLoss, rule: Rule::PacketLoss, missing_points: 0 },
        Criterion {
            metric: Metric::ConnectTime,
            rule: Rule::Relative {
                direction: Direction::LowerIsBetter,
                bands: &[
                    Band::strict(0.90, 10, Grade::Good),
                    Band::inclusive(1.10, 5, Grade::Neutral),
                ],
                otherwise: (-5, Grade::Caution),
            },
            missing_points: 0,
        },
        Criterion {
            metric: Metric::DnsTime,
            rule: Rule::Relative {
                direction: Direction::LowerIsBetter,
                bands: &[
                    Band::strict(0.90, 5, Grade::Good),
                    Band::inclusive(1.10, 0, Grade::Neutral),
                ],
                otherwise: (-5, Grade::Caution),
            },
            missing_points: 0,
        },
    ],
};

/// Bandwidth dominates; latency only has to stay put
pub const THROUGHPUT_TABLE: ScoringTable = ScoringTable {
    name: "throughput-focused",
    criteria: &[
        Criterion {
            metric: Metric::Throughput,
            rule: Rule::Relative {
                direction: Direction::HigherIsBetter,
                bands: &[
                    Band::strict(1.10, 50, Grade::Excellent),
                    Band::strict(1.05, 40, Grade::Good),
                    Band::inclusive(0.95, 25, Grade::Neutral),
                    Band::inclusive(0.90, -30, Grade::Caution),
                ],
                otherwise: (-50, Grade::Bad),
            },
            missing_points: 25,
        },
        Criterion {
            metric: Metric::LatencyAvg,
            rule: Rule::Relative {
                direction: Direction::LowerIsBetter,
                bands: &[
                    Band::inclusive(1.10, 20, Grade::Good),
                    Band::inclusive(1.25, 10, Grade::Neutral),
                ],
                otherwise: (-20, Grade::Bad),
            },
            missing_points: 0,
        },
        Criterion { metric: Metric::Retransmits, rule: Rule::Retransmits, missing_points: 0 },
    ],
};

/// Average and tail latency only, with tight bands
pub const TAIL_LATENCY_TABLE: ScoringTable = ScoringTable {
    name: "tail-latency",
    criteria: &[
        Criterion {
            metric: Metric::LatencyAvg,
            rule: Rule::Relative {
                direction: Direction::LowerIsBetter,
                bands: &[
                    Band::strict(0.98, 50, Grade::Excellent),
                    Band::inclusive(1.01, 30, Grade::Neutral),
                ],
                otherwise: (-50, Grade::Bad),
            },
            missing_points: 0,
        },
        Criterion {
            metric: Metric::LatencyMax,
            rule: Rule::Relative {
                direction: Direction::LowerIsBetter,
                bands: &[
                    Band::strict(0.95, 50, Grade::Excellent),
                    Band::inclusive(1.05, 30, Grade::Neutral),
                ],
                otherwise: (-50, Grade::Bad),
            },
            missing_points: 0,
        },
    ],
};

impl ProfilePolicy {
    pub const INTERACTIVE: Self = Self {
        tables: &[LATENCY_TABLE],
        required: &[Metric::LatencyAvg],
        keep_at: 40,
        rollback_at: -1,
    };

    pub const BULK: Self = Self {
        tables: &[THROUGHPUT_TABLE],
        required: &[Metric::Throughput],
        keep_at: 35,
        rollback_at: 14,
    };

    pub const MIXED: Self = Self {
        tables: &[LATENCY_TABLE, THROUGHPUT_TABLE],
        required: &[Metric::LatencyAvg],
        keep_at: 50,
        rollback_at: 19,
    };

    pub const STRICT_LATENCY: Self = Self {
        tables: &[TAIL_LATENCY_TABLE],
        required: &[Metric::LatencyAvg],
        keep_at: 60,
        rollback_at: 19,
    };

    pub const fn for_profile(profile: WorkloadProfile) -> Self {
        match profile {
            WorkloadProfile::Gaming | WorkloadProfile::VideoCalls => Self::INTERACTIVE,
            WorkloadProfile::Throughput | WorkloadProfile::BulkTransfer => Self::BULK,
            WorkloadProfile::LowLatency => Self::STRICT_LATENCY,
            WorkloadProfile::Streaming | WorkloadProfile::Server | WorkloadProfile::Balanced => {
                Self::MIXED
            }
        }
    }
}

/// One criterion's contribution
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub points: i32,
    pub grade: Option<Grade>,
    pub reason: String,
    pub metrics: Vec<(String, f64)>,
}

impl Criterion {
    pub fn evaluate(&self, before: &BenchmarkResult, after: &BenchmarkResult) -> Score {
        let (Some(b), Some(a)) = (self.metric.read(before), self.metric.read(after)) else {
            return Score {
                points: self.missing_points,
                grade: None,
                reason: format!("{} not measured in both runs", self.metric.label()),
                metrics: Vec::new(),
            };
        };

        let (points, grade) = match self.rule {
            Rule::Relative { direction, bands, otherwise } => bands
                .iter()
                .find(|band| band.hit(direction, b, a))
                .map(|band| (band.points, band.grade))
                .unwrap_or(otherwise),
            Rule::PacketLoss => packet_loss(b, a),
            Rule::Retransmits => retransmits(b, a),
        };

        let key = self.metric.key();
        let unit = self.metric.unit();
        let change = a - b;
        let mut metrics = vec![
            (format!("{}_before", key), b),
            (format!("{}_after", key), a),
            (format!("{}_change", key), change),
        ];
        let label = self.metric.label();
        let reason = if b > 0.0 {
            let pct = change / b * 100.0;
            metrics.push((format!("{}_change_pct", key), pct));
            format!(
                "{}: {} {:.2}{} -> {:.2}{} ({:+.1}%)",
                grade.as_str(),
                label,
                b,
                unit,
                a,
                unit,
                pct
            )
        } else {
            format!("{}: {} {:.2}{} -> {:.2}{}", grade.as_str(), label, b, unit, a, unit)
        };

        Score { points, grade: Some(grade), reason, metrics }
    }
}

fn packet_loss(before: f64, after: f64) -> (i32, Grade) {
    if after < before && after < 1.0 {
        (20, Grade::Excellent)
    } else if (after - before).abs() < f64::EPSILON && after < 1.0 {
        (15, Grade::Good)
    } else if after <= before * 1.5 && after < 2.0 {
        (5, Grade::Neutral)
    } else if after > 2.0 {
        (-20, Grade::Bad)
    } else {
        (-15, Grade::Caution)
    }
}

fn retransmits(before: f64, after: f64) -> (i32, Grade) {
    if after < before || (after == 0.0 && before == 0.0) {
        (20, Grade::Excellent)
    } else if after <= before * 1.5 {
        (10, Grade::Neutral)
    } else {
        (-20, Grade::Bad)
    }
}

impl ScoringTable {
    pub fn evaluate(&self, before: &BenchmarkResult, after: &BenchmarkResult) -> (i32, Vec<Score>) {
        let scores: Vec<Score> = self.criteria.iter().map(|c| c.evaluate(before, after)).collect();
        (scores.iter().map(|s| s.points).sum(), scores)
    }
}
