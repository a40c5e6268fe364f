//! Change plan model
//!
//! A [`Plan`] is the declarative description of a tuning change: which
//! interface, which workload it targets and which categories of host
//! configuration to touch. Every category in [`Changes`] is optional and
//! renders independently. Values of these types are only produced by the
//! validator's normalization step and are never mutated afterwards.

use crate::profile::WorkloadProfile;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Validated change plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub iface: String,
    pub profile: WorkloadProfile,
    #[serde(default, deserialize_with = "null_as_default")]
    pub changes: Changes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<Rationale>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<ValidateSpec>,
}

/// An explicit `null` reads the same as an omitted field
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::deserialize(de)?.unwrap_or_default())
}

impl Plan {
    /// Minimal plan with no changes
    pub fn new(iface: impl Into<String>, profile: WorkloadProfile) -> Self {
        Self {
            iface: iface.into(),
            profile,
            changes: Changes::default(),
            rationale: None,
            validate: None,
        }
    }
}

/// Free-text justification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rationale {
    Text(String),
    Items(Vec<String>),
}

/// Requested modifications, grouped by category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Changes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qdisc: Option<Qdisc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shaper: Option<Shaper>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netem: Option<Netem>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub htb_classes: Vec<HtbClass>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub sysctl: BTreeMap<String, SysctlValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offloads: Option<Offloads>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub dscp: Vec<DscpRule>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub connection_limits: Vec<ConnectionLimit>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub rate_limits: Vec<RateLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_tracking: Option<ConnectionTracking>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub nat_rules: Vec<NatRule>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self == &Changes::default()
    }

    /// Any of the traffic-control categories is present
    pub fn touches_tc(&self) -> bool {
        self.qdisc.is_some()
            || self.shaper.is_some()
            || self.netem.is_some()
            || !self.htb_classes.is_empty()
    }

    /// Any of the packet-filter categories is present
    pub fn touches_nft(&self) -> bool {
        !self.dscp.is_empty()
            || !self.connection_limits.is_empty()
            || !self.rate_limits.is_empty()
            || !self.nat_rules.is_empty()
    }
}

// =============================================================================
// Traffic control
// =============================================================================

/// Root queueing discipline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Qdisc {
    #[serde(rename = "type")]
    pub kind: QdiscKind,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub params: BTreeMap<String, ParamValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QdiscKind {
    Htb,
    Cake,
    FqCodel,
    Fq,
    PfifoFast,
}

impl QdiscKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QdiscKind::Htb => "htb",
            QdiscKind::Cake => "cake",
            QdiscKind::FqCodel => "fq_codel",
            QdiscKind::Fq => "fq",
            QdiscKind::PfifoFast => "pfifo_fast",
        }
    }

    pub fn from_kernel_name(name: &str) -> Option<Self> {
        match name {
            "htb" => Some(QdiscKind::Htb),
            "cake" => Some(QdiscKind::Cake),
            "fq_codel" => Some(QdiscKind::FqCodel),
            "fq" => Some(QdiscKind::Fq),
            "pfifo_fast" => Some(QdiscKind::PfifoFast),
            _ => None,
        }
    }
}

impl fmt::Display for QdiscKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar qdisc parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

/// Bandwidth limits in Mbit/s
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Shaper {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_mbit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_mbit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceil_mbit: Option<u32>,
}

/// Network emulation parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Netem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_jitter_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrupt_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reorder_pct: Option<f64>,
}

/// HTB child class under the root class `1:1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HtbClass {
    pub classid: String,
    pub rate_mbit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceil_mbit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_kb: Option<u32>,
}

// =============================================================================
// Kernel parameters and link settings
// =============================================================================

/// Kernel parameter value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SysctlValue {
    Integer(i64),
    Text(String),
}

impl SysctlValue {
    /// Value with whitespace runs collapsed, as `sysctl -a` prints it
    pub fn normalized(&self) -> String {
        match self {
            SysctlValue::Integer(i) => i.to_string(),
            SysctlValue::Text(s) => s.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }
}

impl fmt::Display for SysctlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysctlValue::Integer(i) => write!(f, "{}", i),
            SysctlValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for SysctlValue {
    fn from(v: i64) -> Self {
        SysctlValue::Integer(v)
    }
}

impl From<&str> for SysctlValue {
    fn from(v: &str) -> Self {
        SysctlValue::Text(v.to_string())
    }
}

/// NIC offload toggles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Offloads {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gro: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gso: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tso: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lro: Option<bool>,
}

impl Offloads {
    /// Requested toggles in rendering order
    pub fn entries(&self) -> Vec<(&'static str, bool)> {
        [("gro", self.gro), ("gso", self.gso), ("tso", self.tso), ("lro", self.lro)]
            .into_iter()
            .filter_map(|(name, v)| v.map(|on| (name, on)))
            .collect()
    }
}

// =============================================================================
// Packet filter
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proto {
    Tcp,
    Udp,
}

impl Proto {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::Tcp => "tcp",
            Proto::Udp => "udp",
        }
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DSCP marking rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DscpRule {
    #[serde(rename = "match")]
    pub matcher: DscpMatch,
    pub dscp: DscpClass,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DscpMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<Proto>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub sports: Vec<u16>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub dports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
}

/// Supported DSCP code points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DscpClass {
    Ef,
    Cs4,
    Cs5,
    Cs6,
    Af41,
    Af42,
    Af43,
}

impl DscpClass {
    pub const NAMES: [&'static str; 7] = ["EF", "CS4", "CS5", "CS6", "AF41", "AF42", "AF43"];

    /// Keyword understood by nft
    pub fn nft_keyword(&self) -> &'static str {
        match self {
            DscpClass::Ef => "ef",
            DscpClass::Cs4 => "cs4",
            DscpClass::Cs5 => "cs5",
            DscpClass::Cs6 => "cs6",
            DscpClass::Af41 => "af41",
            DscpClass::Af42 => "af42",
            DscpClass::Af43 => "af43",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionLimit {
    pub protocol: Proto,
    pub port: u16,
    pub limit: u32,
    #[serde(default = "default_mask", deserialize_with = "mask_or_default")]
    pub mask: u8,
}

fn default_mask() -> u8 {
    32
}

fn mask_or_default<'de, D: Deserializer<'de>>(de: D) -> Result<u8, D::Error> {
    Ok(Option::deserialize(de)?.unwrap_or_else(default_mask))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimit {
    pub rate: String,
    #[serde(default = "default_burst", deserialize_with = "burst_or_default")]
    pub burst: u32,
}

fn default_burst() -> u32 {
    10
}

fn burst_or_default<'de, D: Deserializer<'de>>(de: D) -> Result<u32, D::Error> {
    Ok(Option::deserialize(de)?.unwrap_or_else(default_burst))
}

/// Time unit of a packet rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl RateUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateUnit::Second => "second",
            RateUnit::Minute => "minute",
            RateUnit::Hour => "hour",
            RateUnit::Day => "day",
        }
    }
}

impl RateLimit {
    /// Parse `"<count>/<unit>"`
    pub fn parse_rate(rate: &str) -> Option<(u64, RateUnit)> {
        let (count, unit) = rate.split_once('/')?;
        let count: u64 = count.trim().parse().ok()?;
        let unit = match unit.trim() {
            "second" => RateUnit::Second,
            "minute" => RateUnit::Minute,
            "hour" => RateUnit::Hour,
            "day" => RateUnit::Day,
            _ => return None,
        };
        Some((count, unit))
    }
}

/// Conntrack table tuning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionTracking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_timeout_established: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_timeout_close_wait: Option<u64>,
}

impl ConnectionTracking {
    pub const MAX_KEY: &'static str = "net.netfilter.nf_conntrack_max";
    pub const ESTABLISHED_KEY: &'static str = "net.netfilter.nf_conntrack_tcp_timeout_established";
    pub const CLOSE_WAIT_KEY: &'static str = "net.netfilter.nf_conntrack_tcp_timeout_close_wait";

    /// Kernel parameters this block sets
    pub fn sysctl_entries(&self) -> Vec<(&'static str, u64)> {
        [
            (Self::MAX_KEY, self.max_connections),
            (Self::ESTABLISHED_KEY, self.tcp_timeout_established),
            (Self::CLOSE_WAIT_KEY, self.tcp_timeout_close_wait),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NatRule {
    #[serde(rename = "type")]
    pub kind: NatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Proto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dport: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_addr: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NatKind {
    Masquerade,
    Snat,
    Dnat,
}

// =============================================================================
// Benchmark expectations
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Targets>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectives: Option<Objectives>,
}

/// Probe endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Targets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iperf: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Objectives {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_p95_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput_mbps: Option<f64>,
}
