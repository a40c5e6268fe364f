//! Plan validation
//!
//! Validation runs over the raw, untyped plan so that every problem can be
//! reported with its path in one pass. Schema checks (shape, types, ranges,
//! unknown keys) live here; cross-field rules live in [`crate::rules`].
//! Only a plan with no error-level issue is normalized into a typed
//! [`Plan`].

use crate::cards::CardRegistry;
use crate::rules;
use nettune_common::{DscpClass, NetTuneError, Plan, WorkloadProfile};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Schema,
    Policy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
    pub severity: Severity,
    pub kind: IssueKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub issues: Vec<ValidationIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_plan: Option<Plan>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    /// First error as a typed error, if any
    pub fn first_error(&self) -> Option<NetTuneError> {
        self.errors().next().map(|i| {
            let path = i.path.clone();
            let message = i.message.clone();
            match i.kind {
                IssueKind::Schema => NetTuneError::SchemaViolation { path, message },
                IssueKind::Policy => NetTuneError::PolicyViolation { path, message },
            }
        })
    }
}

/// Issue collector shared by schema and policy passes
#[derive(Debug, Default)]
pub(crate) struct Issues {
    pub(crate) list: Vec<ValidationIssue>,
}

impl Issues {
    fn push(
        &mut self,
        path: &str,
        message: impl Into<String>,
        severity: Severity,
        kind: IssueKind,
    ) {
        self.list.push(ValidationIssue {
            path: path.to_string(),
            message: message.into(),
            severity,
            kind,
        });
    }

    pub(crate) fn schema(&mut self, path: &str, message: impl Into<String>) {
        self.push(path, message, Severity::Error, IssueKind::Schema);
    }

    pub(crate) fn policy(&mut self, path: &str, message: impl Into<String>) {
        self.push(path, message, Severity::Error, IssueKind::Policy);
    }

    pub(crate) fn warn(&mut self, path: &str, message: impl Into<String>) {
        self.push(path, message, Severity::Warning, IssueKind::Policy);
    }

    fn has_errors(&self) -> bool {
        self.list.iter().any(|i| i.severity == Severity::Error)
    }
}

pub(crate) fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

pub(crate) fn index(prefix: &str, i: usize) -> String {
    format!("{}[{}]", prefix, i)
}

fn iface_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.:@-]{1,15}$").expect("valid regex"))
}

fn param_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid regex"))
}

fn param_text_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._:/-]+$").expect("valid regex"))
}

fn sysctl_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*(\.[A-Za-z0-9_-]+)+$").expect("valid regex"))
}

fn sysctl_text_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9 \t._:,/-]+$").expect("valid regex"))
}

fn classid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^1:[0-9A-Fa-f]{1,4}$").expect("valid regex"))
}

fn host_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9.:_-]+$").expect("valid regex"))
}

/// Minor number of an HTB class id such as `1:1a`
pub(crate) fn classid_minor(classid: &str) -> Option<u32> {
    if !classid_re().is_match(classid) {
        return None;
    }
    classid.split_once(':').and_then(|(_, minor)| u32::from_str_radix(minor, 16).ok())
}

/// Field-level schema checker for one JSON object
struct Obj<'a> {
    map: &'a Map<String, Value>,
    path: String,
}

impl<'a> Obj<'a> {
    fn open(value: &'a Value, path: &str, issues: &mut Issues) -> Option<Self> {
        match value.as_object() {
            Some(map) => Some(Self { map, path: path.to_string() }),
            None => {
                issues.schema(path, format!("expected an object, found {}", type_name(value)));
                None
            }
        }
    }

    fn at(&self, key: &str) -> String {
        join(&self.path, key)
    }

    fn allow_keys(&self, allowed: &[&str], issues: &mut Issues) {
        for key in self.map.keys() {
            if !allowed.contains(&key.as_str()) {
                issues.schema(&self.at(key), "unknown field");
            }
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    fn require(&self, key: &str, issues: &mut Issues) -> Option<&'a Value> {
        let v = self.get(key);
        if v.is_none() {
            issues.schema(&self.at(key), "required field is missing");
        }
        v
    }

    fn int(&self, key: &str, lo: i64, hi: i64, required: bool, issues: &mut Issues) -> Option<i64> {
        let v = if required { self.require(key, issues)? } else { self.get(key)? };
        check_int(v, &self.at(key), lo, hi, issues)
    }

    fn num(&self, key: &str, lo: f64, hi: f64, issues: &mut Issues) -> Option<f64> {
        let v = self.get(key)?;
        match v.as_f64() {
            Some(n) if n >= lo && n <= hi => Some(n),
            Some(n) => {
                issues.schema(&self.at(key), format!("{} is outside {}..={}", n, lo, hi));
                None
            }
            None => {
                issues.schema(&self.at(key), format!("expected a number, found {}", type_name(v)));
                None
            }
        }
    }

    fn boolean(&self, key: &str, issues: &mut Issues) {
        if let Some(v) = self.get(key) {
            if !v.is_boolean() {
                issues.schema(&self.at(key), format!("expected a boolean, found {}", type_name(v)));
            }
        }
    }

    fn string(&self, key: &str, required: bool, issues: &mut Issues) -> Option<&'a str> {
        let v = if required { self.require(key, issues)? } else { self.get(key)? };
        match v.as_str() {
            Some(s) => Some(s),
            None => {
                issues.schema(&self.at(key), format!("expected a string, found {}", type_name(v)));
                None
            }
        }
    }

    fn one_of(
        &self,
        key: &str,
        choices: &[&str],
        required: bool,
        issues: &mut Issues,
    ) -> Option<&'a str> {
        let s = self.string(key, required, issues)?;
        if choices.contains(&s) {
            Some(s)
        } else {
            issues.schema(&self.at(key), format!("{:?} is not one of [{}]", s, choices.join(", ")));
            None
        }
    }

    fn array(&self, key: &str, issues: &mut Issues) -> Option<&'a Vec<Value>> {
        let v = self.get(key)?;
        match v.as_array() {
            Some(items) => Some(items),
            None => {
                issues.schema(&self.at(key), format!("expected a list, found {}", type_name(v)));
                None
            }
        }
    }

    fn object(&self, key: &str, issues: &mut Issues) -> Option<Obj<'a>> {
        let v = self.get(key)?;
        Obj::open(v, &self.at(key), issues)
    }

    fn iface(&self, key: &str, required: bool, issues: &mut Issues) {
        if let Some(name) = self.string(key, required, issues) {
            if !iface_re().is_match(name) {
                issues.schema(&self.at(key), format!("{:?} is not a valid interface name", name));
            }
        }
    }
}

fn check_int(v: &Value, path: &str, lo: i64, hi: i64, issues: &mut Issues) -> Option<i64> {
    match v.as_i64() {
        Some(n) if n >= lo && n <= hi => Some(n),
        Some(n) => {
            issues.schema(path, format!("{} is outside {}..={}", n, lo, hi));
            None
        }
        None => {
            issues.schema(path, format!("expected an integer, found {}", type_name(v)));
            None
        }
    }
}

pub(crate) fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

const PLAN_KEYS: &[&str] = &["iface", "profile", "changes", "rationale", "validate"];
const CHANGE_KEYS: &[&str] = &[
    "qdisc",
    "shaper",
    "netem",
    "htb_classes",
    "sysctl",
    "offloads",
    "mtu",
    "dscp",
    "connection_limits",
    "rate_limits",
    "connection_tracking",
    "nat_rules",
];
const QDISC_TYPES: &[&str] = &["htb", "cake", "fq_codel", "fq", "pfifo_fast"];
const PROTOS: &[&str] = &["tcp", "udp"];
const NAT_TYPES: &[&str] = &["masquerade", "snat", "dnat"];

/// Plan validator
///
/// Holds an optional card registry; without one, kernel parameters are only
/// checked for shape.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    cards: Option<CardRegistry>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cards(cards: CardRegistry) -> Self {
        Self { cards: Some(cards) }
    }

    pub fn cards(&self) -> Option<&CardRegistry> {
        self.cards.as_ref()
    }

    /// Validate a raw plan and, when it has no errors, normalize it
    pub fn validate(&self, raw: &Value) -> ValidationReport {
        let mut issues = Issues::default();
        check_schema(raw, &mut issues);
        rules::check_policy(raw, self.cards.as_ref(), &mut issues);

        let mut normalized_plan = None;
        if !issues.has_errors() {
            match serde_json::from_value::<Plan>(canonical_profile(raw)) {
                Ok(plan) => normalized_plan = Some(plan),
                Err(e) => issues.schema("", format!("plan could not be normalized: {}", e)),
            }
        }

        let ok = normalized_plan.is_some();
        tracing::debug!("Validated plan: ok={} issues={}", ok, issues.list.len());
        ValidationReport { ok, issues: issues.list, normalized_plan }
    }
}

/// Copy of the plan with the profile spelled in its canonical form
fn canonical_profile(raw: &Value) -> Value {
    let mut plan = raw.clone();
    if let Some(obj) = plan.as_object_mut() {
        let canonical = obj
            .get("profile")
            .and_then(Value::as_str)
            .and_then(|p| WorkloadProfile::from_str(p).ok());
        if let Some(profile) = canonical {
            obj.insert("profile".into(), Value::String(profile.as_str().into()));
        }
    }
    plan
}

fn check_schema(raw: &Value, issues: &mut Issues) {
    let Some(plan) = Obj::open(raw, "", issues) else {
        return;
    };
    plan.allow_keys(PLAN_KEYS, issues);

    plan.iface("iface", true, issues);
    if let Some(p) = plan.string("profile", true, issues) {
        if WorkloadProfile::from_str(p).is_err() {
            let names: Vec<_> = WorkloadProfile::ALL.iter().map(|p| p.as_str()).collect();
            issues.schema("profile", format!("{:?} is not one of [{}]", p, names.join(", ")));
        }
    }

    check_rationale(&plan, issues);
    if let Some(validate) = plan.object("validate", issues) {
        check_validate(&validate, issues);
    }
    if let Some(changes) = plan.object("changes", issues) {
        check_changes(&changes, issues);
    }
}

fn check_rationale(plan: &Obj<'_>, issues: &mut Issues) {
    let Some(v) = plan.get("rationale") else {
        return;
    };
    let path = plan.at("rationale");
    let short = |s: &str| s.trim().chars().count() < 3;
    match v {
        Value::String(s) if short(s.as_str()) => {
            issues.schema(&path, "must be at least 3 characters")
        }
        Value::String(_) => {}
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(s) if short(s) => {
                        issues.schema(&index(&path, i), "must be at least 3 characters")
                    }
                    Some(_) => {}
                    None => issues.schema(&index(&path, i), "expected a string"),
                }
            }
        }
        other => issues.schema(
            &path,
            format!("expected a string or list, found {}", type_name(other)),
        ),
    }
}

fn check_validate(validate: &Obj<'_>, issues: &mut Issues) {
    validate.allow_keys(&["targets", "objectives"], issues);
    if let Some(targets) = validate.object("targets", issues) {
        targets.allow_keys(&["ping", "iperf"], issues);
        for key in ["ping", "iperf"] {
            if let Some(host) = targets.string(key, false, issues) {
                if !host_re().is_match(host) {
                    issues.schema(&targets.at(key), format!("{:?} is not a valid host", host));
                }
            }
        }
    }
    if let Some(obj) = validate.object("objectives", issues) {
        obj.allow_keys(&["latency_p95_ms", "jitter_ms", "loss_pct", "throughput_mbps"], issues);
        if let Some(v) = obj.num("latency_p95_ms", 0.0, 1000.0, issues) {
            if v <= 0.0 {
                issues.schema(&obj.at("latency_p95_ms"), "must be greater than 0");
            }
        }
        obj.num("jitter_ms", 0.0, 500.0, issues);
        obj.num("loss_pct", 0.0, 100.0, issues);
        if let Some(v) = obj.num("throughput_mbps", 0.0, f64::MAX, issues) {
            if v <= 0.0 {
                issues.schema(&obj.at("throughput_mbps"), "must be greater than 0");
            }
        }
    }
}

fn check_changes(changes: &Obj<'_>, issues: &mut Issues) {
    changes.allow_keys(CHANGE_KEYS, issues);

    if let Some(qdisc) = changes.object("qdisc", issues) {
        qdisc.allow_keys(&["type", "params"], issues);
        qdisc.one_of("type", QDISC_TYPES, true, issues);
        if let Some(params) = qdisc.object("params", issues) {
            for (key, value) in params.map {
                let path = params.at(key);
                if !param_key_re().is_match(key) {
                    issues.schema(&path, "parameter names must match [a-z][a-z0-9_]*");
                }
                match value {
                    Value::Bool(_) | Value::Number(_) => {}
                    Value::String(s) if param_text_re().is_match(s) => {}
                    Value::String(s) => {
                        issues.schema(&path, format!("{:?} contains disallowed characters", s))
                    }
                    other => issues.schema(
                        &path,
                        format!("expected a scalar, found {}", type_name(other)),
                    ),
                }
            }
        }
    }

    if let Some(shaper) = changes.object("shaper", issues) {
        shaper.allow_keys(&["ingress_mbit", "egress_mbit", "ceil_mbit"], issues);
        for key in ["ingress_mbit", "egress_mbit", "ceil_mbit"] {
            shaper.int(key, 1, 100_000, false, issues);
        }
    }

    if let Some(netem) = changes.object("netem", issues) {
        netem.allow_keys(
            &[
                "delay_ms",
                "delay_jitter_ms",
                "loss_pct",
                "duplicate_pct",
                "corrupt_pct",
                "reorder_pct",
            ],
            issues,
        );
        netem.num("delay_ms", 0.0, 60_000.0, issues);
        netem.num("delay_jitter_ms", 0.0, 60_000.0, issues);
        for key in ["loss_pct", "duplicate_pct", "corrupt_pct", "reorder_pct"] {
            netem.num(key, 0.0, 100.0, issues);
        }
    }

    if let Some(classes) = changes.array("htb_classes", issues) {
        let base = changes.at("htb_classes");
        for (i, item) in classes.iter().enumerate() {
            let Some(class) = Obj::open(item, &index(&base, i), issues) else {
                continue;
            };
            class.allow_keys(
                &["classid", "rate_mbit", "ceil_mbit", "priority", "burst_kb"],
                issues,
            );
            if let Some(id) = class.string("classid", true, issues) {
                match classid_minor(id) {
                    Some(0) | None => issues.schema(
                        &class.at("classid"),
                        format!("{:?} is not a valid class id (1:<hex>)", id),
                    ),
                    Some(_) => {}
                }
            }
            class.int("rate_mbit", 1, 100_000, true, issues);
            class.int("ceil_mbit", 1, 100_000, false, issues);
            class.int("priority", 0, 7, false, issues);
            class.int("burst_kb", 1, 1_048_576, false, issues);
        }
    }

    if let Some(sysctl) = changes.object("sysctl", issues) {
        for (key, value) in sysctl.map {
            let path = sysctl.at(key);
            if !sysctl_key_re().is_match(key) {
                issues.schema(&path, "not a valid kernel parameter name");
            }
            match value {
                Value::Number(n) if n.is_i64() => {}
                Value::String(s) if sysctl_text_re().is_match(s) => {}
                Value::String(s) => {
                    issues.schema(&path, format!("{:?} contains disallowed characters", s))
                }
                other => issues.schema(
                    &path,
                    format!("expected an integer or string, found {}", type_name(other)),
                ),
            }
        }
    }

    if let Some(offloads) = changes.object("offloads", issues) {
        offloads.allow_keys(&["gro", "gso", "tso", "lro"], issues);
        for key in ["gro", "gso", "tso", "lro"] {
            offloads.boolean(key, issues);
        }
    }

    changes.int("mtu", 576, 9000, false, issues);

    if let Some(rules) = changes.array("dscp", issues) {
        let base = changes.at("dscp");
        for (i, item) in rules.iter().enumerate() {
            let Some(rule) = Obj::open(item, &index(&base, i), issues) else {
                continue;
            };
            rule.allow_keys(&["match", "dscp"], issues);
            rule.one_of("dscp", &DscpClass::NAMES, true, issues);
            if rule.require("match", issues).is_some() {
                if let Some(m) = rule.object("match", issues) {
                    check_dscp_match(&m, issues);
                }
            }
        }
    }

    if let Some(limits) = changes.array("connection_limits", issues) {
        let base = changes.at("connection_limits");
        for (i, item) in limits.iter().enumerate() {
            let Some(limit) = Obj::open(item, &index(&base, i), issues) else {
                continue;
            };
            limit.allow_keys(&["protocol", "port", "limit", "mask"], issues);
            limit.one_of("protocol", PROTOS, true, issues);
            limit.int("port", 1, 65_535, true, issues);
            limit.int("limit", 1, 100_000, true, issues);
            limit.int("mask", 1, 32, false, issues);
        }
    }

    if let Some(limits) = changes.array("rate_limits", issues) {
        let base = changes.at("rate_limits");
        for (i, item) in limits.iter().enumerate() {
            let Some(limit) = Obj::open(item, &index(&base, i), issues) else {
                continue;
            };
            limit.allow_keys(&["rate", "burst"], issues);
            if let Some(rate) = limit.string("rate", true, issues) {
                match nettune_common::RateLimit::parse_rate(rate) {
                    Some((n, _)) if (1..=10_000_000).contains(&n) => {}
                    Some((n, _)) => {
                        issues.schema(&limit.at("rate"), format!("{} is outside 1..=10000000", n))
                    }
                    None => issues.schema(
                        &limit.at("rate"),
                        format!("{:?} is not <count>/<second|minute|hour|day>", rate),
                    ),
                }
            }
            limit.int("burst", 1, 100_000, false, issues);
        }
    }

    if let Some(ct) = changes.object("connection_tracking", issues) {
        ct.allow_keys(
            &["max_connections", "tcp_timeout_established", "tcp_timeout_close_wait"],
            issues,
        );
        ct.int("max_connections", 1024, 16_777_216, false, issues);
        ct.int("tcp_timeout_established", 1, 2_592_000, false, issues);
        ct.int("tcp_timeout_close_wait", 1, 86_400, false, issues);
    }

    if let Some(rules) = changes.array("nat_rules", issues) {
        let base = changes.at("nat_rules");
        for (i, item) in rules.iter().enumerate() {
            let Some(rule) = Obj::open(item, &index(&base, i), issues) else {
                continue;
            };
            rule.allow_keys(&["type", "iface", "protocol", "dport", "to_addr", "to_port"], issues);
            rule.one_of("type", NAT_TYPES, true, issues);
            rule.iface("iface", false, issues);
            rule.one_of("protocol", PROTOS, false, issues);
            rule.int("dport", 1, 65_535, false, issues);
            rule.int("to_port", 1, 65_535, false, issues);
            if let Some(addr) = rule.string("to_addr", false, issues) {
                if IpAddr::from_str(addr).is_err() {
                    issues.schema(&rule.at("to_addr"), format!("{:?} is not an IP address", addr));
                }
            }
        }
    }
}

fn check_dscp_match(m: &Obj<'_>, issues: &mut Issues) {
    m.allow_keys(&["proto", "sports", "dports", "src", "dst"], issues);
    m.one_of("proto", PROTOS, false, issues);
    for key in ["sports", "dports"] {
        if let Some(ports) = m.array(key, issues) {
            for (i, port) in ports.iter().enumerate() {
                check_int(port, &index(&m.at(key), i), 1, 65_535, issues);
            }
        }
    }
    for key in ["src", "dst"] {
        if let Some(cidr) = m.string(key, false, issues) {
            if cidr.parse::<ipnetwork::IpNetwork>().is_err() {
                issues.schema(&m.at(key), format!("{:?} is not a valid CIDR", cidr));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn validate(v: Value) -> ValidationReport {
        Validator::new().validate(&v)
    }

    fn paths(report: &ValidationReport) -> Vec<String> {
        report.issues.iter().map(|i| i.path.clone()).collect()
    }

    #[test]
    fn test_minimal_plan_ok() {
        let report = validate(json!({"iface": "eth0", "profile": "gaming", "changes": {}}));
        assert!(report.ok);
        assert!(report.issues.is_empty());
        let plan = report.normalized_plan.unwrap();
        assert!(plan.changes.is_empty());
    }

    #[test]
    fn test_unknown_top_level_key() {
        let report = validate(json!({
            "iface": "eth0", "profile": "gaming", "changes": {}, "extra": 1
        }));
        assert!(!report.ok);
        assert!(report.normalized_plan.is_none());
        assert_eq!(paths(&report), vec!["extra"]);
        assert_eq!(report.issues[0].kind, IssueKind::Schema);
    }

    #[test]
    fn test_bad_dscp_class() {
        let report = validate(json!({
            "iface": "eth0", "profile": "gaming",
            "changes": {"dscp": [{"match": {"proto": "udp", "dports": [3074]}, "dscp": "BE"}]}
        }));
        assert!(!report.ok);
        assert_eq!(paths(&report), vec!["changes.dscp[0].dscp"]);
    }

    #[test]
    fn test_egress_out_of_range() {
        let report = validate(json!({
            "iface": "eth0", "profile": "gaming",
            "changes": {"shaper": {"egress_mbit": 100001}}
        }));
        assert!(!report.ok);
        assert_eq!(paths(&report), vec!["changes.shaper.egress_mbit"]);
    }

    #[test]
    fn test_collects_every_issue() {
        let report = validate(json!({
            "iface": "this-name-is-way-too-long",
            "profile": "turbo",
            "changes": {
                "mtu": 100,
                "offloads": {"gro": "yes"},
                "htb_classes": [{"classid": "2:10"}],
                "sysctl": {"net.core.somaxconn": 1.5}
            }
        }));
        assert!(!report.ok);
        let p = paths(&report);
        for expected in [
            "iface",
            "profile",
            "changes.mtu",
            "changes.offloads.gro",
            "changes.htb_classes[0].classid",
            "changes.htb_classes[0].rate_mbit",
            "changes.sysctl.net.core.somaxconn",
        ] {
            assert!(p.iter().any(|x| x == expected), "missing {} in {:?}", expected, p);
        }
    }

    #[test]
    fn test_missing_required_fields() {
        let report = validate(json!({"changes": {}}));
        assert_eq!(paths(&report), vec!["iface", "profile"]);
    }

    #[test]
    fn test_non_object_plan() {
        let report = validate(json!([1, 2]));
        assert!(!report.ok);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn test_qdisc_params_restricted() {
        let report = validate(json!({
            "iface": "eth0", "profile": "gaming",
            "changes": {
                "qdisc": {"type": "fq_codel", "params": {"target": "5ms; reboot", "Limit": 100}}
            }
        }));
        let p = paths(&report);
        assert!(p.contains(&"changes.qdisc.params.target".to_string()));
        assert!(p.contains(&"changes.qdisc.params.Limit".to_string()));
    }

    #[test]
    fn test_full_plan_normalizes() {
        let report = validate(json!({
            "iface": "eth0",
            "profile": "low-latency",
            "rationale": ["reduce bufferbloat"],
            "validate": {"targets": {"ping": "1.1.1.1"}, "objectives": {"latency_p95_ms": 20}},
            "changes": {
                "qdisc": {"type": "htb", "params": {"r2q": 10}},
                "shaper": {"egress_mbit": 90, "ceil_mbit": 100, "ingress_mbit": 200},
                "netem": {"delay_ms": 5, "delay_jitter_ms": 1},
                "htb_classes": [
                    {"classid": "1:10", "rate_mbit": 20, "ceil_mbit": 50, "priority": 0}
                ],
                "sysctl": {"net.core.default_qdisc": "fq", "net.ipv4.tcp_fastopen": 3},
                "offloads": {"gro": false},
                "mtu": 1500,
                "dscp": [{
                    "match": {"proto": "udp", "dports": [3074], "dst": "10.0.0.0/8"},
                    "dscp": "EF"
                }],
                "connection_limits": [{"protocol": "tcp", "port": 22, "limit": 10}],
                "rate_limits": [{"rate": "100/second"}],
                "connection_tracking": {"max_connections": 262144},
                "nat_rules": [{"type": "masquerade", "iface": "eth1"}]
            }
        }));
        assert!(report.ok, "{:?}", report.issues);
        let plan = report.normalized_plan.unwrap();
        assert_eq!(plan.profile, WorkloadProfile::LowLatency);
        assert_eq!(plan.changes.connection_limits[0].mask, 32);
        assert_eq!(plan.changes.rate_limits[0].burst, 10);
    }

    #[test]
    fn test_first_error_mapping() {
        let report = validate(json!({"iface": "eth0", "profile": "gaming", "bogus": true}));
        assert!(matches!(report.first_error(), Some(NetTuneError::SchemaViolation { .. })));
    }

    #[test]
    fn test_null_fields_read_as_absent() {
        let report = validate(json!({
            "iface": "eth0", "profile": "gaming", "rationale": null,
            "changes": {
                "dscp": null,
                "sysctl": null,
                "shaper": null,
                "rate_limits": [{"rate": "5/second", "burst": null}]
            }
        }));
        assert!(report.ok, "{:?}", report.issues);
        let plan = report.normalized_plan.unwrap();
        assert!(plan.changes.dscp.is_empty());
        assert!(plan.changes.sysctl.is_empty());
        assert_eq!(plan.changes.rate_limits[0].burst, 10);
    }

    #[test]
    fn test_null_field_alongside_other_errors() {
        let report = validate(json!({
            "iface": "eth0", "profile": "gaming",
            "changes": {"dscp": null, "htb_classes": null, "mtu": 100}
        }));
        assert!(!report.ok);
        assert_eq!(paths(&report), vec!["changes.mtu"]);
    }

    #[test]
    fn test_classid_minor() {
        assert_eq!(classid_minor("1:10"), Some(0x10));
        assert_eq!(classid_minor("1:a"), Some(0xa));
        assert_eq!(classid_minor("2:10"), None);
        assert_eq!(classid_minor("1:"), None);
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            (-1.0e6f64..1.0e6).prop_map(Value::from),
            "[a-z0-9_.:/]{0,12}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
                proptest::collection::btree_map("[a-z_]{1,10}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn changes_value() -> impl Strategy<Value = Value> {
        let keys = proptest::sample::select(CHANGE_KEYS.to_vec());
        proptest::collection::btree_map(keys, json_value(), 0..6)
            .prop_map(|m| Value::Object(m.into_iter().map(|(k, v)| (k.to_string(), v)).collect()))
    }

    proptest! {
        #[test]
        fn prop_arbitrary_json_never_panics(raw in json_value()) {
            let report = validate(raw);
            prop_assert_eq!(report.ok, report.normalized_plan.is_some());
        }

        #[test]
        fn prop_issues_are_attributed_to_fields(changes in changes_value()) {
            let report =
                validate(json!({"iface": "eth0", "profile": "gaming", "changes": changes}));
            prop_assert_eq!(report.ok, report.normalized_plan.is_some());
            prop_assert!(report.ok || !report.issues.is_empty());
            let unplaced: Vec<_> = report.issues.iter().filter(|i| i.path.is_empty()).collect();
            prop_assert!(unplaced.is_empty(), "{:?}", unplaced);
        }
    }
}
