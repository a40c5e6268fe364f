//! Cross-field policy rules
//!
//! These run on the raw plan next to the schema pass. Every lookup is
//! lenient: a field with the wrong type is simply treated as absent, since
//! the schema pass already reports it.

use crate::cards::CardRegistry;
use crate::validator::{classid_minor, index, join, Issues};
use nettune_common::{ConnectionTracking, SysctlValue};
use serde_json::Value;
use std::collections::HashSet;

const RESERVED_MINORS: [u32; 2] = [0x1, 0x30];

fn field<'a>(v: &'a Value, key: &str) -> Option<&'a Value> {
    v.get(key).filter(|x| !x.is_null())
}

fn int(v: &Value, key: &str) -> Option<i64> {
    field(v, key).and_then(Value::as_i64)
}

fn num(v: &Value, key: &str) -> Option<f64> {
    field(v, key).and_then(Value::as_f64)
}

fn text<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    field(v, key).and_then(Value::as_str)
}

fn items<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    field(v, key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

pub(crate) fn check_policy(raw: &Value, cards: Option<&CardRegistry>, issues: &mut Issues) {
    let Some(changes) = field(raw, "changes").filter(|c| c.is_object()) else {
        return;
    };
    let qdisc = field(changes, "qdisc").and_then(|q| text(q, "type"));

    check_qdisc(changes, qdisc, issues);
    check_shaper(changes, qdisc, issues);
    check_netem(changes, qdisc, issues);
    check_htb_classes(changes, qdisc, issues);
    check_dscp(changes, issues);
    check_nat(changes, issues);
    check_sysctl(changes, cards, issues);
}

fn check_qdisc(changes: &Value, qdisc: Option<&str>, issues: &mut Issues) {
    if qdisc != Some("pfifo_fast") {
        return;
    }
    let has_params = field(changes, "qdisc")
        .and_then(|q| field(q, "params"))
        .and_then(Value::as_object)
        .is_some_and(|p| !p.is_empty());
    if has_params {
        issues.policy("changes.qdisc.params", "pfifo_fast takes no parameters");
    }
}

fn check_shaper(changes: &Value, qdisc: Option<&str>, issues: &mut Issues) {
    let Some(shaper) = field(changes, "shaper") else {
        return;
    };
    if let (Some(egress), Some(ceil)) = (int(shaper, "egress_mbit"), int(shaper, "ceil_mbit")) {
        if ceil < egress {
            issues.policy(
                "changes.shaper.ceil_mbit",
                format!(
                    "ceil_mbit ({}) must be greater than or equal to egress_mbit ({})",
                    ceil, egress
                ),
            );
        }
    }
    match qdisc {
        None | Some("htb") => {}
        Some("cake") => {
            if int(shaper, "ceil_mbit").is_some() {
                issues.warn(
                    "changes.shaper.ceil_mbit",
                    "cake shapes to egress_mbit; ceil_mbit is ignored",
                );
            }
        }
        Some(other) => issues.policy(
            "changes.shaper",
            format!("shaping requires qdisc type htb or cake, found {}", other),
        ),
    }
}

fn check_netem(changes: &Value, qdisc: Option<&str>, issues: &mut Issues) {
    let Some(netem) = field(changes, "netem") else {
        return;
    };
    if let Some(other) = qdisc.filter(|q| *q != "htb") {
        issues.policy(
            "changes.netem",
            format!("netem can only be combined with an htb qdisc, found {}", other),
        );
    }
    let has_delay = num(netem, "delay_ms").is_some_and(|d| d > 0.0);
    for key in ["delay_jitter_ms", "reorder_pct"] {
        if num(netem, key).is_some_and(|v| v > 0.0) && !has_delay {
            issues.policy(&join("changes.netem", key), format!("{} requires delay_ms", key));
        }
    }
}

fn check_htb_classes(changes: &Value, qdisc: Option<&str>, issues: &mut Issues) {
    let classes = items(changes, "htb_classes");
    if classes.is_empty() {
        return;
    }
    if let Some(other) = qdisc.filter(|q| *q != "htb") {
        issues.policy(
            "changes.htb_classes",
            format!("htb classes require qdisc type htb, found {}", other),
        );
    }

    let root_rate = field(changes, "shaper").and_then(|s| int(s, "egress_mbit"));
    let mut seen = HashSet::new();
    for (i, class) in classes.iter().enumerate() {
        let path = index("changes.htb_classes", i);
        if let (Some(rate), Some(ceil)) = (int(class, "rate_mbit"), int(class, "ceil_mbit")) {
            if ceil < rate {
                issues.policy(
                    &join(&path, "ceil_mbit"),
                    format!(
                        "ceil_mbit ({}) must be greater than or equal to rate_mbit ({})",
                        ceil, rate
                    ),
                );
            }
        }
        if let (Some(rate), Some(root)) = (int(class, "rate_mbit"), root_rate) {
            if rate > root {
                issues.warn(
                    &join(&path, "rate_mbit"),
                    format!("rate exceeds the shaper egress rate ({} mbit)", root),
                );
            }
        }
        let Some(id) = text(class, "classid") else {
            continue;
        };
        let Some(minor) = classid_minor(id) else {
            continue;
        };
        if RESERVED_MINORS.contains(&minor) {
            issues.policy(
                &join(&path, "classid"),
                format!("{} is reserved for the root and default classes", id),
            );
        } else if !seen.insert(minor) {
            issues.policy(&join(&path, "classid"), format!("duplicate class id {}", id));
        }
    }
}

fn family(cidr: &str) -> Option<bool> {
    cidr.parse::<ipnetwork::IpNetwork>().ok().map(|n| n.is_ipv4())
}

fn check_dscp(changes: &Value, issues: &mut Issues) {
    for (i, rule) in items(changes, "dscp").iter().enumerate() {
        let Some(m) = field(rule, "match") else {
            continue;
        };
        let path = join(&index("changes.dscp", i), "match");
        let has_ports = !items(m, "sports").is_empty() || !items(m, "dports").is_empty();
        if has_ports && text(m, "proto").is_none() {
            issues.policy(&join(&path, "proto"), "port matches require proto");
        }
        let src = text(m, "src").and_then(family);
        let dst = text(m, "dst").and_then(family);
        if let (Some(a), Some(b)) = (src, dst) {
            if a != b {
                issues.policy(&path, "src and dst must be the same address family");
            }
        }
    }
}

fn check_nat(changes: &Value, issues: &mut Issues) {
    for (i, rule) in items(changes, "nat_rules").iter().enumerate() {
        let path = index("changes.nat_rules", i);
        let kind = text(rule, "type");
        match kind {
            Some("masquerade") => {
                if text(rule, "iface").is_none() {
                    issues.policy(&join(&path, "iface"), "masquerade requires iface");
                }
                if field(rule, "to_addr").is_some() {
                    issues.policy(&join(&path, "to_addr"), "masquerade does not take to_addr");
                }
            }
            Some("snat") | Some("dnat") => {
                if text(rule, "to_addr").is_none() {
                    issues.policy(
                        &join(&path, "to_addr"),
                        format!("{} requires to_addr", kind.unwrap_or_default()),
                    );
                }
            }
            _ => {}
        }
        let has_protocol = text(rule, "protocol").is_some();
        for key in ["dport", "to_port"] {
            if field(rule, key).is_some() && !has_protocol {
                issues.policy(&join(&path, "protocol"), format!("{} requires protocol", key));
            }
        }
        if field(rule, "to_port").is_some() && kind == Some("masquerade") {
            issues.policy(&join(&path, "to_port"), "to_port is only valid for snat and dnat");
        }
    }
}

fn check_sysctl(changes: &Value, cards: Option<&CardRegistry>, issues: &mut Issues) {
    let Some(sysctl) = field(changes, "sysctl").and_then(Value::as_object) else {
        return;
    };
    let conntrack = field(changes, "connection_tracking");
    let conntrack_keys = [
        (ConnectionTracking::MAX_KEY, "max_connections"),
        (ConnectionTracking::ESTABLISHED_KEY, "tcp_timeout_established"),
        (ConnectionTracking::CLOSE_WAIT_KEY, "tcp_timeout_close_wait"),
    ];

    for (key, value) in sysctl {
        let path = join("changes.sysctl", key);
        let clash = conntrack_keys
            .iter()
            .find(|(k, _)| *k == key.as_str())
            .filter(|(_, field_name)| conntrack.and_then(|ct| field(ct, field_name)).is_some());
        if let Some((_, field_name)) = clash {
            issues.policy(&path, format!("also set by connection_tracking.{}", field_name));
        }

        let Some(cards) = cards else {
            continue;
        };
        let value = match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => SysctlValue::Integer(i),
                None => continue,
            },
            Value::String(s) => SysctlValue::Text(s.clone()),
            _ => continue,
        };
        match cards.for_sysctl_key(key) {
            Some(card) => {
                if let Err(message) = card.validate_value(&value) {
                    issues.policy(&path, message);
                }
            }
            None => issues.warn(&path, format!("no configuration card governs {}", key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cards::CardRegistry;
    use crate::validator::{IssueKind, Severity, ValidationReport, Validator};
    use serde_json::{json, Value};

    fn with_changes(changes: Value) -> ValidationReport {
        Validator::new().validate(&json!({
            "iface": "eth0",
            "profile": "gaming",
            "changes": changes
        }))
    }

    fn policy_paths(report: &ValidationReport) -> Vec<String> {
        report
            .issues
            .iter()
            .filter(|i| i.kind == IssueKind::Policy && i.severity == Severity::Error)
            .map(|i| i.path.clone())
            .collect()
    }

    #[test]
    fn test_ceil_below_egress_rejected() {
        let report = with_changes(json!({"shaper": {"egress_mbit": 100, "ceil_mbit": 50}}));
        assert!(!report.ok);
        assert_eq!(policy_paths(&report), vec!["changes.shaper.ceil_mbit"]);
    }

    #[test]
    fn test_shaper_requires_shaping_qdisc() {
        let report =
            with_changes(json!({"qdisc": {"type": "fq_codel"}, "shaper": {"egress_mbit": 100}}));
        assert_eq!(policy_paths(&report), vec!["changes.shaper"]);

        let cake = with_changes(json!({"qdisc": {"type": "cake"}, "shaper": {"egress_mbit": 100}}));
        assert!(cake.ok);
    }

    #[test]
    fn test_netem_rules() {
        let report =
            with_changes(json!({"qdisc": {"type": "cake"}, "netem": {"delay_jitter_ms": 5}}));
        let paths = policy_paths(&report);
        assert!(paths.contains(&"changes.netem".to_string()));
        assert!(paths.contains(&"changes.netem.delay_jitter_ms".to_string()));
    }

    #[test]
    fn test_htb_class_rules() {
        let report = with_changes(json!({
            "qdisc": {"type": "htb"},
            "htb_classes": [
                {"classid": "1:10", "rate_mbit": 50, "ceil_mbit": 10},
                {"classid": "1:10", "rate_mbit": 5},
                {"classid": "1:30", "rate_mbit": 5}
            ]
        }));
        assert_eq!(
            policy_paths(&report),
            vec![
                "changes.htb_classes[0].ceil_mbit",
                "changes.htb_classes[1].classid",
                "changes.htb_classes[2].classid",
            ]
        );
    }

    #[test]
    fn test_htb_classes_need_htb() {
        let report = with_changes(json!({
            "qdisc": {"type": "fq"},
            "htb_classes": [{"classid": "1:10", "rate_mbit": 5}]
        }));
        assert_eq!(policy_paths(&report), vec!["changes.htb_classes"]);
    }

    #[test]
    fn test_pfifo_fast_params() {
        let report =
            with_changes(json!({"qdisc": {"type": "pfifo_fast", "params": {"limit": 10}}}));
        assert_eq!(policy_paths(&report), vec!["changes.qdisc.params"]);
    }

    #[test]
    fn test_dscp_rules() {
        let report = with_changes(json!({"dscp": [
            {"match": {"dports": [443]}, "dscp": "AF41"},
            {"match": {"src": "10.0.0.0/8", "dst": "2001:db8::/32"}, "dscp": "CS4"}
        ]}));
        assert_eq!(
            policy_paths(&report),
            vec!["changes.dscp[0].match.proto", "changes.dscp[1].match"]
        );
    }

    #[test]
    fn test_nat_rules() {
        let report = with_changes(json!({"nat_rules": [
            {"type": "masquerade"},
            {"type": "dnat", "dport": 80},
            {"type": "snat", "to_addr": "192.0.2.1"}
        ]}));
        let paths = policy_paths(&report);
        assert_eq!(
            paths,
            vec![
                "changes.nat_rules[0].iface",
                "changes.nat_rules[1].to_addr",
                "changes.nat_rules[1].protocol",
            ]
        );
    }

    #[test]
    fn test_conntrack_clash() {
        let report = with_changes(json!({
            "sysctl": {"net.netfilter.nf_conntrack_max": 65536},
            "connection_tracking": {"max_connections": 262144}
        }));
        assert_eq!(policy_paths(&report), vec!["changes.sysctl.net.netfilter.nf_conntrack_max"]);
    }

    #[test]
    fn test_cards_govern_sysctl() {
        let cards = CardRegistry::from_yaml_str(
            "- id: net.core.somaxconn\n  safe:\n    min: 128\n    max: 65535\n",
        )
        .unwrap();
        let validator = Validator::with_cards(cards);

        let bad = validator.validate(&json!({
            "iface": "eth0", "profile": "server",
            "changes": {"sysctl": {"net.core.somaxconn": 100000}}
        }));
        assert!(!bad.ok);

        let unknown = validator.validate(&json!({
            "iface": "eth0", "profile": "server",
            "changes": {"sysctl": {"net.core.netdev_max_backlog": 5000}}
        }));
        assert!(unknown.ok);
        assert_eq!(unknown.warnings().count(), 1);
    }
}
