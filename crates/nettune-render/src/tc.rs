//! Traffic-control rendering
//!
//! Layout when the root discipline is htb (explicit, or implied by a
//! shaper or class list without a qdisc):
//!
//! ```text
//! 1:    htb default 30
//! └ 1:1   root class, shaper rate/ceil (1000 mbit when unshaped)
//!   ├ 1:30  default class, optional netem child 30:
//!   └ 1:N   user classes, input order
//! ```
//!
//! Ingress shaping polices on the `ffff:` ingress qdisc.

use nettune_common::{Binary, Changes, CommandLine, Netem, ParamValue, QdiscKind, Shaper};

/// Root rate when no egress limit is given
pub const DEFAULT_RATE_MBIT: u32 = 1000;

struct Tc<'a> {
    iface: &'a str,
    out: Vec<CommandLine>,
}

impl<'a> Tc<'a> {
    fn new(iface: &'a str) -> Self {
        Self { iface, out: Vec::new() }
    }

    /// `tc <object> <verb> dev <iface> ...`
    fn push(&mut self, object: &str, verb: &str, rest: Vec<String>) -> &mut CommandLine {
        let cmd = CommandLine::new(Binary::Tc)
            .args([object, verb, "dev", self.iface])
            .args(rest);
        self.out.push(cmd);
        let last = self.out.len() - 1;
        &mut self.out[last]
    }
}

fn words(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

/// Root discipline the plan installs, if any
pub fn root_kind(changes: &Changes) -> Option<QdiscKind> {
    if let Some(q) = &changes.qdisc {
        return Some(q.kind);
    }
    let shaped = changes
        .shaper
        .as_ref()
        .is_some_and(|s| s.egress_mbit.is_some() || s.ceil_mbit.is_some());
    (shaped || !changes.htb_classes.is_empty()).then_some(QdiscKind::Htb)
}

/// Where netem attaches below `root`; `None` when the root is classless
pub fn netem_parent(root: Option<QdiscKind>) -> Option<&'static str> {
    match root {
        None => Some("root"),
        Some(QdiscKind::Htb) => Some("parent 1:30 handle 30:"),
        Some(_) => None,
    }
}

pub fn render_tc(iface: &str, changes: &Changes) -> Vec<CommandLine> {
    if !changes.touches_tc() {
        return Vec::new();
    }
    let mut tc = Tc::new(iface);
    let kind = root_kind(changes);
    let shaper = changes.shaper.clone().unwrap_or_default();
    let ingress = shaper.ingress_mbit;

    tc.push("qdisc", "del", words("root")).tolerate_failure = true;
    if ingress.is_some() {
        tc.push("qdisc", "del", words("ingress")).tolerate_failure = true;
    }

    let params = changes.qdisc.as_ref().map(|q| &q.params);
    match kind {
        Some(QdiscKind::Htb) => render_htb(&mut tc, changes, &shaper, params),
        Some(QdiscKind::Cake) => {
            let mut rest = words("root cake");
            if let Some(egress) = shaper.egress_mbit {
                rest.extend(["bandwidth".to_string(), format!("{}mbit", egress)]);
            }
            if let Some(params) = params {
                rest.extend(param_words(params, true));
            }
            tc.push("qdisc", "add", rest);
        }
        Some(other) => {
            let mut rest = vec!["root".to_string(), other.as_str().to_string()];
            if let Some(params) = params {
                rest.extend(param_words(params, false));
            }
            tc.push("qdisc", "add", rest);
        }
        None => {}
    }

    if let Some(netem) = &changes.netem {
        match netem_parent(kind) {
            Some(parent) => {
                let mut rest = words(parent);
                rest.push("netem".to_string());
                rest.extend(netem_words(netem));
                tc.push("qdisc", "add", rest);
            }
            None => {
                // plan validation only admits netem under htb or on its own
                debug_assert!(false, "netem requested below classless root {:?}", kind);
                tracing::error!(
                    iface,
                    "netem cannot be attached below a classless root; plan was not validated"
                );
            }
        }
    }

    if let Some(mbit) = ingress {
        let burst_kb = (mbit.saturating_mul(5) / 4).max(32);
        tc.push("qdisc", "add", words("handle ffff: ingress"));
        let mut rest = words("parent ffff: protocol all prio 1 u32 match u32 0 0 police rate");
        rest.extend([format!("{}mbit", mbit), "burst".to_string(), format!("{}k", burst_kb)]);
        rest.extend(words("drop flowid :1"));
        tc.push("filter", "add", rest);
    }

    tc.out
}

fn render_htb(
    tc: &mut Tc<'_>,
    changes: &Changes,
    shaper: &Shaper,
    params: Option<&std::collections::BTreeMap<String, ParamValue>>,
) {
    let mut root = words("root handle 1: htb default 30");
    if let Some(params) = params {
        root.extend(param_words(params, false));
    }
    tc.push("qdisc", "add", root);

    let rate = shaper.egress_mbit.unwrap_or(DEFAULT_RATE_MBIT);
    let ceil = shaper.ceil_mbit.unwrap_or(rate).max(rate);
    let rate_ceil = |rate: u32, ceil: u32| vec![
        "htb".to_string(),
        "rate".to_string(),
        format!("{}mbit", rate),
        "ceil".to_string(),
        format!("{}mbit", ceil),
    ];

    let mut class_root = words("parent 1: classid 1:1");
    class_root.extend(rate_ceil(rate, ceil));
    tc.push("class", "add", class_root);

    let mut class_default = words("parent 1:1 classid 1:30");
    class_default.extend(rate_ceil(rate, ceil));
    tc.push("class", "add", class_default);

    for class in &changes.htb_classes {
        let mut rest = words("parent 1:1 classid");
        rest.push(class.classid.to_lowercase());
        rest.extend(rate_ceil(class.rate_mbit, class.ceil_mbit.unwrap_or(class.rate_mbit)));
        if let Some(prio) = class.priority {
            rest.extend(["prio".to_string(), prio.to_string()]);
        }
        if let Some(burst) = class.burst_kb {
            rest.extend(["burst".to_string(), format!("{}k", burst)]);
        }
        tc.push("class", "add", rest);
    }
}

/// Qdisc options in key order. Booleans become flags (`ecn` / `noecn`).
fn param_words(params: &std::collections::BTreeMap<String, ParamValue>, cake: bool) -> Vec<String> {
    let mut out = Vec::new();
    for (key, value) in params {
        match value {
            ParamValue::Bool(true) => out.push(key.clone()),
            ParamValue::Bool(false) => out.push(format!("no{}", key)),
            _ if cake && key == "diffserv" => out.push(format!("diffserv{}", value)),
            _ => {
                out.push(key.clone());
                out.push(value.to_string());
            }
        }
    }
    out
}

fn netem_words(netem: &Netem) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(delay) = netem.delay_ms {
        out.push("delay".to_string());
        out.push(format!("{}ms", delay));
        if let Some(jitter) = netem.delay_jitter_ms.filter(|j| *j > 0.0) {
            out.push(format!("{}ms", jitter));
        }
    }
    let pct = [
        ("loss", netem.loss_pct),
        ("duplicate", netem.duplicate_pct),
        ("corrupt", netem.corrupt_pct),
        ("reorder", netem.reorder_pct),
    ];
    for (name, value) in pct {
        if let Some(v) = value {
            out.push(name.to_string());
            out.push(format!("{}%", v));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use nettune_common::{HtbClass, Qdisc};
    use std::collections::BTreeMap;

    fn text(cmds: &[CommandLine]) -> Vec<String> {
        cmds.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_htb_with_shaper_classes_and_netem() {
        let changes = Changes {
            qdisc: Some(Qdisc { kind: QdiscKind::Htb, params: BTreeMap::new() }),
            shaper: Some(Shaper {
                ingress_mbit: None,
                egress_mbit: Some(90),
                ceil_mbit: Some(100),
            }),
            netem: Some(Netem {
                delay_ms: Some(5.0),
                delay_jitter_ms: Some(1.5),
                ..Default::default()
            }),
            htb_classes: vec![
                HtbClass {
                    classid: "1:10".into(),
                    rate_mbit: 20,
                    ceil_mbit: Some(50),
                    priority: Some(0),
                    burst_kb: None,
                },
                HtbClass {
                    classid: "1:20".into(),
                    rate_mbit: 10,
                    ceil_mbit: None,
                    priority: None,
                    burst_kb: Some(64),
                },
            ],
            ..Default::default()
        };
        assert_eq!(
            text(&render_tc("eth0", &changes)),
            vec![
                "tc qdisc del dev eth0 root",
                "tc qdisc add dev eth0 root handle 1: htb default 30",
                "tc class add dev eth0 parent 1: classid 1:1 htb rate 90mbit ceil 100mbit",
                "tc class add dev eth0 parent 1:1 classid 1:30 htb rate 90mbit ceil 100mbit",
                "tc class add dev eth0 parent 1:1 classid 1:10 htb rate 20mbit ceil 50mbit prio 0",
                "tc class add dev eth0 parent 1:1 classid 1:20 htb rate 10mbit ceil 10mbit \
                 burst 64k",
                "tc qdisc add dev eth0 parent 1:30 handle 30: netem delay 5ms 1.5ms",
            ]
        );
        assert!(render_tc("eth0", &changes)[0].tolerate_failure);
    }

    #[test]
    fn test_unshaped_htb_defaults() {
        let changes = Changes {
            qdisc: Some(Qdisc { kind: QdiscKind::Htb, params: BTreeMap::new() }),
            ..Default::default()
        };
        let lines = text(&render_tc("eth0", &changes));
        assert_eq!(
            lines[2],
            "tc class add dev eth0 parent 1: classid 1:1 htb rate 1000mbit ceil 1000mbit"
        );
    }

    #[test]
    fn test_shaper_without_qdisc_implies_htb() {
        let changes = Changes {
            shaper: Some(Shaper { egress_mbit: Some(50), ..Default::default() }),
            ..Default::default()
        };
        assert_eq!(root_kind(&changes), Some(QdiscKind::Htb));
        assert!(text(&render_tc("eth0", &changes))[1].contains("htb default 30"));
    }

    #[test]
    fn test_cake_params() {
        let mut params = BTreeMap::new();
        params.insert("diffserv".to_string(), ParamValue::Int(4));
        params.insert("rtt".to_string(), ParamValue::Text("50ms".into()));
        params.insert("nat".to_string(), ParamValue::Bool(true));
        let changes = Changes {
            qdisc: Some(Qdisc { kind: QdiscKind::Cake, params }),
            shaper: Some(Shaper { egress_mbit: Some(200), ..Default::default() }),
            ..Default::default()
        };
        assert_eq!(
            text(&render_tc("wan0", &changes))[1],
            "tc qdisc add dev wan0 root cake bandwidth 200mbit diffserv4 nat rtt 50ms"
        );
    }

    #[test]
    fn test_fq_codel_params_sorted() {
        let mut params = BTreeMap::new();
        params.insert("target".to_string(), ParamValue::Text("5ms".into()));
        params.insert("limit".to_string(), ParamValue::Int(10240));
        params.insert("ecn".to_string(), ParamValue::Bool(false));
        let changes = Changes {
            qdisc: Some(Qdisc { kind: QdiscKind::FqCodel, params }),
            ..Default::default()
        };
        assert_eq!(
            text(&render_tc("eth0", &changes))[1],
            "tc qdisc add dev eth0 root fq_codel noecn limit 10240 target 5ms"
        );
    }

    #[test]
    fn test_root_netem_and_ingress() {
        let changes = Changes {
            shaper: Some(Shaper { ingress_mbit: Some(100), ..Default::default() }),
            netem: Some(Netem { loss_pct: Some(0.5), ..Default::default() }),
            ..Default::default()
        };
        assert_eq!(
            text(&render_tc("eth0", &changes)),
            vec![
                "tc qdisc del dev eth0 root",
                "tc qdisc del dev eth0 ingress",
                "tc qdisc add dev eth0 root netem loss 0.5%",
                "tc qdisc add dev eth0 handle ffff: ingress",
                "tc filter add dev eth0 parent ffff: protocol all prio 1 u32 match u32 0 0 \
                 police rate 100mbit burst 125k drop flowid :1",
            ]
        );
    }

    #[test]
    fn test_ingress_only_still_clears_root() {
        let changes = Changes {
            shaper: Some(Shaper { ingress_mbit: Some(100), ..Default::default() }),
            ..Default::default()
        };
        let cmds = render_tc("eth0", &changes);
        assert_eq!(
            text(&cmds)[..3],
            [
                "tc qdisc del dev eth0 root",
                "tc qdisc del dev eth0 ingress",
                "tc qdisc add dev eth0 handle ffff: ingress",
            ]
        );
        assert!(cmds[0].tolerate_failure && cmds[1].tolerate_failure);
        assert_eq!(cmds.len(), 4);
    }

    #[test]
    fn test_netem_parent() {
        assert_eq!(netem_parent(None), Some("root"));
        assert_eq!(netem_parent(Some(QdiscKind::Htb)), Some("parent 1:30 handle 30:"));
        let classless = [QdiscKind::Cake, QdiscKind::FqCodel, QdiscKind::Fq, QdiscKind::PfifoFast];
        for classless in classless {
            assert_eq!(netem_parent(Some(classless)), None);
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "classless root")]
    fn test_netem_below_classless_root_is_not_rendered() {
        let changes = Changes {
            qdisc: Some(Qdisc { kind: QdiscKind::FqCodel, params: BTreeMap::new() }),
            netem: Some(Netem { delay_ms: Some(5.0), ..Default::default() }),
            ..Default::default()
        };
        render_tc("eth0", &changes);
    }

    #[test]
    fn test_nothing_to_render() {
        assert!(render_tc("eth0", &Changes::default()).is_empty());
    }
}
