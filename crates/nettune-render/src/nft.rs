//! Packet-filter script rendering
//!
//! The script owns three tables and rebuilds each one it touches inside a
//! single `nft -f` transaction: the table is declared (a no-op if it
//! exists), deleted and defined again. Rules keep their input order.

use ipnetwork::IpNetwork;
use nettune_common::{Changes, ConnectionLimit, DscpRule, NatKind, NatRule, RateLimit};
use std::fmt::Write;
use std::net::{IpAddr, Ipv4Addr};

pub const FILTER_TABLE: &str = "nettune_filter";
pub const MANGLE_TABLE: &str = "nettune_mangle";
pub const NAT_TABLE: &str = "nettune_nat";

/// Tables written by the renderer, in script order
pub const OWNED_TABLES: [&str; 3] = [FILTER_TABLE, MANGLE_TABLE, NAT_TABLE];

struct Script {
    text: String,
}

impl Script {
    fn line(&mut self, indent: usize, s: impl AsRef<str>) {
        let _ = writeln!(self.text, "{}{}", "    ".repeat(indent), s.as_ref());
    }

    fn table(&mut self, name: &str, chains: &[(&str, &str, Vec<String>)]) {
        self.line(0, format!("table inet {}", name));
        self.line(0, format!("delete table inet {}", name));
        self.line(0, format!("table inet {} {{", name));
        for (i, (chain, hook, rules)) in chains.iter().enumerate() {
            if i > 0 {
                self.line(0, "");
            }
            self.line(1, format!("chain {} {{", chain));
            self.line(2, format!("{}; policy accept;", hook));
            for rule in rules {
                self.line(2, rule);
            }
            self.line(1, "}");
        }
        self.line(0, "}");
    }
}

pub fn render_nft(changes: &Changes) -> String {
    if !changes.touches_nft() {
        return String::new();
    }
    let mut script = Script { text: String::from("#!/usr/sbin/nft -f\n") };

    if !changes.connection_limits.is_empty() || !changes.rate_limits.is_empty() {
        let mut rules: Vec<String> = changes
            .connection_limits
            .iter()
            .enumerate()
            .map(|(i, limit)| connlimit_rule(i, limit))
            .collect();
        rules.extend(changes.rate_limits.iter().filter_map(rate_limit_rule));
        script.line(0, "");
        script.table(FILTER_TABLE, &[("input", "type filter hook input priority 0", rules)]);
    }

    if !changes.dscp.is_empty() {
        let rules = changes.dscp.iter().map(dscp_rule).collect();
        script.line(0, "");
        script.table(
            MANGLE_TABLE,
            &[("postrouting", "type filter hook postrouting priority -150", rules)],
        );
    }

    if !changes.nat_rules.is_empty() {
        let (pre, post): (Vec<&NatRule>, Vec<&NatRule>) =
            changes.nat_rules.iter().partition(|r| r.kind == NatKind::Dnat);
        let mut chains = Vec::new();
        if !pre.is_empty() {
            let rules = pre.into_iter().map(nat_rule).collect();
            chains.push(("prerouting", "type nat hook prerouting priority -100", rules));
        }
        if !post.is_empty() {
            let rules = post.into_iter().map(nat_rule).collect();
            chains.push(("postrouting", "type nat hook postrouting priority 100", rules));
        }
        script.line(0, "");
        script.table(NAT_TABLE, &chains);
    }

    script.text
}

fn port_set(ports: &[u16]) -> String {
    match ports {
        [one] => one.to_string(),
        many => format!("{{ {} }}", many.iter().map(u16::to_string).collect::<Vec<_>>().join(", ")),
    }
}

fn prefix_mask(bits: u8) -> Ipv4Addr {
    let bits = u32::from(bits.min(32));
    let mask = if bits == 0 { 0 } else { u32::MAX << (32 - bits) };
    Ipv4Addr::from(mask)
}

fn connlimit_rule(i: usize, limit: &ConnectionLimit) -> String {
    let source = if limit.mask >= 32 {
        "ip saddr".to_string()
    } else {
        format!("ip saddr and {}", prefix_mask(limit.mask))
    };
    format!(
        "{proto} dport {port} ct state new meter connlimit_{i} \
         {{ {source} ct count over {limit} }} counter reject",
        proto = limit.protocol,
        port = limit.port,
        i = i,
        source = source,
        limit = limit.limit,
    )
}

fn rate_limit_rule(limit: &RateLimit) -> Option<String> {
    let (count, unit) = RateLimit::parse_rate(&limit.rate)?;
    Some(format!(
        "limit rate over {}/{} burst {} packets counter drop",
        count,
        unit.as_str(),
        limit.burst
    ))
}

fn addr_family(cidr: &str) -> &'static str {
    match cidr.parse::<IpNetwork>() {
        Ok(IpNetwork::V6(_)) => "ip6",
        _ => "ip",
    }
}

fn dscp_rule(rule: &DscpRule) -> String {
    let m = &rule.matcher;
    let family = m
        .src
        .as_deref()
        .or(m.dst.as_deref())
        .map(addr_family)
        .unwrap_or("ip");

    let mut parts = Vec::new();
    if let Some(proto) = m.proto {
        parts.push(format!("meta l4proto {}", proto));
    }
    if let Some(src) = &m.src {
        parts.push(format!("{} saddr {}", family, src));
    }
    if let Some(dst) = &m.dst {
        parts.push(format!("{} daddr {}", family, dst));
    }
    if let Some(proto) = m.proto {
        if !m.sports.is_empty() {
            parts.push(format!("{} sport {}", proto, port_set(&m.sports)));
        }
        if !m.dports.is_empty() {
            parts.push(format!("{} dport {}", proto, port_set(&m.dports)));
        }
    }
    parts.push(format!("{} dscp set {} counter", family, rule.dscp.nft_keyword()));
    parts.join(" ")
}

fn nat_target(addr: &IpAddr, port: Option<u16>) -> String {
    match (addr, port) {
        (IpAddr::V4(a), Some(p)) => format!("ip to {}:{}", a, p),
        (IpAddr::V4(a), None) => format!("ip to {}", a),
        (IpAddr::V6(a), Some(p)) => format!("ip6 to [{}]:{}", a, p),
        (IpAddr::V6(a), None) => format!("ip6 to {}", a),
    }
}

fn nat_rule(rule: &NatRule) -> String {
    let mut parts = Vec::new();
    if let Some(iface) = &rule.iface {
        let dir = if rule.kind == NatKind::Dnat { "iifname" } else { "oifname" };
        parts.push(format!("{} \"{}\"", dir, iface));
    }
    if let Some(proto) = rule.protocol {
        parts.push(format!("meta l4proto {}", proto));
        if let Some(dport) = rule.dport {
            parts.push(format!("{} dport {}", proto, dport));
        }
    }
    let action = match (rule.kind, &rule.to_addr) {
        (NatKind::Masquerade, _) => "masquerade".to_string(),
        (NatKind::Snat, Some(addr)) => format!("snat {}", nat_target(addr, rule.to_port)),
        (NatKind::Dnat, Some(addr)) => format!("dnat {}", nat_target(addr, rule.to_port)),
        (_, None) => "accept".to_string(),
    };
    parts.push(action);
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use nettune_common::{DscpClass, DscpMatch, Proto};

    #[test]
    fn test_empty() {
        assert_eq!(render_nft(&Changes::default()), "");
    }

    #[test]
    fn test_dscp_table() {
        let changes = Changes {
            dscp: vec![
                DscpRule {
                    matcher: DscpMatch {
                        proto: Some(Proto::Udp),
                        dports: vec![3074],
                        ..Default::default()
                    },
                    dscp: DscpClass::Ef,
                },
                DscpRule {
                    matcher: DscpMatch {
                        proto: Some(Proto::Tcp),
                        sports: vec![443, 8443],
                        dst: Some("2001:db8::/32".into()),
                        ..Default::default()
                    },
                    dscp: DscpClass::Af41,
                },
            ],
            ..Default::default()
        };
        let script = render_nft(&changes);
        let expected = "\
#!/usr/sbin/nft -f

table inet nettune_mangle
delete table inet nettune_mangle
table inet nettune_mangle {
    chain postrouting {
        type filter hook postrouting priority -150; policy accept;
        meta l4proto udp udp dport 3074 ip dscp set ef counter
        meta l4proto tcp ip6 daddr 2001:db8::/32 tcp sport { 443, 8443 } ip6 dscp set af41 counter
    }
}
";
        assert_eq!(script, expected);
    }

    #[test]
    fn test_table_order_filter_mangle_nat() {
        let changes = Changes {
            nat_rules: vec![NatRule {
                kind: NatKind::Masquerade,
                iface: Some("wan0".into()),
                protocol: None,
                dport: None,
                to_addr: None,
                to_port: None,
            }],
            dscp: vec![DscpRule { matcher: DscpMatch::default(), dscp: DscpClass::Cs6 }],
            rate_limits: vec![RateLimit { rate: "100/second".into(), burst: 20 }],
            ..Default::default()
        };
        let script = render_nft(&changes);
        let filter = script.find("table inet nettune_filter {").unwrap();
        let mangle = script.find("table inet nettune_mangle {").unwrap();
        let nat = script.find("table inet nettune_nat {").unwrap();
        assert!(filter < mangle && mangle < nat);
        assert!(script.contains("limit rate over 100/second burst 20 packets counter drop"));
        assert!(script.contains("oifname \"wan0\" masquerade"));
    }

    #[test]
    fn test_connlimit_mask() {
        let limits = vec![
            ConnectionLimit { protocol: Proto::Tcp, port: 22, limit: 5, mask: 32 },
            ConnectionLimit { protocol: Proto::Tcp, port: 80, limit: 100, mask: 24 },
        ];
        let changes = Changes { connection_limits: limits, ..Default::default() };
        let script = render_nft(&changes);
        assert!(script.contains(
            "tcp dport 22 ct state new meter connlimit_0 { ip saddr ct count over 5 } \
             counter reject"
        ));
        assert!(script
            .contains("meter connlimit_1 { ip saddr and 255.255.255.0 ct count over 100 }"));
    }

    #[test]
    fn test_nat_chains() {
        let changes = Changes {
            nat_rules: vec![
                NatRule {
                    kind: NatKind::Snat,
                    iface: Some("eth1".into()),
                    protocol: None,
                    dport: None,
                    to_addr: Some("192.0.2.10".parse().unwrap()),
                    to_port: None,
                },
                NatRule {
                    kind: NatKind::Dnat,
                    iface: Some("eth1".into()),
                    protocol: Some(Proto::Tcp),
                    dport: Some(80),
                    to_addr: Some("10.0.0.5".parse().unwrap()),
                    to_port: Some(8080),
                },
            ],
            ..Default::default()
        };
        let script = render_nft(&changes);
        let pre = script.find("chain prerouting").unwrap();
        let post = script.find("chain postrouting").unwrap();
        assert!(pre < post);
        assert!(script
            .contains("iifname \"eth1\" meta l4proto tcp tcp dport 80 dnat ip to 10.0.0.5:8080"));
        assert!(script.contains("oifname \"eth1\" snat ip to 192.0.2.10"));
    }

    #[test]
    fn test_prefix_mask() {
        assert_eq!(prefix_mask(24).to_string(), "255.255.255.0");
        assert_eq!(prefix_mask(1).to_string(), "128.0.0.0");
    }
}
