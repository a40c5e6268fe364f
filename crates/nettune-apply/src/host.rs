//! Captured host state and the parsers that build it

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Offload features tracked per interface: short name and the name
/// `ethtool -k` prints
pub const OFFLOAD_FEATURES: [(&str, &str); 4] = [
    ("gro", "generic-receive-offload"),
    ("gso", "generic-segmentation-offload"),
    ("tso", "tcp-segmentation-offload"),
    ("lro", "large-receive-offload"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostState {
    #[serde(default)]
    pub sysctl: BTreeMap<String, String>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nft_ruleset: Option<String>,
}

impl HostState {
    pub fn is_empty(&self) -> bool {
        self.sysctl.is_empty() && self.interfaces.is_empty() && self.nft_ruleset.is_none()
    }

    pub fn interface(&self, name: &str) -> Option<&InterfaceState> {
        self.interfaces.iter().find(|i| i.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceState {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operstate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qdisc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub offloads: BTreeMap<String, bool>,
}

impl InterfaceState {
    /// Kind of the root qdisc in the captured dump
    pub fn root_qdisc(&self) -> Option<String> {
        self.qdisc.as_deref().and_then(root_qdisc_kind)
    }
}

/// Parse `sysctl -a` output into normalized `key -> value`
pub fn parse_sysctl(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(" = ").or_else(|| line.split_once('='))?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
            Some((key.to_string(), value))
        })
        .collect()
}

#[derive(Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    mtu: Option<u32>,
    #[serde(default)]
    operstate: Option<String>,
}

/// Parse `ip -j link show` output
pub fn parse_ip_link(text: &str) -> Result<Vec<InterfaceState>, serde_json::Error> {
    let links: Vec<IpLink> = serde_json::from_str(text)?;
    Ok(links
        .into_iter()
        .map(|l| InterfaceState {
            name: l.ifname,
            mtu: l.mtu,
            operstate: l.operstate,
            ..Default::default()
        })
        .collect())
}

/// Parse `ethtool -k` output, keeping only tracked, changeable features
pub fn parse_offloads(text: &str) -> BTreeMap<String, bool> {
    let mut out = BTreeMap::new();
    for line in text.lines() {
        let Some((name, rest)) = line.trim().split_once(':') else {
            continue;
        };
        let Some((short, _)) = OFFLOAD_FEATURES.iter().find(|(_, long)| *long == name) else {
            continue;
        };
        let rest = rest.trim();
        if rest.contains("[fixed]") {
            continue;
        }
        if rest.starts_with("on") {
            out.insert(short.to_string(), true);
        } else if rest.starts_with("off") {
            out.insert(short.to_string(), false);
        }
    }
    out
}

/// Kind of the root qdisc in `tc qdisc show dev X` output
pub fn root_qdisc_kind(text: &str) -> Option<String> {
    text.lines()
        .filter(|l| l.split_whitespace().any(|w| w == "root"))
        .find_map(|l| {
            let mut words = l.split_whitespace();
            (words.next() == Some("qdisc")).then(|| words.next().map(str::to_string)).flatten()
        })
}
