//! Offload and link settings

use nettune_common::{Binary, Changes, CommandLine};

pub fn render_ethtool(iface: &str, changes: &Changes) -> Vec<CommandLine> {
    let Some(offloads) = &changes.offloads else {
        return Vec::new();
    };
    offloads
        .entries()
        .into_iter()
        .map(|(feature, on)| {
            let state = if on { "on" } else { "off" };
            CommandLine::new(Binary::Ethtool).args(["-K", iface, feature, state])
        })
        .collect()
}

pub fn render_ip_link(iface: &str, changes: &Changes) -> Vec<CommandLine> {
    changes
        .mtu
        .map(|mtu| {
            CommandLine::new(Binary::Ip)
                .args(["link", "set", "dev", iface, "mtu"])
                .arg(mtu.to_string())
        })
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nettune_common::Offloads;

    #[test]
    fn test_offloads_fixed_order() {
        let changes = Changes {
            offloads: Some(Offloads {
                lro: Some(false),
                gro: Some(true),
                gso: None,
                tso: Some(false),
            }),
            ..Default::default()
        };
        let lines: Vec<String> =
            render_ethtool("eth0", &changes).iter().map(|c| c.to_string()).collect();
        assert_eq!(
            lines,
            vec!["ethtool -K eth0 gro on", "ethtool -K eth0 tso off", "ethtool -K eth0 lro off"]
        );
    }

    #[test]
    fn test_mtu() {
        let changes = Changes { mtu: Some(9000), ..Default::default() };
        assert_eq!(
            render_ip_link("eth0", &changes)[0].to_string(),
            "ip link set dev eth0 mtu 9000"
        );
        assert!(render_ip_link("eth0", &Changes::default()).is_empty());
    }
}
