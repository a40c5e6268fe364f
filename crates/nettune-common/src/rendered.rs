//! Rendered plan artifacts

use crate::command::{Binary, CommandLine};
use serde::{Deserialize, Serialize};

/// Output of the renderer. Every group is empty rather than absent when
/// the plan does not touch it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedPlan {
    pub iface: String,
    #[serde(default)]
    pub sysctl_cmds: Vec<CommandLine>,
    #[serde(default)]
    pub tc_script: Vec<CommandLine>,
    #[serde(default)]
    pub nft_script: String,
    #[serde(default)]
    pub ethtool_cmds: Vec<CommandLine>,
    #[serde(default)]
    pub ip_link_cmds: Vec<CommandLine>,
}

impl RenderedPlan {
    pub fn empty(iface: impl Into<String>) -> Self {
        Self { iface: iface.into(), ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.sysctl_cmds.is_empty()
            && self.tc_script.is_empty()
            && self.nft_script.is_empty()
            && self.ethtool_cmds.is_empty()
            && self.ip_link_cmds.is_empty()
    }

    /// tc commands as a newline-separated script
    pub fn tc_script_text(&self) -> String {
        lines(&self.tc_script)
    }

    /// Human-readable listing of everything an apply would run
    pub fn preview(&self) -> Vec<String> {
        let mut out: Vec<String> = self.sysctl_cmds.iter().map(|c| c.to_string()).collect();
        out.extend(self.tc_script.iter().map(|c| c.to_string()));
        if !self.nft_script.is_empty() {
            out.push("nft -c -f <script>".to_string());
            out.push("nft -f <script>".to_string());
        }
        out.extend(self.ethtool_cmds.iter().map(|c| c.to_string()));
        out.extend(self.ip_link_cmds.iter().map(|c| c.to_string()));
        out
    }

    /// Structural consistency problems; empty when the plan can be applied
    pub fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.iface.trim().is_empty() {
            problems.push("interface is empty".to_string());
        }
        let groups: [(&str, &[CommandLine], Binary); 4] = [
            ("sysctl_cmds", &self.sysctl_cmds, Binary::Sysctl),
            ("tc_script", &self.tc_script, Binary::Tc),
            ("ethtool_cmds", &self.ethtool_cmds, Binary::Ethtool),
            ("ip_link_cmds", &self.ip_link_cmds, Binary::Ip),
        ];
        for (group, cmds, binary) in groups {
            for (i, cmd) in cmds.iter().enumerate() {
                if cmd.binary != binary {
                    problems.push(format!(
                        "{}[{}]: expected {}, found {}",
                        group, i, binary, cmd.binary
                    ));
                }
                if cmd.args.is_empty() {
                    problems.push(format!("{}[{}]: no arguments", group, i));
                }
                if let Some(dev) = device_arg(cmd) {
                    if dev != self.iface {
                        problems.push(format!(
                            "{}[{}]: targets {} instead of {}",
                            group, i, dev, self.iface
                        ));
                    }
                }
            }
        }
        for (i, cmd) in self.sysctl_cmds.iter().enumerate() {
            let ok = cmd.args.len() == 2 && cmd.args[0] == "-w" && cmd.args[1].contains('=');
            if !ok {
                problems.push(format!("sysctl_cmds[{}]: expected `-w key=value`", i));
            }
        }
        if self.nft_script.contains('\0') {
            problems.push("nft_script contains NUL".to_string());
        }
        problems
    }
}

fn lines(cmds: &[CommandLine]) -> String {
    cmds.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("\n")
}

/// Interface named after `dev` or as `ethtool -K <iface>`
fn device_arg(cmd: &CommandLine) -> Option<&str> {
    if cmd.binary == Binary::Ethtool {
        return cmd.args.get(1).map(String::as_str);
    }
    cmd.args
        .iter()
        .position(|a| a == "dev")
        .and_then(|i| cmd.args.get(i + 1))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_plan_is_clean() {
        let plan = RenderedPlan::empty("eth0");
        assert!(plan.is_empty());
        assert!(plan.check().is_empty());
        assert!(plan.preview().is_empty());
    }

    #[test]
    fn test_check_catches_wrong_binary() {
        let mut plan = RenderedPlan::empty("eth0");
        plan.tc_script
            .push(CommandLine::new(Binary::Ip).args(["link", "set", "dev", "eth0", "mtu", "1500"]));
        let problems = plan.check();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("expected tc"));
    }

    #[test]
    fn test_check_catches_foreign_device() {
        let mut plan = RenderedPlan::empty("eth0");
        plan.ethtool_cmds.push(CommandLine::new(Binary::Ethtool).args(["-K", "eth1", "gro", "on"]));
        assert!(plan.check()[0].contains("eth1"));
    }

    #[test]
    fn test_check_malformed_sysctl() {
        let mut plan = RenderedPlan::empty("eth0");
        plan.sysctl_cmds.push(CommandLine::new(Binary::Sysctl).arg("-a"));
        assert_eq!(plan.check().len(), 1);
    }
}
