//! Kernel parameter rendering

use nettune_common::{Binary, Changes, CommandLine};
use std::collections::BTreeMap;

/// Merged kernel parameters in key order, conntrack settings included
pub fn sysctl_values(changes: &Changes) -> BTreeMap<String, String> {
    let mut values: BTreeMap<String, String> = changes
        .sysctl
        .iter()
        .map(|(k, v)| (k.clone(), v.normalized()))
        .collect();
    if let Some(ct) = &changes.connection_tracking {
        for (key, value) in ct.sysctl_entries() {
            values.insert(key.to_string(), value.to_string());
        }
    }
    values
}

pub fn render_sysctl(changes: &Changes) -> Vec<CommandLine> {
    sysctl_values(changes)
        .into_iter()
        .map(|(key, value)| {
            CommandLine::new(Binary::Sysctl).arg("-w").arg(format!("{}={}", key, value))
        })
        .collect()
}
