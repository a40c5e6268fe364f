//! CLI commands

pub mod audit;
pub mod bench;
pub mod cards;
pub mod checkpoint;
pub mod config;
pub mod plan;

use anyhow::Context;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Read a JSON or YAML document; the extension decides, YAML otherwise
pub fn read_document<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("plan.yaml");
        fs::File::create(&yaml).unwrap().write_all(b"iface: eth0\nprofile: gaming\n").unwrap();
        let json = dir.path().join("plan.json");
        fs::write(&json, r#"{"iface":"eth0","profile":"gaming"}"#).unwrap();

        let a: serde_json::Value = read_document(&yaml).unwrap();
        let b: serde_json::Value = read_document(&json).unwrap();
        assert_eq!(a, b);

        let missing =
            read_document::<serde_json::Value>(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(format!("{:#}", missing).contains("reading"));
    }
}
