//! Configuration-card registry
//!
//! A card documents one tunable (usually a kernel parameter) together with
//! the range of values considered safe. Cards are loaded once from YAML and
//! are read-only afterwards.

use nettune_common::SysctlValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CardError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("duplicate card id: {0}")]
    Duplicate(String),

    #[error("invalid card {id}: {message}")]
    Invalid { id: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SafeRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigCard {
    pub id: String,
    /// Kernel parameter governed by this card; defaults to `id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub risk: RiskLevel,
    #[serde(default)]
    pub safe: SafeRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl ConfigCard {
    pub fn sysctl_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.id)
    }

    /// Check a value against the card's safe range.
    ///
    /// Multi-field values such as `"4096 87380 6291456"` are checked
    /// component by component.
    pub fn validate_value(&self, value: &SysctlValue) -> Result<(), String> {
        let text = value.normalized();
        if !self.safe.allowed.is_empty() && !self.safe.allowed.iter().any(|a| a == &text) {
            return Err(format!(
                "{} must be one of [{}], got {:?}",
                self.sysctl_key(),
                self.safe.allowed.join(", "),
                text
            ));
        }
        if self.safe.min.is_none() && self.safe.max.is_none() {
            return Ok(());
        }
        let key = self.sysctl_key();
        for part in text.split(' ') {
            let n: f64 = part
                .parse()
                .map_err(|_| format!("{} expects numeric values, got {:?}", key, part))?;
            if let Some(min) = self.safe.min {
                if n < min {
                    return Err(format!("{}={} is below the safe minimum {}", key, part, min));
                }
            }
            if let Some(max) = self.safe.max {
                if n > max {
                    return Err(format!("{}={} exceeds the safe maximum {}", key, part, max));
                }
            }
        }
        Ok(())
    }

    fn check(&self) -> Result<(), CardError> {
        if self.id.trim().is_empty() {
            return Err(CardError::Invalid { id: self.id.clone(), message: "empty id".into() });
        }
        if let (Some(min), Some(max)) = (self.safe.min, self.safe.max) {
            if min > max {
                return Err(CardError::Invalid {
                    id: self.id.clone(),
                    message: format!("min {} greater than max {}", min, max),
                });
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CardFile {
    Many(Vec<ConfigCard>),
    One(ConfigCard),
}

/// Immutable table of cards keyed by id
#[derive(Debug, Clone, Default)]
pub struct CardRegistry {
    cards: BTreeMap<String, ConfigCard>,
    by_key: BTreeMap<String, String>,
}

impl CardRegistry {
    pub fn from_cards(cards: impl IntoIterator<Item = ConfigCard>) -> Result<Self, CardError> {
        let mut registry = Self::default();
        for card in cards {
            card.check()?;
            if registry.cards.contains_key(&card.id) {
                return Err(CardError::Duplicate(card.id));
            }
            registry.by_key.insert(card.sysctl_key().to_string(), card.id.clone());
            registry.cards.insert(card.id.clone(), card);
        }
        Ok(registry)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, CardError> {
        Self::from_cards(parse_cards(yaml, Path::new("<inline>"))?)
    }

    /// Load every `*.yml`/`*.yaml` file in a directory, in name order
    pub fn load_dir(dir: &Path) -> Result<Self, CardError> {
        let io_err = |source| CardError::Io { path: dir.to_path_buf(), source };
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yml" | "yaml")))
            .collect();
        paths.sort();

        let mut cards = Vec::new();
        for path in &paths {
            let text = fs::read_to_string(path)
                .map_err(|source| CardError::Io { path: path.clone(), source })?;
            cards.extend(parse_cards(&text, path)?);
        }
        let registry = Self::from_cards(cards)?;
        tracing::info!("Loaded {} configuration cards from {}", registry.len(), dir.display());
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn list(&self) -> Vec<&ConfigCard> {
        self.cards.values().collect()
    }

    pub fn get(&self, id: &str) -> Option<&ConfigCard> {
        self.cards.get(id)
    }

    pub fn for_sysctl_key(&self, key: &str) -> Option<&ConfigCard> {
        self.by_key.get(key).and_then(|id| self.cards.get(id))
    }

    /// Validate a value against the card with the given id
    pub fn validate_value(&self, id: &str, value: &SysctlValue) -> Result<(), String> {
        self.get(id)
            .ok_or_else(|| format!("unknown card: {}", id))?
            .validate_value(value)
    }
}

fn parse_cards(text: &str, path: &Path) -> Result<Vec<ConfigCard>, CardError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file: CardFile = serde_yaml::from_str(text)
        .map_err(|source| CardError::Parse { path: path.to_path_buf(), source })?;
    Ok(match file {
        CardFile::Many(cards) => cards,
        CardFile::One(card) => vec![card],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARDS: &str = r#"
- id: net.core.somaxconn
  description: Listen backlog
  safe:
    min: 128
    max: 65535
- id: tcp-congestion
  key: net.ipv4.tcp_congestion_control
  risk: medium
  safe:
    allowed: [cubic, bbr]
- id: net.ipv4.tcp_rmem
  safe:
    min: 4096
    max: 67108864
"#;

    #[test]
    fn test_load_and_lookup() {
        let reg = CardRegistry::from_yaml_str(CARDS).unwrap();
        assert_eq!(reg.len(), 3);
        assert!(reg.get("tcp-congestion").is_some());
        assert_eq!(
            reg.for_sysctl_key("net.ipv4.tcp_congestion_control").unwrap().id,
            "tcp-congestion"
        );
        assert!(reg.for_sysctl_key("net.core.rmem_max").is_none());
    }

    #[test]
    fn test_validate_ranges() {
        let reg = CardRegistry::from_yaml_str(CARDS).unwrap();
        assert!(reg.validate_value("net.core.somaxconn", &SysctlValue::Integer(4096)).is_ok());
        assert!(reg.validate_value("net.core.somaxconn", &SysctlValue::Integer(10)).is_err());
        assert!(reg.validate_value("tcp-congestion", &"bbr".into()).is_ok());
        assert!(reg.validate_value("tcp-congestion", &"reno".into()).is_err());
        assert!(reg.validate_value("net.ipv4.tcp_rmem", &"4096 87380 6291456".into()).is_ok());
        assert!(reg.validate_value("net.ipv4.tcp_rmem", &"1024 87380 6291456".into()).is_err());
        assert!(reg.validate_value("missing", &SysctlValue::Integer(1)).is_err());
    }

    #[test]
    fn test_duplicate_and_invalid_cards() {
        let dup = "- id: a\n- id: a\n";
        assert!(matches!(CardRegistry::from_yaml_str(dup), Err(CardError::Duplicate(_))));

        let inverted = "id: a\nsafe:\n  min: 10\n  max: 1\n";
        assert!(matches!(CardRegistry::from_yaml_str(inverted), Err(CardError::Invalid { .. })));

        let unknown = "id: a\nflavour: x\n";
        assert!(CardRegistry::from_yaml_str(unknown).is_err());
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.yaml"), "id: net.core.somaxconn\n").unwrap();
        fs::write(dir.path().join("b.yml"), "- id: net.core.rmem_max\n").unwrap();
        fs::write(dir.path().join("README.md"), "not a card").unwrap();

        let reg = CardRegistry::load_dir(dir.path()).unwrap();
        let ids: Vec<_> = reg.list().iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec!["net.core.rmem_max", "net.core.somaxconn"]);
    }
}
