//! Agent configuration
//!
//! TOML, located by `--config`, then `$NETTUNE_CONFIG`, then
//! `~/.nettune/config.toml`. Every field has a default so a missing file is
//! not an error unless it was named explicitly.

use nettune_apply::{ApplySettings, CheckpointSettings};
use nettune_bench::BenchmarkSettings;
use nettune_common::Binary;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV: &str = "NETTUNE_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Checkpoints, scratch files, the lock file and the audit log live here
    pub state_dir: PathBuf,
    pub cards_dir: Option<PathBuf>,
    /// Tools the executor may spawn
    pub allowlist: Vec<String>,
    pub apply: ApplyConfig,
    pub checkpoints: CheckpointConfig,
    pub benchmark: BenchmarkConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplyConfig {
    pub command_timeout_secs: u64,
    /// Force every apply to be a preview
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    /// 0 keeps every checkpoint
    pub max_checkpoints: Option<usize>,
    /// Replaces the built-in list when set
    pub sysctl_deny_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchmarkConfig {
    pub ping_host: String,
    pub dns_server: String,
    pub dns_domain: String,
    pub connect_url: String,
    pub iperf_host: Option<String>,
    pub iperf_port: u16,
    pub iperf_duration_secs: u32,
    pub samples: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    /// Defaults to `audit.jsonl` under the state directory
    pub path: Option<PathBuf>,
    pub max_bytes: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            cards_dir: None,
            allowlist: Binary::ALL.iter().map(|b| b.name().to_string()).collect(),
            apply: ApplyConfig::default(),
            checkpoints: CheckpointConfig::default(),
            benchmark: BenchmarkConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self { command_timeout_secs: 30, dry_run: false }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { max_checkpoints: Some(50), sysctl_deny_list: None }
    }
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        let probe = BenchmarkSettings::default();
        Self {
            ping_host: probe.ping_host,
            dns_server: probe.dns_server,
            dns_domain: probe.dns_domain,
            connect_url: probe.connect_url,
            iperf_host: probe.iperf_host,
            iperf_port: probe.iperf_port,
            iperf_duration_secs: probe.iperf_duration_secs,
            samples: probe.samples,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { path: None, max_bytes: nettune_common::audit::DEFAULT_MAX_BYTES }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".nettune"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/nettune"))
}

impl AgentConfig {
    /// Load from the first configured location, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match resolve_path(explicit, std::env::var_os(CONFIG_ENV)) {
            Some((path, required)) if required || path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = toml::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".nettune").join("config.toml"))
    }

    /// Default config rooted at `state_dir`
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self { state_dir: state_dir.into(), ..Self::default() }
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.state_dir.join("checkpoints")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.state_dir.join("scratch")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("apply.lock")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.audit.path.clone().unwrap_or_else(|| self.state_dir.join("audit.jsonl"))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.apply.command_timeout_secs.max(1))
    }

    pub fn checkpoint_settings(&self) -> CheckpointSettings {
        let mut settings = CheckpointSettings {
            scratch_dir: self.scratch_dir(),
            command_timeout: self.command_timeout(),
            max_checkpoints: self.checkpoints.max_checkpoints.filter(|n| *n > 0),
            ..CheckpointSettings::default()
        };
        if let Some(deny) = &self.checkpoints.sysctl_deny_list {
            settings.sysctl_deny_list = deny.clone();
        }
        settings
    }

    pub fn apply_settings(&self) -> ApplySettings {
        ApplySettings { scratch_dir: self.scratch_dir(), command_timeout: self.command_timeout() }
    }

    pub fn benchmark_settings(&self) -> BenchmarkSettings {
        let b = &self.benchmark;
        BenchmarkSettings {
            ping_host: b.ping_host.clone(),
            dns_server: b.dns_server.clone(),
            dns_domain: b.dns_domain.clone(),
            connect_url: b.connect_url.clone(),
            iperf_host: b.iperf_host.clone(),
            iperf_port: b.iperf_port,
            iperf_duration_secs: b.iperf_duration_secs,
            samples: b.samples.max(1),
            ..BenchmarkSettings::default()
        }
    }
}

/// Config path and whether it must exist
fn resolve_path(explicit: Option<&Path>, env: Option<OsString>) -> Option<(PathBuf, bool)> {
    if let Some(path) = explicit {
        return Some((path.to_path_buf(), true));
    }
    if let Some(path) = env.filter(|p| !p.is_empty()) {
        return Some((PathBuf::from(path), true));
    }
    AgentConfig::default_path().map(|p| (p, false))
}
