//! Checkpoint management
//!
//! A checkpoint is a point-in-time capture of the host state the pipeline
//! can change: kernel parameters, per-interface queueing, offloads and MTU,
//! and the packet-filter ruleset. Capturing is best effort; a backend that
//! cannot be read is recorded as an error on the checkpoint.
//!
//! Restoring replays only what differs from the current state. Queueing is
//! restored to a baseline: root and ingress disciplines are removed and a
//! parameterless root of the captured kind is re-added where that kind can
//! stand alone. Classes, filters and qdisc parameters are not replayed.

use crate::host::{self, HostState, InterfaceState};
use crate::store::{CheckpointStore, StoreError};
use chrono::{DateTime, Utc};
use nettune_common::{
    AuditAction, AuditEntry, AuditSink, Binary, CommandExecutor, CommandLine, NetTuneError,
    NetTuneResult,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Kernel parameters never written back: read-only, write-only or secret
pub const DEFAULT_SYSCTL_DENY_LIST: &[&str] = &[
    "net.netfilter.nf_conntrack_count",
    "net.netfilter.nf_conntrack_buckets",
    "net.ipv4.route.flush",
    "net.ipv6.route.flush",
    "net.core.netdev_rss_key",
    "net.ipv4.tcp_available_congestion_control",
    "net.ipv4.tcp_available_ulp",
    ".stable_secret",
];

/// Root qdiscs that are re-added without parameters on restore
const REPLAYABLE_QDISCS: &[&str] = &["fq_codel", "fq", "cake", "sfq", "pie", "fq_pie"];

/// Root qdiscs the kernel recreates by itself once the root is deleted
const KERNEL_DEFAULT_QDISCS: &[&str] = &["mq", "noqueue", "pfifo_fast"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub state: HostState,
    #[serde(default)]
    pub errors: Vec<String>,
    pub checksum: String,
}

fn state_checksum(state: &HostState) -> String {
    let body = serde_json::to_vec(state).unwrap_or_default();
    hex::encode(Sha256::digest(&body))
}

impl Checkpoint {
    pub fn new(id: String, label: Option<String>, state: HostState, errors: Vec<String>) -> Self {
        let checksum = state_checksum(&state);
        Self { id, label, created_at: Utc::now(), state, errors, checksum }
    }

    pub fn verify(&self) -> bool {
        state_checksum(&self.state) == self.checksum
    }

    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            id: self.id.clone(),
            label: self.label.clone(),
            created_at: self.created_at,
            interfaces: self.state.interfaces.len(),
            sysctl_keys: self.state.sysctl.len(),
            has_nft_ruleset: self.state.nft_ruleset.is_some(),
            errors: self.errors.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub id: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub interfaces: usize,
    pub sysctl_keys: usize,
    pub has_nft_ruleset: bool,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotResult {
    pub ok: bool,
    pub id: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreResult {
    pub checkpoint_id: String,
    pub ok: bool,
    /// Actions taken, in order
    pub restored: Vec<String>,
    pub errors: Vec<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CheckpointSettings {
    /// Directory for transient files such as ruleset reloads
    pub scratch_dir: PathBuf,
    pub command_timeout: Duration,
    /// Keep at most this many checkpoints; oldest are pruned first
    pub max_checkpoints: Option<usize>,
    pub sysctl_deny_list: Vec<String>,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("nettune"),
            command_timeout: Duration::from_secs(30),
            max_checkpoints: None,
            sysctl_deny_list: DEFAULT_SYSCTL_DENY_LIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CheckpointSettings {
    /// Whether a kernel parameter is excluded from restore. Entries ending
    /// in `.` match a prefix, entries starting with `.` match a suffix.
    pub fn is_denied(&self, key: &str) -> bool {
        self.sysctl_deny_list.iter().any(|d| {
            if d.ends_with('.') {
                key.starts_with(d.as_str())
            } else if d.starts_with('.') {
                key.ends_with(d.as_str())
            } else {
                key == d
            }
        })
    }
}

/// Creates, restores, lists and deletes checkpoints
pub struct CheckpointManager {
    executor: Arc<dyn CommandExecutor>,
    store: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditSink>,
    settings: CheckpointSettings,
}

fn new_checkpoint_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("ckpt-{}-{}", Utc::now().format("%Y%m%dT%H%M%S%3fZ"), suffix)
}

fn store_error(e: StoreError) -> NetTuneError {
    match e {
        StoreError::NotFound(id) | StoreError::InvalidId(id) => NetTuneError::NotFound(id),
        other => NetTuneError::Storage(other.to_string()),
    }
}

impl CheckpointManager {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        store: Arc<dyn CheckpointStore>,
        audit: Arc<dyn AuditSink>,
        settings: CheckpointSettings,
    ) -> Self {
        Self { executor, store, audit, settings }
    }

    pub fn settings(&self) -> &CheckpointSettings {
        &self.settings
    }

    /// Run a command; stdout on success. Tolerated failures count as success.
    async fn exec(&self, cmd: CommandLine) -> Result<String, String> {
        match self.executor.run(&cmd, self.settings.command_timeout).await {
            Ok(out) if out.ok || cmd.tolerate_failure => Ok(out.stdout),
            Ok(out) => Err(format!("{}: {}", cmd, out.error_message())),
            Err(e) => Err(format!("{}: {}", cmd, e)),
        }
    }

    async fn capture(&self) -> (HostState, Vec<String>) {
        let mut state = HostState::default();
        let mut errors = Vec::new();

        match self.exec(CommandLine::new(Binary::Sysctl).arg("-a")).await {
            Ok(text) => state.sysctl = host::parse_sysctl(&text),
            Err(e) => errors.push(e),
        }

        match self.exec(CommandLine::new(Binary::Ip).args(["-j", "link", "show"])).await {
            Ok(text) => match host::parse_ip_link(&text) {
                Ok(links) => state.interfaces = links,
                Err(e) => errors.push(format!("ip -j link show: unparseable output: {}", e)),
            },
            Err(e) => errors.push(e),
        }

        for iface in &mut state.interfaces {
            let name = iface.name.clone();
            let dump = |object: &str| {
                CommandLine::new(Binary::Tc).args([object, "show", "dev", name.as_str()])
            };
            match self.exec(dump("qdisc")).await {
                Ok(text) => iface.qdisc = Some(text),
                Err(e) => errors.push(e),
            }
            match self.exec(dump("class")).await {
                Ok(text) => iface.classes = Some(text),
                Err(e) => errors.push(e),
            }
            match self.exec(dump("filter")).await {
                Ok(text) => iface.filters = Some(text),
                Err(e) => errors.push(e),
            }
            match self.exec(CommandLine::new(Binary::Ethtool).args(["-k", name.as_str()])).await {
                Ok(text) => iface.offloads = host::parse_offloads(&text),
                Err(e) => errors.push(e),
            }
        }

        match self.exec(CommandLine::new(Binary::Nft).args(["list", "ruleset"])).await {
            Ok(text) => state.nft_ruleset = Some(text),
            Err(e) => errors.push(e),
        }

        (state, errors)
    }

    /// Capture and persist a checkpoint
    pub async fn create(&self, label: Option<&str>) -> NetTuneResult<Checkpoint> {
        let (state, errors) = self.capture().await;
        for e in &errors {
            tracing::warn!("Checkpoint capture incomplete: {}", e);
        }

        if state.is_empty() {
            let message = format!("nothing could be captured ({} errors)", errors.len());
            self.audit.record(
                AuditEntry::new(AuditAction::CreateCheckpoint, false)
                    .with_details(serde_json::json!({ "errors": errors, "message": message })),
            );
            return Err(NetTuneError::CheckpointCreation(message));
        }

        let checkpoint =
            Checkpoint::new(new_checkpoint_id(), label.map(str::to_string), state, errors);
        if let Err(e) = self.store.save(&checkpoint).await {
            self.audit.record(
                AuditEntry::new(AuditAction::CreateCheckpoint, false)
                    .with_checkpoint(&checkpoint.id)
                    .with_details(serde_json::json!({ "error": e.to_string() })),
            );
            return Err(NetTuneError::CheckpointCreation(format!("failed to persist: {}", e)));
        }

        tracing::info!(
            "Created checkpoint {} ({} interfaces, {} parameters, {} capture errors)",
            checkpoint.id,
            checkpoint.state.interfaces.len(),
            checkpoint.state.sysctl.len(),
            checkpoint.errors.len()
        );
        self.audit.record(
            AuditEntry::new(AuditAction::CreateCheckpoint, true)
                .with_checkpoint(&checkpoint.id)
                .with_details(serde_json::json!({
                    "label": checkpoint.label,
                    "errors": checkpoint.errors,
                })),
        );

        self.prune().await;
        Ok(checkpoint)
    }

    /// Tool-call form of [`create`](Self::create)
    pub async fn snapshot(&self, label: Option<&str>) -> SnapshotResult {
        match self.create(label).await {
            Ok(checkpoint) => SnapshotResult {
                ok: true,
                id: Some(checkpoint.id),
                errors: checkpoint.errors,
            },
            Err(e) => SnapshotResult { ok: false, id: None, errors: vec![e.to_string()] },
        }
    }

    async fn prune(&self) {
        let Some(max) = self.settings.max_checkpoints else {
            return;
        };
        let list = match self.store.list().await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!("Cannot list checkpoints for retention: {}", e);
                return;
            }
        };
        let excess = list.len().saturating_sub(max);
        for summary in list.into_iter().take(excess) {
            let ok = self.store.delete(&summary.id).await.is_ok();
            tracing::info!("Pruned checkpoint {} (retention {})", summary.id, max);
            self.audit.record(
                AuditEntry::new(AuditAction::DeleteCheckpoint, ok)
                    .with_checkpoint(&summary.id)
                    .with_details(serde_json::json!({ "reason": "retention" })),
            );
        }
    }

    pub async fn list(&self) -> NetTuneResult<Vec<CheckpointSummary>> {
        self.store.list().await.map_err(store_error)
    }

    pub async fn get(&self, id: &str) -> NetTuneResult<Checkpoint> {
        self.store.load(id).await.map_err(store_error)
    }

    pub async fn delete(&self, id: &str) -> NetTuneResult<()> {
        let result = self.store.delete(id).await.map_err(store_error);
        self.audit.record(
            AuditEntry::new(AuditAction::DeleteCheckpoint, result.is_ok()).with_checkpoint(id),
        );
        result
    }

    /// Restore the host to a checkpoint
    pub async fn restore(&self, id: &str) -> RestoreResult {
        let mut result = RestoreResult { checkpoint_id: id.to_string(), ..Default::default() };

        match self.store.load(id).await {
            Ok(checkpoint) => {
                tracing::info!("Restoring checkpoint {}", id);
                self.restore_sysctl(&checkpoint.state, &mut result).await;
                self.restore_nft(&checkpoint, &mut result).await;
                self.restore_interfaces(&checkpoint.state, &mut result).await;
            }
            Err(e) => result.errors.push(format!("cannot load checkpoint: {}", e)),
        }

        result.ok = result.errors.is_empty();
        if result.ok {
            tracing::info!("Restored checkpoint {} ({} actions)", id, result.restored.len());
        } else {
            tracing::error!("Restore of checkpoint {} failed: {}", id, result.errors.join("; "));
        }
        self.audit.record(
            AuditEntry::new(AuditAction::Rollback, result.ok)
                .with_checkpoint(id)
                .with_details(serde_json::json!({
                    "restored": result.restored,
                    "errors": result.errors,
                })),
        );
        result
    }

    async fn restore_sysctl(&self, state: &HostState, result: &mut RestoreResult) {
        let current = match self.exec(CommandLine::new(Binary::Sysctl).arg("-a")).await {
            Ok(text) => Some(host::parse_sysctl(&text)),
            Err(e) => {
                result.notes.push(format!(
                    "current kernel parameters unavailable ({}); replaying all",
                    e
                ));
                None
            }
        };

        for (key, value) in &state.sysctl {
            if !key.starts_with("net.") || value.is_empty() || self.settings.is_denied(key) {
                continue;
            }
            if let Some(current) = &current {
                match current.get(key) {
                    Some(now) if now == value => continue,
                    None => continue,
                    Some(_) => {}
                }
            }
            let cmd = CommandLine::new(Binary::Sysctl).arg("-w").arg(format!("{}={}", key, value));
            match self.exec(cmd).await {
                Ok(_) => result.restored.push(format!("sysctl {}={}", key, value)),
                Err(e) => result.errors.push(e),
            }
        }
    }

    async fn restore_nft(&self, checkpoint: &Checkpoint, result: &mut RestoreResult) {
        let Some(ruleset) = &checkpoint.state.nft_ruleset else {
            result.notes.push("no packet-filter ruleset was captured; left unchanged".to_string());
            return;
        };
        if let Ok(now) = self.exec(CommandLine::new(Binary::Nft).args(["list", "ruleset"])).await {
            if now.trim() == ruleset.trim() {
                return;
            }
        }

        let path = self.settings.scratch_dir.join(format!("restore-{}.nft", checkpoint.id));
        let body = format!("flush ruleset\n{}\n", ruleset);
        let written = async {
            tokio::fs::create_dir_all(&self.settings.scratch_dir).await?;
            tokio::fs::write(&path, body).await
        }
        .await;
        if let Err(e) = written {
            result.errors.push(format!("cannot write {}: {}", path.display(), e));
            return;
        }

        let cmd = CommandLine::new(Binary::Nft).arg("-f").arg(path.to_string_lossy());
        match self.exec(cmd).await {
            Ok(_) => result.restored.push("nft ruleset".to_string()),
            Err(e) => result.errors.push(e),
        }
        let _ = tokio::fs::remove_file(&path).await;
    }

    async fn restore_interfaces(&self, state: &HostState, result: &mut RestoreResult) {
        let current: Option<Vec<InterfaceState>> =
            match self.exec(CommandLine::new(Binary::Ip).args(["-j", "link", "show"])).await {
                Ok(text) => host::parse_ip_link(&text).ok(),
                Err(_) => None,
            };
        if current.is_none() {
            result.notes.push("current link state unavailable; MTU not compared".to_string());
        }

        for captured in &state.interfaces {
            let live = current.as_ref().map(|links| links.iter().find(|l| l.name == captured.name));
            if let Some(None) = live {
                result.notes.push(format!("interface {} no longer exists; skipped", captured.name));
                continue;
            }
            self.restore_qdisc(captured, result).await;
            self.restore_offloads(captured, result).await;

            if let (Some(want), Some(Some(live))) = (captured.mtu, live) {
                if live.mtu != Some(want) {
                    let cmd = CommandLine::new(Binary::Ip)
                        .args(["link", "set", "dev", captured.name.as_str(), "mtu"])
                        .arg(want.to_string());
                    match self.exec(cmd).await {
                        Ok(_) => result.restored.push(format!("mtu {}={}", captured.name, want)),
                        Err(e) => result.errors.push(e),
                    }
                }
            }
        }
    }

    async fn restore_qdisc(&self, captured: &InterfaceState, result: &mut RestoreResult) {
        let Some(dump) = &captured.qdisc else {
            return;
        };
        let name = captured.name.as_str();
        let show = CommandLine::new(Binary::Tc).args(["qdisc", "show", "dev", name]);
        if let Ok(now) = self.exec(show).await {
            if now.trim() == dump.trim() {
                return;
            }
        }

        // a missing discipline exits non-zero and is tolerated; refusals are not
        for parent in ["root", "ingress"] {
            let del = CommandLine::new(Binary::Tc)
                .args(["qdisc", "del", "dev", name, parent])
                .tolerate_failure();
            if let Err(e) = self.exec(del).await {
                result.errors.push(e);
                return;
            }
        }

        let kind = captured.root_qdisc();
        match kind.as_deref() {
            Some(k) if REPLAYABLE_QDISCS.contains(&k) => {
                let add =
                    CommandLine::new(Binary::Tc).args(["qdisc", "add", "dev", name, "root", k]);
                if let Err(e) = self.exec(add).await {
                    result.errors.push(e);
                    return;
                }
                result.notes.push(format!(
                    "{}: root {} re-added without its original parameters",
                    name, k
                ));
            }
            Some(k) if KERNEL_DEFAULT_QDISCS.contains(&k) => {}
            Some(k) => result.notes.push(format!(
                "{}: root {} with its classes and filters is not replayed; kernel default restored",
                name, k
            )),
            None => {}
        }
        result.restored.push(format!("qdisc {}", name));
    }

    async fn restore_offloads(&self, captured: &InterfaceState, result: &mut RestoreResult) {
        if captured.offloads.is_empty() {
            return;
        }
        let name = captured.name.as_str();
        let current: BTreeMap<String, bool> =
            match self.exec(CommandLine::new(Binary::Ethtool).args(["-k", name])).await {
                Ok(text) => host::parse_offloads(&text),
                Err(_) => BTreeMap::new(),
            };
        for (feature, on) in &captured.offloads {
            if current.get(feature) == Some(on) {
                continue;
            }
            let state = if *on { "on" } else { "off" };
            let cmd = CommandLine::new(Binary::Ethtool).args(["-K", name, feature.as_str(), state]);
            match self.exec(cmd).await {
                Ok(_) => result.restored.push(format!("{} {}={}", name, feature, state)),
                Err(e) => result.errors.push(e),
            }
        }
    }
}
