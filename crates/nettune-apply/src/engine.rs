//! Apply engine
//!
//! ```text
//! Pending -> Checkpointed -> Applying -> Applied
//!                                     -> RolledBack    (restore succeeded)
//!                                     -> Inconsistent  (restore failed)
//! Rejected: structurally invalid plan, host busy, or no checkpoint
//! ```
//!
//! Groups run in a fixed order (kernel parameters, traffic control, packet
//! filter, offloads, link) and the first failing command aborts the rest.

use crate::checkpoint::CheckpointManager;
use crate::lock::HostLock;
use nettune_common::{
    AuditAction, AuditEntry, AuditSink, Binary, CommandExecutor, CommandLine, NetTuneError,
    RenderedPlan,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyState {
    Pending,
    Checkpointed,
    Applying,
    Applied,
    RolledBack,
    Inconsistent,
    Rejected,
}

impl ApplyState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApplyState::Applied
                | ApplyState::RolledBack
                | ApplyState::Inconsistent
                | ApplyState::Rejected
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub applied: bool,
    pub dry_run: bool,
    pub state: ApplyState,
    /// Every state the attempt passed through
    pub history: Vec<ApplyState>,
    pub errors: Vec<String>,
    pub checkpoint_id: Option<String>,
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands_preview: Option<Vec<String>>,
    /// Commands that ran to completion
    #[serde(default)]
    pub executed: Vec<String>,
}

impl ChangeReport {
    fn new(dry_run: bool) -> Self {
        Self {
            applied: false,
            dry_run,
            state: ApplyState::Pending,
            history: vec![ApplyState::Pending],
            errors: Vec::new(),
            checkpoint_id: None,
            notes: Vec::new(),
            commands_preview: None,
            executed: Vec::new(),
        }
    }

    fn enter(&mut self, state: ApplyState) {
        tracing::debug!("apply: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.history.push(state);
    }

    fn reject(mut self, errors: Vec<String>) -> Self {
        self.errors.extend(errors);
        self.enter(ApplyState::Rejected);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApplySettings {
    /// Where the packet-filter script is written before loading
    pub scratch_dir: PathBuf,
    pub command_timeout: Duration,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("nettune"),
            command_timeout: Duration::from_secs(30),
        }
    }
}

struct StepFailure {
    group: &'static str,
    message: String,
}

pub struct ApplyEngine {
    executor: Arc<dyn CommandExecutor>,
    checkpoints: Arc<CheckpointManager>,
    audit: Arc<dyn AuditSink>,
    lock: Arc<HostLock>,
    settings: ApplySettings,
}

impl ApplyEngine {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        checkpoints: Arc<CheckpointManager>,
        audit: Arc<dyn AuditSink>,
        lock: Arc<HostLock>,
        settings: ApplySettings,
    ) -> Self {
        Self { executor, checkpoints, audit, lock, settings }
    }

    /// Apply a rendered plan, or preview it when `dry_run` is set
    pub async fn apply(&self, rendered: &RenderedPlan, dry_run: bool) -> ChangeReport {
        let report = self.run(rendered, dry_run).await;
        let succeeded = report.applied || (report.dry_run && report.errors.is_empty());
        self.audit.record({
            let entry = AuditEntry::new(AuditAction::ApplyPlan, succeeded)
                .with_details(serde_json::json!({
                    "iface": rendered.iface,
                    "state": report.state,
                    "dry_run": report.dry_run,
                    "errors": report.errors,
                }));
            match &report.checkpoint_id {
                Some(id) => entry.with_checkpoint(id),
                None => entry,
            }
        });
        report
    }

    async fn run(&self, rendered: &RenderedPlan, dry_run: bool) -> ChangeReport {
        let mut report = ChangeReport::new(dry_run);

        let problems = rendered.check();
        if !problems.is_empty() {
            tracing::warn!("Rejected plan for {}: {}", rendered.iface, problems.join("; "));
            return report.reject(problems);
        }

        if dry_run {
            report.commands_preview = Some(rendered.preview());
            report.notes.push("dry run: no checkpoint taken, nothing executed".to_string());
            return report;
        }

        let _guard = match self.lock.try_acquire("apply") {
            Ok(guard) => guard,
            Err(e) => return report.reject(vec![e.to_string()]),
        };

        if rendered.is_empty() {
            report.notes.push("plan contains no changes".to_string());
        }

        let checkpoint = match self.checkpoints.create(Some("pre-apply")).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                tracing::error!("Not applying to {}: {}", rendered.iface, e);
                return report.reject(vec![e.to_string()]);
            }
        };
        report.checkpoint_id = Some(checkpoint.id.clone());
        if !checkpoint.errors.is_empty() {
            report
                .notes
                .push(format!("checkpoint captured with {} errors", checkpoint.errors.len()));
        }
        report.enter(ApplyState::Checkpointed);

        report.enter(ApplyState::Applying);
        tracing::info!("Applying plan to {} (checkpoint {})", rendered.iface, checkpoint.id);

        match self.execute(rendered, &checkpoint.id, &mut report).await {
            Ok(()) => {
                report.applied = true;
                report.enter(ApplyState::Applied);
                tracing::info!("Applied plan to {}", rendered.iface);
            }
            Err(failure) => {
                let error = NetTuneError::CommandExecution {
                    command: failure.group.to_string(),
                    message: failure.message,
                };
                tracing::warn!("Apply failed, rolling back to {}: {}", checkpoint.id, error);
                report.errors.push(error.to_string());

                let restore = self.checkpoints.restore(&checkpoint.id).await;
                report.notes.extend(restore.notes);
                if restore.ok {
                    report.notes.push(format!("rolled back to checkpoint {}", checkpoint.id));
                    report.enter(ApplyState::RolledBack);
                } else {
                    report.errors.extend(restore.errors);
                    let critical = NetTuneError::Rollback(format!(
                        "INCONSISTENT STATE: restore of checkpoint {} failed; the host may be \
                         partially applied and manual intervention is required",
                        checkpoint.id
                    ));
                    tracing::error!("{}", critical);
                    report.errors.push(critical.to_string());
                    report.enter(ApplyState::Inconsistent);
                }
            }
        }
        report
    }

    async fn execute(
        &self,
        rendered: &RenderedPlan,
        checkpoint_id: &str,
        report: &mut ChangeReport,
    ) -> Result<(), StepFailure> {
        self.run_group("sysctl", &rendered.sysctl_cmds, checkpoint_id, report).await?;
        self.run_group("tc", &rendered.tc_script, checkpoint_id, report).await?;
        if !rendered.nft_script.is_empty() {
            self.load_nft(&rendered.nft_script, checkpoint_id, report).await?;
        }
        self.run_group("ethtool", &rendered.ethtool_cmds, checkpoint_id, report).await?;
        self.run_group("ip link", &rendered.ip_link_cmds, checkpoint_id, report).await?;
        Ok(())
    }

    async fn run_group(
        &self,
        group: &'static str,
        cmds: &[CommandLine],
        checkpoint_id: &str,
        report: &mut ChangeReport,
    ) -> Result<(), StepFailure> {
        for cmd in cmds {
            self.run_one(group, cmd, checkpoint_id, report).await?;
        }
        Ok(())
    }

    async fn run_one(
        &self,
        group: &'static str,
        cmd: &CommandLine,
        checkpoint_id: &str,
        report: &mut ChangeReport,
    ) -> Result<(), StepFailure> {
        let outcome = self.executor.run(cmd, self.settings.command_timeout).await;
        let failure = match &outcome {
            Ok(out) if out.ok || cmd.tolerate_failure => None,
            Ok(out) => Some(out.error_message()),
            Err(e) => Some(e.to_string()),
        };

        self.audit.record(
            AuditEntry::new(AuditAction::ExecuteCommand, failure.is_none())
                .with_checkpoint(checkpoint_id)
                .with_details(serde_json::json!({
                    "group": group,
                    "command": cmd.to_string(),
                    "error": failure,
                })),
        );

        match failure {
            None => {
                report.executed.push(cmd.to_string());
                Ok(())
            }
            Some(message) => Err(StepFailure { group, message: format!("{}: {}", cmd, message) }),
        }
    }

    async fn load_nft(
        &self,
        script: &str,
        checkpoint_id: &str,
        report: &mut ChangeReport,
    ) -> Result<(), StepFailure> {
        let path = self.settings.scratch_dir.join(format!("apply-{}.nft", checkpoint_id));
        write_script(&self.settings.scratch_dir, &path, script)
            .await
            .map_err(|e| StepFailure {
                group: "nft",
                message: format!("cannot write {}: {}", path.display(), e),
            })?;

        let file = path.to_string_lossy().into_owned();
        let check = CommandLine::new(Binary::Nft).args(["-c", "-f", file.as_str()]);
        let load = CommandLine::new(Binary::Nft).args(["-f", file.as_str()]);

        let result = async {
            self.run_one("nft", &check, checkpoint_id, report).await?;
            self.run_one("nft", &load, checkpoint_id, report).await
        }
        .await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::debug!("Could not remove {}: {}", path.display(), e);
        }
        result
    }
}

async fn write_script(dir: &Path, path: &Path, script: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, script).await
}
