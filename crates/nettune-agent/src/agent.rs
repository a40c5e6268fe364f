//! The tool-call surface
//!
//! Every method is one tool call. Calls that can partially fail return a
//! structured record with an error trail; pure lookups return `Result`.

use crate::config::AgentConfig;
use nettune_apply::{
    ApplyEngine, ChangeReport, CheckpointManager, CheckpointStore, CheckpointSummary,
    FsCheckpointStore, HostLock, RestoreResult, SnapshotResult,
};
use nettune_bench::{BenchmarkEngine, BenchmarkResult, DecisionResult, LatencyStats, Probe};
use nettune_common::{
    AllowlistedExecutor, AuditAction, AuditEntry, AuditFilter, AuditSink, CommandExecutor,
    JsonlAuditLog, NetTuneError, NetTuneResult, Objectives, RenderedPlan, Targets, WorkloadProfile,
};
use nettune_policy::{
    CardError, CardRegistry, ConfigCard, ValidationIssue, ValidationReport, Validator,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Cards(#[from] CardError),
}

/// Injected collaborators
pub struct AgentServices {
    pub executor: Arc<dyn CommandExecutor>,
    pub audit: Arc<dyn AuditSink>,
    pub store: Arc<dyn CheckpointStore>,
    pub cards: Option<CardRegistry>,
    pub lock: Arc<HostLock>,
}

/// Outcome of `render_change_plan`; `rendered` is present iff the plan validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderResponse {
    pub ok: bool,
    pub issues: Vec<ValidationIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered: Option<RenderedPlan>,
}

pub struct NetTuneAgent {
    config: AgentConfig,
    validator: Validator,
    audit: Arc<dyn AuditSink>,
    checkpoints: Arc<CheckpointManager>,
    apply: ApplyEngine,
    bench: BenchmarkEngine,
    lock: Arc<HostLock>,
}

impl NetTuneAgent {
    /// Build the production agent: real processes, files under `state_dir`
    pub fn from_config(config: AgentConfig) -> Result<Self, AgentError> {
        let cards = match &config.cards_dir {
            Some(dir) => {
                let cards = CardRegistry::load_dir(dir)?;
                tracing::info!("Loaded {} config cards from {}", cards.len(), dir.display());
                Some(cards)
            }
            None => None,
        };
        let services = AgentServices {
            executor: Arc::new(AllowlistedExecutor::from_names(&config.allowlist)),
            audit: Arc::new(JsonlAuditLog::with_max_bytes(
                config.audit_path(),
                config.audit.max_bytes,
            )),
            store: Arc::new(FsCheckpointStore::new(config.checkpoint_dir())),
            cards,
            lock: Arc::new(HostLock::new(Some(config.lock_path()))),
        };
        Ok(Self::with_services(config, services))
    }

    pub fn with_services(config: AgentConfig, services: AgentServices) -> Self {
        let AgentServices { executor, audit, store, cards, lock } = services;
        let checkpoints = Arc::new(CheckpointManager::new(
            executor.clone(),
            store,
            audit.clone(),
            config.checkpoint_settings(),
        ));
        let apply = ApplyEngine::new(
            executor.clone(),
            checkpoints.clone(),
            audit.clone(),
            lock.clone(),
            config.apply_settings(),
        );
        let bench = BenchmarkEngine::new(executor, audit.clone(), config.benchmark_settings());
        let validator = match cards {
            Some(cards) => Validator::with_cards(cards),
            None => Validator::new(),
        };
        Self { config, validator, audit, checkpoints, apply, bench, lock }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub(crate) fn audit_sink(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub(crate) fn checkpoint_manager(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub(crate) fn host_lock(&self) -> &HostLock {
        &self.lock
    }

    pub fn validate_change_plan(&self, raw: &Value) -> ValidationReport {
        let report = self.validator.validate(raw);
        self.audit.record(AuditEntry::new(AuditAction::ValidatePlan, report.ok).with_details(
            serde_json::json!({
                "errors": report.errors().count(),
                "warnings": report.warnings().count(),
            }),
        ));
        report
    }

    /// Validate, then render the normalized plan
    pub fn render_change_plan(&self, raw: &Value) -> RenderResponse {
        let report = self.validator.validate(raw);
        let rendered = report.normalized_plan.as_ref().map(nettune_render::render_plan);
        self.audit.record(AuditEntry::new(AuditAction::RenderPlan, rendered.is_some()).with_details(
            serde_json::json!({
                "iface": rendered.as_ref().map(|r| r.iface.clone()),
                "errors": report.errors().count(),
            }),
        ));
        RenderResponse { ok: rendered.is_some(), issues: report.issues, rendered }
    }

    /// Apply a rendered plan; `apply.dry_run` in the config forces a preview
    pub async fn apply_rendered_plan(
        &self,
        rendered: &RenderedPlan,
        dry_run: bool,
    ) -> ChangeReport {
        self.apply.apply(rendered, dry_run || self.config.apply.dry_run).await
    }

    pub async fn snapshot_checkpoint(&self, label: Option<&str>) -> SnapshotResult {
        self.checkpoints.snapshot(label).await
    }

    /// Restore a checkpoint while holding the host lock
    pub async fn rollback_to_checkpoint(&self, id: &str) -> RestoreResult {
        let _guard = match self.lock.try_acquire("rollback") {
            Ok(guard) => guard,
            Err(e) => {
                return RestoreResult {
                    checkpoint_id: id.to_string(),
                    errors: vec![e.to_string()],
                    ..Default::default()
                }
            }
        };
        self.checkpoints.restore(id).await
    }

    pub async fn list_checkpoints(&self) -> NetTuneResult<Vec<CheckpointSummary>> {
        self.checkpoints.list().await
    }

    pub async fn delete_checkpoint(&self, id: &str) -> NetTuneResult<()> {
        self.checkpoints.delete(id).await
    }

    /// Full benchmark; fails with `Busy` while an apply or rollback runs
    pub async fn test_network_performance(
        &self,
        profile: WorkloadProfile,
        targets: Option<&Targets>,
    ) -> NetTuneResult<BenchmarkResult> {
        let _guard = self.lock.try_acquire("benchmark")?;
        Ok(match targets {
            Some(targets) => {
                let settings = self.bench.settings().clone().with_targets(targets);
                self.bench.run_with(profile, &settings).await
            }
            None => self.bench.run(profile).await,
        })
    }

    pub async fn quick_latency_test(&self) -> NetTuneResult<Probe<LatencyStats>> {
        let _guard = self.lock.try_acquire("benchmark")?;
        Ok(self.bench.quick_latency().await)
    }

    pub fn validate_configuration_changes(
        &self,
        before: &BenchmarkResult,
        after: &BenchmarkResult,
        profile: WorkloadProfile,
    ) -> DecisionResult {
        self.decide(before, after, profile, None)
    }

    /// Like `validate_configuration_changes`, also checking a plan's objectives
    pub fn validate_against_objectives(
        &self,
        before: &BenchmarkResult,
        after: &BenchmarkResult,
        profile: WorkloadProfile,
        objectives: &Objectives,
    ) -> DecisionResult {
        self.decide(before, after, profile, Some(objectives))
    }

    pub(crate) fn decide(
        &self,
        before: &BenchmarkResult,
        after: &BenchmarkResult,
        profile: WorkloadProfile,
        objectives: Option<&Objectives>,
    ) -> DecisionResult {
        let result = match objectives {
            Some(objectives) => {
                nettune_bench::compare_with_objectives(before, after, profile, objectives)
            }
            None => nettune_bench::compare(before, after, profile),
        };
        self.audit.record(AuditEntry::new(AuditAction::Decision, true).with_details(
            serde_json::json!({
                "profile": profile,
                "decision": result.decision,
                "score": result.score,
            }),
        ));
        result
    }

    pub fn list_config_cards(&self) -> Vec<ConfigCard> {
        self.validator.cards().map(|c| c.list().into_iter().cloned().collect()).unwrap_or_default()
    }

    pub fn get_config_card(&self, id: &str) -> NetTuneResult<ConfigCard> {
        self.validator
            .cards()
            .and_then(|c| c.get(id))
            .cloned()
            .ok_or_else(|| NetTuneError::NotFound(format!("config card {}", id)))
    }

    pub fn search_audit_log(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.audit.query(filter)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nettune_apply::InMemoryCheckpointStore;
    use nettune_common::testing::ScriptedExecutor;
    use nettune_common::{CommandOutput, MemoryAuditLog};

    pub(crate) struct Fixture {
        pub(crate) exec: Arc<ScriptedExecutor>,
        pub(crate) audit: Arc<MemoryAuditLog>,
        pub(crate) store: Arc<InMemoryCheckpointStore>,
        pub(crate) lock: Arc<HostLock>,
        pub(crate) agent: NetTuneAgent,
        pub(crate) _dir: tempfile::TempDir,
    }

    const CARDS: &str = "
- id: net.core.somaxconn
  safe: { min: 128, max: 65535 }
- id: net.ipv4.tcp_congestion_control
  safe: { allowed: [cubic, bbr] }
";

    pub(crate) fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new());
        exec.on(&["sysctl", "-a"], CommandOutput::success("net.core.somaxconn = 128\n"));
        exec.on(
            &["ip", "-j", "link", "show"],
            CommandOutput::success(r#"[{"ifname":"eth0","mtu":1500}]"#),
        );
        exec.on(&["nft", "list", "ruleset"], CommandOutput::success(""));
        let audit = Arc::new(MemoryAuditLog::new());
        let store = Arc::new(InMemoryCheckpointStore::new());
        let lock = Arc::new(HostLock::in_process());
        let config = AgentConfig::with_state_dir(dir.path());
        let services = AgentServices {
            executor: exec.clone(),
            audit: audit.clone(),
            store: store.clone(),
            cards: Some(CardRegistry::from_yaml_str(CARDS).unwrap()),
            lock: lock.clone(),
        };
        let agent = NetTuneAgent::with_services(config, services);
        Fixture { exec, audit, store, lock, agent, _dir: dir }
    }

    #[test]
    fn test_render_requires_valid_plan() {
        let f = fixture();
        let bad = serde_json::json!({
            "iface": "eth0",
            "profile": "gaming",
            "changes": { "shaper": { "egress_mbit": 200000 } }
        });
        let response = f.agent.render_change_plan(&bad);
        assert!(!response.ok);
        assert!(response.rendered.is_none());
        assert!(!response.issues.is_empty());

        let good = serde_json::json!({
            "iface": "eth0",
            "profile": "gaming",
            "changes": { "sysctl": { "net.core.somaxconn": 4096 } }
        });
        let response = f.agent.render_change_plan(&good);
        assert!(response.ok);
        let rendered = response.rendered.unwrap();
        assert_eq!(rendered.sysctl_cmds[0].to_string(), "sysctl -w net.core.somaxconn=4096");
        assert_eq!(f.audit.actions(), vec![AuditAction::RenderPlan, AuditAction::RenderPlan]);
    }

    #[test]
    fn test_cards_drive_policy() {
        let f = fixture();
        let plan = serde_json::json!({
            "iface": "eth0",
            "profile": "server",
            "changes": { "sysctl": { "net.core.somaxconn": 100 } }
        });
        let report = f.agent.validate_change_plan(&plan);
        assert!(!report.ok);
        assert!(matches!(report.first_error(), Some(NetTuneError::PolicyViolation { .. })));

        assert_eq!(f.agent.list_config_cards().len(), 2);
        assert!(f.agent.get_config_card("net.core.somaxconn").is_ok());
        assert!(matches!(f.agent.get_config_card("net.nope"), Err(NetTuneError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_config_forces_dry_run() {
        let mut f = fixture();
        let mut config = f.agent.config().clone();
        config.apply.dry_run = true;
        let services = AgentServices {
            executor: f.exec.clone(),
            audit: f.audit.clone(),
            store: f.store.clone(),
            cards: None,
            lock: f.lock.clone(),
        };
        f.agent = NetTuneAgent::with_services(config, services);

        let plan =
            serde_json::json!({ "iface": "eth0", "profile": "gaming", "changes": { "mtu": 1400 } });
        let rendered = f.agent.render_change_plan(&plan).rendered.unwrap();
        let report = f.agent.apply_rendered_plan(&rendered, false).await;
        assert!(report.dry_run);
        assert!(!report.applied);
        assert!(f.exec.calls().is_empty());
    }

    #[tokio::test]
    async fn test_benchmark_refused_while_locked() {
        let f = fixture();
        let _held = f.lock.try_acquire("apply").unwrap();
        let err = f
            .agent
            .test_network_performance(WorkloadProfile::Gaming, None)
            .await
            .unwrap_err();
        assert!(matches!(err, NetTuneError::Busy(_)));
        assert!(matches!(f.agent.quick_latency_test().await, Err(NetTuneError::Busy(_))));

        let restore = f.agent.rollback_to_checkpoint("ckpt-x").await;
        assert!(!restore.ok);
        assert!(restore.errors[0].contains("host busy"));
    }

    #[tokio::test]
    async fn test_checkpoint_lifecycle() {
        let f = fixture();
        let snap = f.agent.snapshot_checkpoint(Some("manual")).await;
        assert!(snap.ok, "{:?}", snap.errors);
        let id = snap.id.unwrap();

        let list = f.agent.list_checkpoints().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].label.as_deref(), Some("manual"));

        let restore = f.agent.rollback_to_checkpoint(&id).await;
        assert!(restore.ok, "{:?}", restore.errors);
        assert_eq!(f.exec.count(&["sysctl", "-w"]), 0);

        f.agent.delete_checkpoint(&id).await.unwrap();
        assert!(f.agent.list_checkpoints().await.unwrap().is_empty());

        let filter = AuditFilter { checkpoint_id: Some(id.clone()), ..Default::default() };
        let actions: Vec<_> = f.agent.search_audit_log(&filter).iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::CreateCheckpoint,
                AuditAction::Rollback,
                AuditAction::DeleteCheckpoint,
            ]
        );
    }
}
