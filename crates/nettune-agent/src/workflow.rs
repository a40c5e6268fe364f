//! Decision-driven automatic rollback

use crate::agent::NetTuneAgent;
use nettune_apply::RestoreResult;
use nettune_bench::{BenchmarkResult, Decision, DecisionResult};
use nettune_common::{AuditAction, AuditEntry, Objectives, WorkloadProfile};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoRollbackOutcome {
    Kept,
    RolledBack,
    RollbackFailed,
    NoAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoRollbackReport {
    pub outcome: AutoRollbackOutcome,
    pub decision: DecisionResult,
    pub checkpoint_id: String,
    pub auto_rollback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore: Option<RestoreResult>,
    pub notes: Vec<String>,
}

impl NetTuneAgent {
    /// Score the change and restore `checkpoint_id` when the verdict is ROLLBACK
    pub async fn auto_validate_and_rollback(
        &self,
        before: &BenchmarkResult,
        after: &BenchmarkResult,
        profile: WorkloadProfile,
        checkpoint_id: &str,
        auto_rollback: bool,
    ) -> AutoRollbackReport {
        self.auto_validate_with(before, after, profile, checkpoint_id, auto_rollback, None).await
    }

    /// [`auto_validate_and_rollback`](Self::auto_validate_and_rollback) that also holds the
    /// change to a plan's objectives
    pub async fn auto_validate_with(
        &self,
        before: &BenchmarkResult,
        after: &BenchmarkResult,
        profile: WorkloadProfile,
        checkpoint_id: &str,
        auto_rollback: bool,
        objectives: Option<&Objectives>,
    ) -> AutoRollbackReport {
        let decision = self.decide(before, after, profile, objectives);
        let mut report = AutoRollbackReport {
            outcome: AutoRollbackOutcome::NoAction,
            decision,
            checkpoint_id: checkpoint_id.to_string(),
            auto_rollback,
            restore: None,
            notes: Vec::new(),
        };

        match report.decision.decision {
            Decision::Keep => {
                report.outcome = AutoRollbackOutcome::Kept;
                report.notes.push("changes kept".to_string());
            }
            Decision::Uncertain => {
                report
                    .notes
                    .push("inconclusive result; changes left in place for review".to_string());
            }
            Decision::Rollback if !auto_rollback => {
                report.notes.push(format!(
                    "rollback recommended; automatic rollback disabled, restore {} manually",
                    checkpoint_id
                ));
            }
            Decision::Rollback => {
                tracing::warn!(
                    "Performance regressed (score {}); restoring {}",
                    report.decision.score,
                    checkpoint_id
                );
                let restore = self.restore_locked(checkpoint_id).await;
                if restore.ok {
                    report.outcome = AutoRollbackOutcome::RolledBack;
                    report.notes.push(format!("restored checkpoint {}", checkpoint_id));
                } else {
                    report.outcome = AutoRollbackOutcome::RollbackFailed;
                    tracing::error!(
                        "Automatic rollback to {} failed: {}; manual intervention required",
                        checkpoint_id,
                        restore.errors.join("; ")
                    );
                    report.notes.push(
                        "automatic rollback failed; manual intervention required".to_string(),
                    );
                }
                report.restore = Some(restore);
            }
        }

        let succeeded = report.outcome != AutoRollbackOutcome::RollbackFailed;
        self.audit_sink().record(
            AuditEntry::new(AuditAction::AutoRollback, succeeded)
                .with_checkpoint(checkpoint_id)
                .with_details(serde_json::json!({
                    "outcome": report.outcome,
                    "decision": report.decision.decision,
                    "score": report.decision.score,
                    "auto_rollback": auto_rollback,
                })),
        );
        report
    }

    async fn restore_locked(&self, checkpoint_id: &str) -> RestoreResult {
        let _guard = match self.host_lock().try_acquire("auto-rollback") {
            Ok(guard) => guard,
            Err(e) => {
                return RestoreResult {
                    checkpoint_id: checkpoint_id.to_string(),
                    errors: vec![e.to_string()],
                    ..Default::default()
                }
            }
        };
        self.checkpoint_manager().restore(checkpoint_id).await
    }
}
