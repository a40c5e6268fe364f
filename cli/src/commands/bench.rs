//! Benchmark and decision commands

use super::read_document;
use crate::{output::OutputFormat, BenchCommands};
use anyhow::{bail, Context};
use nettune_agent::{AutoRollbackOutcome, NetTuneAgent};
use nettune_bench::BenchmarkResult;
use nettune_common::{Objectives, Targets, WorkloadProfile};
use std::fs;
use std::path::{Path, PathBuf};

pub struct AutoRollbackArgs {
    pub before: PathBuf,
    pub after: PathBuf,
    pub profile: WorkloadProfile,
    pub checkpoint: String,
    pub auto_rollback: bool,
    pub plan: Option<PathBuf>,
}

pub async fn handle(
    action: BenchCommands,
    agent: &NetTuneAgent,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match action {
        BenchCommands::Run { profile, ping, iperf, output } => {
            let targets = (ping.is_some() || iperf.is_some()).then_some(Targets { ping, iperf });
            let result = agent.test_network_performance(profile, targets.as_ref()).await?;
            if let Some(path) = output {
                fs::write(&path, serde_json::to_string_pretty(&result)?)
                    .with_context(|| format!("writing {}", path.display()))?;
                tracing::info!("Benchmark written to {}", path.display());
            }
            format.print(&result)?;
        }
        BenchCommands::Quick => {
            let probe = agent.quick_latency_test().await?;
            format.print(&probe)?;
        }
    }
    Ok(())
}

pub fn compare(
    agent: &NetTuneAgent,
    before: &Path,
    after: &Path,
    profile: WorkloadProfile,
    plan: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let before: BenchmarkResult = read_document(before)?;
    let after: BenchmarkResult = read_document(after)?;
    let result = match plan_objectives(agent, plan)? {
        Some(objectives) => {
            agent.validate_against_objectives(&before, &after, profile, &objectives)
        }
        None => agent.validate_configuration_changes(&before, &after, profile),
    };
    format.print(&result)
}

pub async fn auto_rollback(
    agent: &NetTuneAgent,
    args: AutoRollbackArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let before: BenchmarkResult = read_document(&args.before)?;
    let after: BenchmarkResult = read_document(&args.after)?;
    let objectives = plan_objectives(agent, args.plan.as_deref())?;

    let report = agent
        .auto_validate_with(
            &before,
            &after,
            args.profile,
            &args.checkpoint,
            args.auto_rollback,
            objectives.as_ref(),
        )
        .await;
    format.print(&report)?;
    if report.outcome == AutoRollbackOutcome::RollbackFailed {
        bail!("automatic rollback to {} failed", args.checkpoint);
    }
    Ok(())
}

fn plan_objectives(
    agent: &NetTuneAgent,
    plan: Option<&Path>,
) -> anyhow::Result<Option<Objectives>> {
    let Some(path) = plan else {
        return Ok(None);
    };
    let raw: serde_json::Value = read_document(path)?;
    let report = agent.validate_change_plan(&raw);
    match report.normalized_plan {
        Some(plan) => Ok(plan.validate.and_then(|v| v.objectives)),
        None => bail!("plan {} is invalid", path.display()),
    }
}
