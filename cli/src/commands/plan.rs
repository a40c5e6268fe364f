//! Plan commands

use super::read_document;
use crate::output::OutputFormat;
use anyhow::bail;
use nettune_agent::NetTuneAgent;
use serde_json::Value;
use std::path::Path;

pub fn validate(agent: &NetTuneAgent, file: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let raw: Value = read_document(file)?;
    let report = agent.validate_change_plan(&raw);
    format.print(&report)?;
    if !report.ok {
        bail!("plan {} is invalid", file.display());
    }
    Ok(())
}

pub fn render(agent: &NetTuneAgent, file: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let raw: Value = read_document(file)?;
    let response = agent.render_change_plan(&raw);
    format.print(&response)?;
    if !response.ok {
        bail!("plan {} is invalid", file.display());
    }
    Ok(())
}

pub async fn apply(
    agent: &NetTuneAgent,
    file: &Path,
    dry_run: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let raw: Value = read_document(file)?;
    let response = agent.render_change_plan(&raw);
    let Some(rendered) = response.rendered else {
        format.print(&response.issues)?;
        bail!("plan {} is invalid", file.display());
    };

    let report = agent.apply_rendered_plan(&rendered, dry_run).await;
    format.print(&report)?;
    if !report.applied && !report.dry_run {
        bail!("plan not applied ({:?})", report.state);
    }
    Ok(())
}
