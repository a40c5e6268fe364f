//! Audit commands

use crate::{output::OutputFormat, AuditCommands};
use nettune_agent::NetTuneAgent;
use nettune_common::AuditFilter;

pub fn handle(
    action: AuditCommands,
    agent: &NetTuneAgent,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match action {
        AuditCommands::Search { action, checkpoint, since, until, limit } => {
            let filter = AuditFilter { action, checkpoint_id: checkpoint, since, until, limit };
            format.print(&agent.search_audit_log(&filter))
        }
    }
}
