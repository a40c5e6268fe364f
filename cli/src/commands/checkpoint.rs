//! Checkpoint commands

use crate::{output::OutputFormat, CheckpointCommands};
use anyhow::bail;
use nettune_agent::NetTuneAgent;

pub async fn handle(
    action: CheckpointCommands,
    agent: &NetTuneAgent,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match action {
        CheckpointCommands::Create { label } => {
            let result = agent.snapshot_checkpoint(label.as_deref()).await;
            format.print(&result)?;
            if !result.ok {
                bail!("checkpoint not created");
            }
        }
        CheckpointCommands::List => {
            let checkpoints = agent.list_checkpoints().await?;
            format.print(&checkpoints)?;
        }
        CheckpointCommands::Delete { id } => {
            agent.delete_checkpoint(&id).await?;
            println!("Deleted checkpoint {}", id);
        }
        CheckpointCommands::Rollback { id } => {
            let result = agent.rollback_to_checkpoint(&id).await;
            format.print(&result)?;
            if !result.ok {
                bail!("rollback to {} failed", id);
            }
        }
    }
    Ok(())
}
