//! Card commands

use crate::{output::OutputFormat, CardCommands};
use nettune_agent::NetTuneAgent;

pub fn handle(
    action: CardCommands,
    agent: &NetTuneAgent,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match action {
        CardCommands::List => format.print(&agent.list_config_cards()),
        CardCommands::Get { id } => format.print(&agent.get_config_card(&id)?),
    }
}
