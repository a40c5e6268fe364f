//! Config commands

use crate::{output::OutputFormat, ConfigCommands};
use anyhow::{anyhow, bail, Context};
use nettune_agent::AgentConfig;
use std::fs;
use std::path::{Path, PathBuf};

pub fn handle(
    action: ConfigCommands,
    config: &AgentConfig,
    explicit: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match action {
        ConfigCommands::Show => format.print(config)?,
        ConfigCommands::Path => match source_path(explicit) {
            Some(path) if path.exists() => println!("{}", path.display()),
            Some(path) => println!("{} (not present, using defaults)", path.display()),
            None => println!("(no home directory, using defaults)"),
        },
        ConfigCommands::Init { force } => {
            let path = match explicit {
                Some(path) => path.to_path_buf(),
                None => AgentConfig::default_path()
                    .ok_or_else(|| anyhow!("cannot find home directory"))?,
            };
            if path.exists() && !force {
                bail!("{} already exists; pass --force to overwrite", path.display());
            }
            write_default(&path)?;
            println!("Configuration initialized at {}", path.display());
        }
    }
    Ok(())
}

/// `explicit` already carries `$NETTUNE_CONFIG` through clap's env fallback
fn source_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit.map(Path::to_path_buf).or_else(AgentConfig::default_path)
}

fn write_default(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(&AgentConfig::default())?;
    fs::write(path, content).with_context(|| format!("writing {}", path.display()))
}
