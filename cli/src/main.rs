//! nettune CLI
//!
//! Command-line front end for the host network tuning pipeline.
//!
//! # Usage
//!
//! ```bash
//! nettune validate -f plan.yaml
//! nettune apply -f plan.yaml --dry-run
//! nettune bench run --profile gaming -o before.json
//! nettune compare --before before.json --after after.json --profile gaming
//! nettune auto-rollback --before before.json --after after.json \
//!     --profile gaming --checkpoint ckpt-...
//! nettune checkpoint list --format json
//! ```

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use nettune_agent::{AgentConfig, NetTuneAgent};
use nettune_common::{AuditAction, WorkloadProfile};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "nettune")]
#[command(version)]
#[command(
    about = "Validate, apply, benchmark and roll back host network tuning",
    long_about = None
)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true, env = "NETTUNE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'F', global = true, default_value = "table")]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a change plan
    Validate {
        /// Plan file (JSON or YAML)
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Validate and render a change plan into commands
    Render {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Validate, render and apply a change plan
    Apply {
        #[arg(short, long)]
        file: PathBuf,
        /// Preview the commands without touching the host
        #[arg(long)]
        dry_run: bool,
    },
    /// Manage checkpoints
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointCommands,
    },
    /// Measure network performance
    Bench {
        #[command(subcommand)]
        action: BenchCommands,
    },
    /// Score an after-benchmark against a before-benchmark
    Compare {
        #[arg(long)]
        before: PathBuf,
        #[arg(long)]
        after: PathBuf,
        #[arg(long)]
        profile: WorkloadProfile,
        /// Plan whose objectives the after-benchmark must meet
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Compare benchmarks and restore the checkpoint on regression
    AutoRollback {
        #[arg(long)]
        before: PathBuf,
        #[arg(long)]
        after: PathBuf,
        #[arg(long)]
        profile: WorkloadProfile,
        #[arg(long)]
        checkpoint: String,
        /// Report the decision without restoring
        #[arg(long)]
        no_rollback: bool,
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Query the audit log
    Audit {
        #[command(subcommand)]
        action: AuditCommands,
    },
    /// Inspect configuration cards
    Cards {
        #[command(subcommand)]
        action: CardCommands,
    },
    /// Inspect the agent configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// Capture the current host state
    Create {
        #[arg(long)]
        label: Option<String>,
    },
    /// List stored checkpoints
    List,
    /// Delete a checkpoint
    Delete { id: String },
    /// Restore a checkpoint
    Rollback { id: String },
}

#[derive(Subcommand)]
enum BenchCommands {
    /// Full benchmark battery for a profile
    Run {
        #[arg(long, default_value = "balanced")]
        profile: WorkloadProfile,
        /// Ping target
        #[arg(long)]
        ping: Option<String>,
        /// iperf3 peer, `host` or `host:port`
        #[arg(long)]
        iperf: Option<String>,
        /// Also write the result as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Ten pings against the configured host
    Quick,
}

#[derive(Subcommand)]
enum AuditCommands {
    /// Search audit entries
    Search {
        #[arg(long)]
        action: Option<AuditAction>,
        #[arg(long)]
        checkpoint: Option<String>,
        /// RFC 3339 lower bound
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// RFC 3339 upper bound
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum CardCommands {
    /// List loaded cards
    List,
    /// Show one card
    Get { id: String },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the path the configuration is read from
    Path,
    /// Write the default configuration to the default path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AgentConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let format = cli.format;

    if let Commands::Config { action } = cli.command {
        return commands::config::handle(action, &config, cli.config.as_deref(), format);
    }

    let agent = NetTuneAgent::from_config(config).context("starting agent")?;
    match cli.command {
        Commands::Validate { file } => commands::plan::validate(&agent, &file, format),
        Commands::Render { file } => commands::plan::render(&agent, &file, format),
        Commands::Apply { file, dry_run } => {
            commands::plan::apply(&agent, &file, dry_run, format).await
        }
        Commands::Checkpoint { action } => {
            commands::checkpoint::handle(action, &agent, format).await
        }
        Commands::Bench { action } => commands::bench::handle(action, &agent, format).await,
        Commands::Compare { before, after, profile, plan } => {
            commands::bench::compare(&agent, &before, &after, profile, plan.as_deref(), format)
        }
        Commands::AutoRollback { before, after, profile, checkpoint, no_rollback, plan } => {
            let args = commands::bench::AutoRollbackArgs {
                before,
                after,
                profile,
                checkpoint,
                auto_rollback: !no_rollback,
                plan,
            };
            commands::bench::auto_rollback(&agent, args, format).await
        }
        Commands::Audit { action } => commands::audit::handle(action, &agent, format),
        Commands::Cards { action } => commands::cards::handle(action, &agent, format),
        Commands::Config { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_profiles_and_actions() {
        let cli = Cli::parse_from([
            "nettune",
            "bench",
            "run",
            "--profile",
            "low-latency",
            "--iperf",
            "10.0.0.2:5201",
        ]);
        match cli.command {
            Commands::Bench { action: BenchCommands::Run { profile, iperf, .. } } => {
                assert_eq!(profile, WorkloadProfile::LowLatency);
                assert_eq!(iperf.as_deref(), Some("10.0.0.2:5201"));
            }
            _ => panic!("wrong subcommand"),
        }

        let cli = Cli::parse_from([
            "nettune",
            "audit",
            "search",
            "--action",
            "auto_rollback",
            "-F",
            "json",
        ]);
        assert!(matches!(cli.format, output::OutputFormat::Json));
        match cli.command {
            Commands::Audit { action: AuditCommands::Search { action, .. } } => {
                assert_eq!(action, Some(AuditAction::AutoRollback));
            }
            _ => panic!("wrong subcommand"),
        }

        let bad_profile = [
            "nettune", "compare", "--before", "a", "--after", "b", "--profile", "nope",
        ];
        assert!(Cli::try_parse_from(bad_profile).is_err());
    }
}
