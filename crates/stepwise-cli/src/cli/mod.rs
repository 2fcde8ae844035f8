//! CLI command definitions for the `stepwise` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod checkpoints;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use checkpoints::CheckpointCommand;

/// Run checkpointed workflows and inspect their checkpoints.
#[derive(Parser)]
#[command(name = "stepwise", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding config.toml and checkpoint files.
    #[arg(long, global = true, env = "STEPWISE_STATE_DIR", default_value = ".stepwise")]
    pub state_dir: PathBuf,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Detailed output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the demo counter pipeline with checkpointing.
    Run(run::RunArgs),

    /// Inspect or purge stored checkpoints.
    #[command(alias = "cp")]
    Checkpoints {
        #[command(subcommand)]
        command: CheckpointCommand,
    },

    /// Show the total number of stored checkpoints.
    Count,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "stepwise",
            "--state-dir",
            "/tmp/sw",
            "run",
            "--steps",
            "4",
            "--fail-at",
            "2",
            "--fail-attempts",
            "1",
            "--max-retry",
            "3",
            "--workflow-id",
            "nightly",
        ])
        .unwrap();

        assert_eq!(cli.state_dir, PathBuf::from("/tmp/sw"));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.steps, 4);
                assert_eq!(args.fail_at, Some(2));
                assert_eq!(args.fail_attempts, Some(1));
                assert_eq!(args.max_retry, Some(3));
                assert_eq!(args.workflow_id.as_deref(), Some("nightly"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn checkpoint_subcommands_parse() {
        let cli = Cli::try_parse_from(["stepwise", "checkpoints", "purge", "wf-1", "--json"])
            .unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Checkpoints {
                command: CheckpointCommand::Purge { .. }
            }
        ));
    }
}
