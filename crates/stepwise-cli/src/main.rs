//! Stepwise CLI entry point.
//!
//! Binary name: `stepwise`
//!
//! Parses CLI arguments, sets up tracing, then dispatches to the command
//! handler. All state (config.toml and checkpoint files) lives under the
//! state directory.

mod cli;

use clap::Parser;
use stepwise_observe::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = TracingOptions {
        format: if cli.log_json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
        otel: cli.otel,
        ..TracingOptions::default()
    }
    .with_verbosity(cli.verbose);
    init_tracing(&options).map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    tracing::debug!(state_dir = %cli.state_dir.display(), "using state directory");

    let outcome = match cli.command {
        Commands::Run(args) => cli::run::handle_run(args, &cli.state_dir, cli.json).await,
        Commands::Checkpoints { command } => {
            cli::checkpoints::handle_checkpoint_command(command, &cli.state_dir, cli.json).await
        }
        Commands::Count => cli::checkpoints::handle_count(&cli.state_dir, cli.json).await,
    };

    shutdown_tracing();
    outcome
}
