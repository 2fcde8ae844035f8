//! `stepwise run`: execute the demo counter pipeline.
//!
//! Every step increments a shared `counter` in the execution state. One step
//! can be told to fail for a number of attempts (or always) to exercise the
//! retry budget, and Ctrl+C cancels the run between or during steps.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::json;
use stepwise_core::workflow::context::ExecutionContext;
use stepwise_core::workflow::definition::WorkflowDefinition;
use stepwise_core::workflow::executor::{ExecutorError, WorkflowEngine, WorkflowExecutor};
use stepwise_core::workflow::step::StepHandler;
use stepwise_infra::checkpoint::JsonFileCheckpointStore;
use stepwise_infra::config::load_engine_config;
use stepwise_types::config::EngineConfig;
use stepwise_types::workflow::{StepResult, WorkflowExecutionResult};
use tokio_util::sync::CancellationToken;

use super::checkpoints::{checkpoint_dir, format_status};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Number of counter steps.
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub steps: u32,

    /// Step number that fails.
    #[arg(long)]
    pub fail_at: Option<u32>,

    /// Failing attempts before that step succeeds (omit to fail every attempt).
    #[arg(long, requires = "fail_at")]
    pub fail_attempts: Option<u32>,

    /// Retries per step (defaults to `default_max_retry_per_step` from config.toml).
    #[arg(long)]
    pub max_retry: Option<u32>,

    /// Workflow id (generated when omitted).
    #[arg(long)]
    pub workflow_id: Option<String>,

    /// Pause inside each step, in milliseconds.
    #[arg(long, default_value_t = 0)]
    pub step_delay_ms: u64,
}

/// One step of the counter pipeline.
struct CounterStep {
    index: u32,
    failures: u32,
    attempts: AtomicU32,
    delay: Duration,
}

impl StepHandler for CounterStep {
    async fn execute(&self, ctx: &ExecutionContext, cancel: &CancellationToken) -> StepResult {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return StepResult::failed("interrupted"),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return StepResult::failed(format!(
                "step {} failed on attempt {attempt}",
                self.index
            ));
        }

        let counter = ctx.get_as::<u64>("counter").unwrap_or_default() + 1;
        StepResult::ok(json!({ "step": self.index, "counter": counter, "attempt": attempt }))
            .with_update("counter", counter)
            .with_update("last_step", self.index)
    }
}

/// Assemble the counter pipeline described by `args`.
pub fn build_pipeline(args: &RunArgs, config: &EngineConfig) -> WorkflowDefinition {
    let delay = Duration::from_millis(args.step_delay_ms);

    let mut builder = WorkflowDefinition::builder("counter").with_config(config);
    if let Some(retries) = args.max_retry {
        builder = builder.max_retry_per_step(retries);
    }
    if let Some(id) = &args.workflow_id {
        builder = builder.workflow_id(id.as_str());
    }

    for index in 0..args.steps {
        let failures = if args.fail_at == Some(index) {
            args.fail_attempts.unwrap_or(u32::MAX)
        } else {
            0
        };
        builder = builder.step(
            format!("count-{index}"),
            CounterStep {
                index,
                failures,
                attempts: AtomicU32::new(0),
                delay,
            },
        );
    }

    builder.build()
}

/// Handle `stepwise run`.
pub async fn handle_run(args: RunArgs, state_dir: &Path, json: bool) -> Result<()> {
    if let Some(fail_at) = args.fail_at.filter(|&n| n >= args.steps) {
        bail!("--fail-at {fail_at} is out of range for {} steps", args.steps);
    }

    let config = load_engine_config(state_dir).await;
    let definition = build_pipeline(&args, &config);
    let store = JsonFileCheckpointStore::new(checkpoint_dir(state_dir));
    let engine = WorkflowEngine::with_config(store, config);

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl+C received, cancelling workflow");
                cancel.cancel();
            }
        })
    };

    let outcome = engine.execute(&definition, &cancel).await;
    watcher.abort();

    match outcome {
        Ok(result) => {
            print_result(&result, json)?;
            if !result.success {
                bail!(
                    "workflow '{}' failed: {}",
                    result.workflow_id,
                    result.error_message.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(())
        }
        Err(ExecutorError::Cancelled {
            workflow_id,
            completed_steps,
        }) => {
            if json {
                let out = json!({
                    "workflow_id": workflow_id,
                    "cancelled": true,
                    "completed_steps": completed_steps,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!();
                println!(
                    "  {} Workflow '{}' cancelled after {} completed step(s)",
                    style("!").yellow().bold(),
                    style(&workflow_id).cyan(),
                    completed_steps
                );
                println!();
            }
            bail!("workflow '{workflow_id}' was cancelled")
        }
        Err(e) => Err(e).context("workflow execution failed"),
    }
}

fn print_result(result: &WorkflowExecutionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!();
    if result.success {
        println!(
            "  {} Workflow '{}' completed {}/{} steps",
            style("*").green().bold(),
            style(&result.workflow_id).cyan(),
            result.completed_steps,
            result.total_steps
        );
    } else {
        println!(
            "  {} Workflow '{}' failed after {}/{} steps",
            style("x").red().bold(),
            style(&result.workflow_id).cyan(),
            result.completed_steps,
            result.total_steps
        );
        if let Some(error) = &result.error_message {
            println!("  Error: {}", style(error).red());
        }
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Status"),
            Cell::new("State"),
        ]);

    for cp in &result.checkpoints {
        table.add_row(vec![
            Cell::new(cp.step_number),
            Cell::new(&cp.step_name),
            format_status(cp.status),
            Cell::new(&cp.state_json),
        ]);
    }
    println!("{table}");

    if result.success {
        println!();
        println!("  Final output: {}", result.final_output);
    }
    println!();

    Ok(())
}
