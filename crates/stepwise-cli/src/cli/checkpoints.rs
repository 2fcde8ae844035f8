//! CLI checkpoint inspection subcommands.
//!
//! Reads the JSON-lines checkpoint files written by `stepwise run`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use stepwise_core::repository::checkpoint::CheckpointStore;
use stepwise_infra::checkpoint::JsonFileCheckpointStore;
use stepwise_types::workflow::{CheckpointStatus, ExecutionCheckpoint, WorkflowId};

/// Checkpoint subcommands.
#[derive(Subcommand)]
pub enum CheckpointCommand {
    /// List every checkpoint of a workflow in step order.
    #[command(alias = "ls")]
    List {
        /// Workflow id.
        workflow_id: String,
    },

    /// Show the checkpoint with the highest step number.
    Latest {
        /// Workflow id.
        workflow_id: String,
    },

    /// Delete all checkpoints of a workflow.
    Purge {
        /// Workflow id.
        workflow_id: String,
    },
}

/// Where checkpoint files live inside the state directory.
pub fn checkpoint_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("checkpoints")
}

/// Handle a checkpoint subcommand.
pub async fn handle_checkpoint_command(
    cmd: CheckpointCommand,
    state_dir: &Path,
    json: bool,
) -> Result<()> {
    let store = JsonFileCheckpointStore::new(checkpoint_dir(state_dir));

    match cmd {
        CheckpointCommand::List { workflow_id } => {
            handle_list(&store, &WorkflowId::new(workflow_id), json).await
        }
        CheckpointCommand::Latest { workflow_id } => {
            handle_latest(&store, &WorkflowId::new(workflow_id), json).await
        }
        CheckpointCommand::Purge { workflow_id } => {
            handle_purge(&store, &WorkflowId::new(workflow_id), json).await
        }
    }
}

// ---------------------------------------------------------------------------
// List / Latest
// ---------------------------------------------------------------------------

async fn handle_list(
    store: &impl CheckpointStore,
    workflow_id: &WorkflowId,
    json: bool,
) -> Result<()> {
    let checkpoints = store
        .get_workflow_checkpoints(workflow_id)
        .await
        .with_context(|| format!("Failed to read checkpoints for '{workflow_id}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoints)?);
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!();
        println!("  No checkpoints for '{}'.", style(workflow_id).cyan());
        println!();
        return Ok(());
    }

    println!();
    println!("{}", checkpoint_table(&checkpoints));
    println!();
    Ok(())
}

async fn handle_latest(
    store: &impl CheckpointStore,
    workflow_id: &WorkflowId,
    json: bool,
) -> Result<()> {
    let latest = store
        .get_latest_checkpoint(workflow_id)
        .await
        .with_context(|| format!("Failed to read checkpoints for '{workflow_id}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&latest)?);
        return Ok(());
    }

    println!();
    match latest {
        Some(cp) => {
            println!("  Workflow:   {}", style(&cp.workflow_id).cyan());
            println!("  Step:       {} ({})", cp.step_number, cp.step_name);
            println!("  Status:     {}", status_style(cp.status));
            println!("  Checkpoint: {}", short_id(&cp));
            println!("  Saved at:   {}", cp.timestamp.format("%Y-%m-%d %H:%M:%S"));
            println!("  State:      {}", cp.state_json);
        }
        None => println!("  No checkpoints for '{}'.", style(workflow_id).cyan()),
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Purge / Count
// ---------------------------------------------------------------------------

async fn handle_purge(
    store: &impl CheckpointStore,
    workflow_id: &WorkflowId,
    json: bool,
) -> Result<()> {
    let removed = store
        .purge_workflow_checkpoints(workflow_id)
        .await
        .with_context(|| format!("Failed to purge checkpoints for '{workflow_id}'"))?;

    if json {
        let out = serde_json::json!({
            "workflow_id": workflow_id,
            "removed": removed,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Removed {} checkpoint(s) for '{}'",
            style("*").green().bold(),
            removed,
            style(workflow_id).cyan()
        );
        println!();
    }
    Ok(())
}

/// Handle `stepwise count`.
pub async fn handle_count(state_dir: &Path, json: bool) -> Result<()> {
    let store = JsonFileCheckpointStore::new(checkpoint_dir(state_dir));

    let total = store
        .total_checkpoints()
        .await
        .context("Failed to count checkpoints")?;
    let mut per_workflow = Vec::new();
    for id in store.workflow_ids().await? {
        let count = store.get_workflow_checkpoints(&id).await?.len();
        per_workflow.push((id, count));
    }

    if json {
        let workflows: Vec<serde_json::Value> = per_workflow
            .iter()
            .map(|(id, count)| serde_json::json!({ "workflow_id": id, "checkpoints": count }))
            .collect();
        let out = serde_json::json!({ "total": total, "workflows": workflows });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  Total checkpoints: {}", style(total).bold());
    if !per_workflow.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Workflow").fg(Color::Cyan),
                Cell::new("Checkpoints"),
            ]);
        for (id, count) in &per_workflow {
            table.add_row(vec![Cell::new(id), Cell::new(count)]);
        }
        println!();
        println!("{table}");
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn checkpoint_table(checkpoints: &[ExecutionCheckpoint]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Status"),
            Cell::new("Checkpoint"),
            Cell::new("Saved"),
            Cell::new("State"),
        ]);

    for cp in checkpoints {
        table.add_row(vec![
            Cell::new(cp.step_number),
            Cell::new(&cp.step_name),
            format_status(cp.status),
            Cell::new(short_id(cp)),
            Cell::new(cp.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(&cp.state_json),
        ]);
    }
    table
}

pub(crate) fn format_status(status: CheckpointStatus) -> Cell {
    match status {
        CheckpointStatus::Pending => Cell::new("pending").fg(Color::Yellow),
        CheckpointStatus::Running => Cell::new("running").fg(Color::Blue),
        CheckpointStatus::Completed => Cell::new("completed").fg(Color::Green),
        CheckpointStatus::Failed => Cell::new("failed").fg(Color::Red),
    }
}

fn status_style(status: CheckpointStatus) -> console::StyledObject<CheckpointStatus> {
    match status {
        CheckpointStatus::Completed => style(status).green(),
        CheckpointStatus::Failed => style(status).red(),
        CheckpointStatus::Pending | CheckpointStatus::Running => style(status).yellow(),
    }
}

fn short_id(cp: &ExecutionCheckpoint) -> String {
    cp.checkpoint_id
        .map(|id| id.to_string().chars().take(8).collect())
        .unwrap_or_else(|| "-".to_string())
}
