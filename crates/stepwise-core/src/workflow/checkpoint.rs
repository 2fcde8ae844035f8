//! Durable checkpoint manager for workflow execution state.
//!
//! Wraps a `CheckpointStore` to provide the higher-level operations the
//! engine needs: recording a step's terminal outcome together with a
//! snapshot of the execution state, and the recovery helpers an external
//! resumption mechanism uses to rebuild that state.

use std::collections::HashMap;

use serde_json::Value;
use stepwise_types::workflow::{CheckpointStatus, ExecutionCheckpoint, WorkflowId};
use uuid::Uuid;

use crate::repository::checkpoint::CheckpointStore;

use super::context::ExecutionContext;
use super::definition::StepDefinition;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Manages durable execution checkpoints for workflow runs.
///
/// Generic over `S: CheckpointStore` so it works with any storage backend.
/// The engine persists each checkpoint before moving on to the next step.
pub struct CheckpointManager<S: CheckpointStore> {
    store: S,
}

impl<S: CheckpointStore> CheckpointManager<S> {
    /// Create a new checkpoint manager backed by the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Record a step's terminal outcome with the current state snapshot.
    pub async fn record_step(
        &self,
        workflow_id: &WorkflowId,
        step: &StepDefinition,
        status: CheckpointStatus,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionCheckpoint, CheckpointError> {
        let state_json = ctx
            .snapshot_json()
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let checkpoint = ExecutionCheckpoint::new(
            workflow_id.clone(),
            step.step_number,
            step.name.clone(),
            status,
            state_json,
        );

        let saved = self
            .store
            .save_checkpoint(checkpoint)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(
            workflow_id = %workflow_id,
            step_number = step.step_number,
            status = %status,
            checkpoint_id = ?saved.checkpoint_id,
            "checkpointed step"
        );

        Ok(saved)
    }

    /// Remove every checkpoint of a workflow. Returns how many were removed.
    pub async fn purge(&self, workflow_id: &WorkflowId) -> Result<u64, CheckpointError> {
        let removed = self
            .store
            .purge_workflow_checkpoints(workflow_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;

        tracing::debug!(workflow_id = %workflow_id, removed, "purged workflow checkpoints");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get(
        &self,
        workflow_id: &WorkflowId,
        checkpoint_id: &Uuid,
    ) -> Result<Option<ExecutionCheckpoint>, CheckpointError> {
        self.store
            .get_checkpoint(workflow_id, checkpoint_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    pub async fn latest(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<ExecutionCheckpoint>, CheckpointError> {
        self.store
            .get_latest_checkpoint(workflow_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    pub async fn list(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<ExecutionCheckpoint>, CheckpointError> {
        self.store
            .get_workflow_checkpoints(workflow_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    pub async fn total(&self) -> Result<u64, CheckpointError> {
        self.store
            .total_checkpoints()
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Recovery helpers
    // -----------------------------------------------------------------------

    /// Rebuild the execution state captured at the last completed step.
    pub async fn restore_state(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<HashMap<String, Value>, CheckpointError> {
        let checkpoint = self
            .last_completed(workflow_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(workflow_id.clone()))?;

        ExecutionContext::state_from_json(&checkpoint.state_json)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))
    }

    /// Rebuild an execution context seeded with the last completed state.
    pub async fn restore_context(
        &self,
        workflow_id: &WorkflowId,
        workflow_name: &str,
    ) -> Result<ExecutionContext, CheckpointError> {
        let state = self.restore_state(workflow_id).await?;
        Ok(ExecutionContext::with_state(
            workflow_id.clone(),
            workflow_name,
            state,
        ))
    }

    /// Step number an external resumption should start from: one past the
    /// last completed step, or 0 when nothing has completed.
    pub async fn resume_point(&self, workflow_id: &WorkflowId) -> Result<u32, CheckpointError> {
        Ok(self
            .last_completed(workflow_id)
            .await?
            .map_or(0, |cp| cp.step_number + 1))
    }

    async fn last_completed(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<ExecutionCheckpoint>, CheckpointError> {
        let checkpoints = self.list(workflow_id).await?;
        Ok(checkpoints
            .into_iter()
            .rev()
            .find(|cp| cp.status == CheckpointStatus::Completed))
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying store operation failed.
    #[error("checkpoint store error: {0}")]
    Repository(String),

    /// No completed checkpoint exists for the workflow (restore operations).
    #[error("no completed checkpoint for workflow: {0}")]
    NotFound(WorkflowId),

    /// State snapshot could not be serialized or parsed.
    #[error("checkpoint state error: {0}")]
    Serialization(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
