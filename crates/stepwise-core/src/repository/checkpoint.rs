//! Checkpoint store trait definition.
//!
//! Defines the storage interface for execution checkpoints. Any durable
//! medium (file, database, object store) can sit behind it; stepwise-infra
//! ships an in-memory reference adapter and a JSON-lines file adapter.

use std::future::Future;
use std::sync::Arc;

use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::{ExecutionCheckpoint, WorkflowId};
use uuid::Uuid;

/// Port for persisting and querying execution checkpoints.
///
/// Checkpoints are partitioned by `WorkflowId`: no operation scoped to one
/// workflow may observe or mutate another workflow's checkpoints, including
/// under concurrent access from unrelated executions.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint, assigning a `checkpoint_id` when absent.
    ///
    /// Returns the checkpoint as stored. A second save for the same
    /// workflow and step number replaces the earlier record.
    fn save_checkpoint(
        &self,
        checkpoint: ExecutionCheckpoint,
    ) -> impl Future<Output = Result<ExecutionCheckpoint, RepositoryError>> + Send;

    /// Get a single checkpoint by id within a workflow.
    fn get_checkpoint(
        &self,
        workflow_id: &WorkflowId,
        checkpoint_id: &Uuid,
    ) -> impl Future<Output = Result<Option<ExecutionCheckpoint>, RepositoryError>> + Send;

    /// Get the checkpoint with the highest step number for a workflow.
    fn get_latest_checkpoint(
        &self,
        workflow_id: &WorkflowId,
    ) -> impl Future<Output = Result<Option<ExecutionCheckpoint>, RepositoryError>> + Send;

    /// List all checkpoints for a workflow, ascending by step number
    /// regardless of insertion order.
    fn get_workflow_checkpoints(
        &self,
        workflow_id: &WorkflowId,
    ) -> impl Future<Output = Result<Vec<ExecutionCheckpoint>, RepositoryError>> + Send;

    /// Remove every checkpoint for a workflow. Returns how many were removed.
    fn purge_workflow_checkpoints(
        &self,
        workflow_id: &WorkflowId,
    ) -> impl Future<Output = Result<u64, RepositoryError>> + Send;

    /// Number of checkpoints currently held across all workflows.
    fn total_checkpoints(&self) -> impl Future<Output = Result<u64, RepositoryError>> + Send;
}

/// Shared handles delegate to the inner store, so a caller can keep querying
/// the same store the engine writes to.
impl<S: CheckpointStore> CheckpointStore for Arc<S> {
    async fn save_checkpoint(
        &self,
        checkpoint: ExecutionCheckpoint,
    ) -> Result<ExecutionCheckpoint, RepositoryError> {
        (**self).save_checkpoint(checkpoint).await
    }

    async fn get_checkpoint(
        &self,
        workflow_id: &WorkflowId,
        checkpoint_id: &Uuid,
    ) -> Result<Option<ExecutionCheckpoint>, RepositoryError> {
        (**self).get_checkpoint(workflow_id, checkpoint_id).await
    }

    async fn get_latest_checkpoint(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<ExecutionCheckpoint>, RepositoryError> {
        (**self).get_latest_checkpoint(workflow_id).await
    }

    async fn get_workflow_checkpoints(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<ExecutionCheckpoint>, RepositoryError> {
        (**self).get_workflow_checkpoints(workflow_id).await
    }

    async fn purge_workflow_checkpoints(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<u64, RepositoryError> {
        (**self).purge_workflow_checkpoints(workflow_id).await
    }

    async fn total_checkpoints(&self) -> Result<u64, RepositoryError> {
        (**self).total_checkpoints().await
    }
}
