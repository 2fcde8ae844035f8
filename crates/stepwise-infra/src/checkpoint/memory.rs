//! In-memory checkpoint store.
//!
//! Checkpoints are partitioned by workflow id in a `DashMap`, and each
//! partition is a `BTreeMap` keyed by step number. Writers on different
//! workflows only contend on shard locks, and per-workflow queries come back
//! ordered without sorting.
//!
//! An optional write-through callback bridges saves to an external durable
//! log, either before or after the local write.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use stepwise_core::repository::checkpoint::CheckpointStore;
use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::{ExecutionCheckpoint, WorkflowId};
use uuid::Uuid;

/// Async callback invoked with every saved checkpoint.
pub type WriteThroughFn = Arc<
    dyn Fn(ExecutionCheckpoint) -> BoxFuture<'static, Result<(), RepositoryError>> + Send + Sync,
>;

/// When the write-through callback runs relative to the local write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteThroughOrder {
    /// Callback first; a callback error leaves the local store untouched.
    BeforeLocal,
    /// Local write first; a callback error is still returned to the caller.
    AfterLocal,
}

/// Thread-safe, process-local implementation of [`CheckpointStore`].
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    workflows: DashMap<WorkflowId, BTreeMap<u32, ExecutionCheckpoint>>,
    total: AtomicU64,
    write_through: Option<(WriteThroughOrder, WriteThroughFn)>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that forwards every saved checkpoint to `callback`.
    pub fn with_write_through<F, Fut>(order: WriteThroughOrder, callback: F) -> Self
    where
        F: Fn(ExecutionCheckpoint) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RepositoryError>> + Send + 'static,
    {
        let callback: WriteThroughFn = Arc::new(
            move |checkpoint: ExecutionCheckpoint| -> BoxFuture<'static, Result<(), RepositoryError>> {
                Box::pin(callback(checkpoint))
            },
        );

        Self {
            write_through: Some((order, callback)),
            ..Self::default()
        }
    }

    fn store_local(&self, checkpoint: ExecutionCheckpoint) {
        let mut partition = self
            .workflows
            .entry(checkpoint.workflow_id.clone())
            .or_default();

        // Counted under the shard lock so a concurrent purge of this
        // workflow always subtracts after the add.
        if partition
            .insert(checkpoint.step_number, checkpoint)
            .is_none()
        {
            self.total.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn forward(
        &self,
        order: WriteThroughOrder,
        checkpoint: &ExecutionCheckpoint,
    ) -> Result<(), RepositoryError> {
        match &self.write_through {
            Some((configured, callback)) if *configured == order => {
                callback(checkpoint.clone()).await.inspect_err(|e| {
                    tracing::warn!(
                        workflow_id = %checkpoint.workflow_id,
                        step_number = checkpoint.step_number,
                        error = %e,
                        "checkpoint write-through failed"
                    );
                })
            }
            _ => Ok(()),
        }
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    async fn save_checkpoint(
        &self,
        mut checkpoint: ExecutionCheckpoint,
    ) -> Result<ExecutionCheckpoint, RepositoryError> {
        checkpoint.checkpoint_id.get_or_insert_with(Uuid::now_v7);

        self.forward(WriteThroughOrder::BeforeLocal, &checkpoint).await?;
        self.store_local(checkpoint.clone());
        self.forward(WriteThroughOrder::AfterLocal, &checkpoint).await?;

        Ok(checkpoint)
    }

    async fn get_checkpoint(
        &self,
        workflow_id: &WorkflowId,
        checkpoint_id: &Uuid,
    ) -> Result<Option<ExecutionCheckpoint>, RepositoryError> {
        Ok(self.workflows.get(workflow_id).and_then(|checkpoints| {
            checkpoints
                .values()
                .find(|cp| cp.checkpoint_id == Some(*checkpoint_id))
                .cloned()
        }))
    }

    async fn get_latest_checkpoint(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<ExecutionCheckpoint>, RepositoryError> {
        Ok(self
            .workflows
            .get(workflow_id)
            .and_then(|checkpoints| checkpoints.last_key_value().map(|(_, cp)| cp.clone())))
    }

    async fn get_workflow_checkpoints(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<ExecutionCheckpoint>, RepositoryError> {
        Ok(self
            .workflows
            .get(workflow_id)
            .map(|checkpoints| checkpoints.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn purge_workflow_checkpoints(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<u64, RepositoryError> {
        let removed = self
            .workflows
            .remove(workflow_id)
            .map_or(0, |(_, checkpoints)| checkpoints.len() as u64);
        self.total.fetch_sub(removed, Ordering::Relaxed);
        Ok(removed)
    }

    async fn total_checkpoints(&self) -> Result<u64, RepositoryError> {
        Ok(self.total.load(Ordering::Relaxed))
    }
}
