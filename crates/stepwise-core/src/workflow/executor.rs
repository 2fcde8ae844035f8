//! Workflow executor: sequential step execution with retry and durable checkpointing.
//!
//! The `WorkflowEngine` walks a definition's steps in ascending step-number
//! order. Each step is attempted until it succeeds or its retry budget is
//! spent; its terminal outcome is checkpointed before the next step starts.
//!
//! # Execution flow
//!
//! 1. Validate the definition and resolve (or generate) the workflow id.
//! 2. Mark the workflow `Running` in the status registry.
//! 3. For each step: attempt -> retry on `success == false` -> merge state
//!    updates on success -> checkpoint `Completed` or `Failed`.
//! 4. Stop at the first terminal failure; otherwise report the last output.
//! 5. Record the final status (completed, failed, or cancelled).
//!
//! Step business failures are reported inside `WorkflowExecutionResult`.
//! Cancellation, invalid definitions, and checkpoint persistence failures
//! are returned as `ExecutorError`.

use std::future::Future;

use serde_json::Value;
use stepwise_types::config::EngineConfig;
use stepwise_types::workflow::{
    CheckpointStatus, StepResult, WorkflowExecutionResult, WorkflowId, WorkflowState,
    WorkflowStatus,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::repository::checkpoint::CheckpointStore;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::ExecutionContext;
use super::definition::{StepDefinition, WorkflowDefinition, WorkflowError};
use super::retry::RetryPolicy;
use super::status::{RunGuard, StatusRegistry};

// ---------------------------------------------------------------------------
// WorkflowExecutor trait
// ---------------------------------------------------------------------------

/// Trait for workflow execution engines.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for async methods,
/// consistent with the project's Rust 2024 edition approach.
pub trait WorkflowExecutor: Send + Sync {
    /// Execute a workflow definition from its first step.
    fn execute(
        &self,
        definition: &WorkflowDefinition,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<WorkflowExecutionResult, ExecutorError>> + Send;

    /// Last recorded status of a workflow (`NotStarted` if unknown).
    fn status(&self, workflow_id: &WorkflowId) -> impl Future<Output = WorkflowStatus> + Send;
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Sequential workflow engine with per-step retry and durable checkpointing.
///
/// Generic over `S: CheckpointStore` for storage flexibility. Apart from its
/// status registry the engine holds no per-run state, so one instance can
/// serve concurrent executions of different workflow ids.
pub struct WorkflowEngine<S: CheckpointStore> {
    checkpoints: CheckpointManager<S>,
    statuses: StatusRegistry,
    config: EngineConfig,
}

impl<S: CheckpointStore> WorkflowEngine<S> {
    /// Create an engine with default configuration (immediate retries).
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self {
            checkpoints: CheckpointManager::new(store),
            statuses: StatusRegistry::new(),
            config,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointManager<S> {
        &self.checkpoints
    }

    /// Every status recorded by this engine, most recently updated first.
    pub fn list_statuses(&self) -> Vec<WorkflowStatus> {
        self.statuses.list()
    }

    /// Run all steps in order, stopping at the first terminal failure.
    async fn run_steps(
        &self,
        workflow_id: &WorkflowId,
        definition: &WorkflowDefinition,
        cancel: &CancellationToken,
    ) -> Result<WorkflowExecutionResult, ExecutorError> {
        let steps = definition.ordered_steps();
        let total_steps = steps.len() as u32;
        let policy = RetryPolicy::from_config(definition.max_retry_per_step, &self.config);

        let mut ctx = ExecutionContext::new(workflow_id.clone(), definition.name.clone());
        let mut checkpoints = Vec::with_capacity(steps.len());
        let mut completed_steps = 0u32;
        let mut final_output = Value::Null;

        for step in steps {
            let (result, attempts) = self
                .run_with_retry(workflow_id, step, &ctx, &policy, cancel, completed_steps)
                .await?;

            if !result.success {
                let error_message = result.error_message.unwrap_or_else(|| {
                    format!("step {} ('{}') failed", step.step_number, step.name)
                });

                tracing::warn!(
                    step_number = step.step_number,
                    step = step.name.as_str(),
                    attempts,
                    error = error_message.as_str(),
                    "step failed, retries exhausted"
                );

                let checkpoint = self
                    .checkpoints
                    .record_step(workflow_id, step, CheckpointStatus::Failed, &ctx)
                    .await?;
                checkpoints.push(checkpoint);

                return Ok(WorkflowExecutionResult {
                    workflow_id: workflow_id.clone(),
                    success: false,
                    completed_steps,
                    failed_steps: 1,
                    total_steps,
                    final_output: Value::Null,
                    error_message: Some(error_message),
                    checkpoints,
                });
            }

            ctx.merge(result.state_updates);
            let checkpoint = self
                .checkpoints
                .record_step(workflow_id, step, CheckpointStatus::Completed, &ctx)
                .await?;
            checkpoints.push(checkpoint);

            completed_steps += 1;
            self.statuses.advance(workflow_id, completed_steps);
            final_output = result.output;

            tracing::debug!(
                step_number = step.step_number,
                step = step.name.as_str(),
                attempts,
                "step completed"
            );
        }

        Ok(WorkflowExecutionResult {
            workflow_id: workflow_id.clone(),
            success: true,
            completed_steps,
            failed_steps: 0,
            total_steps,
            final_output,
            error_message: None,
            checkpoints,
        })
    }

    /// Attempt a step until it succeeds or the retry budget is spent.
    ///
    /// Returns the terminal result and the number of attempts made. The
    /// cancellation token is raced against every attempt and every backoff
    /// wait; once it fires the in-flight attempt is dropped.
    async fn run_with_retry(
        &self,
        workflow_id: &WorkflowId,
        step: &StepDefinition,
        ctx: &ExecutionContext,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        completed_steps: u32,
    ) -> Result<(StepResult, u32), ExecutorError> {
        let mut attempt = 1u32;

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(workflow_id, step, completed_steps));
            }

            tracing::debug!(
                step_number = step.step_number,
                step = step.name.as_str(),
                attempt,
                "executing step"
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(cancelled(workflow_id, step, completed_steps));
                }
                result = step.execute(ctx, cancel) => result,
            };

            if result.success || !policy.should_retry(attempt) {
                return Ok((result, attempt));
            }

            tracing::warn!(
                step_number = step.step_number,
                step = step.name.as_str(),
                attempt,
                max_attempts = policy.max_attempts(),
                error = result.error_message.as_deref().unwrap_or("no error message"),
                "step attempt failed, retrying"
            );

            let delay = policy.delay_for(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(cancelled(workflow_id, step, completed_steps));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            attempt += 1;
        }
    }

    /// Translate an execution outcome into the final registry entry.
    fn record_outcome(
        &self,
        workflow_id: &WorkflowId,
        outcome: &Result<WorkflowExecutionResult, ExecutorError>,
    ) {
        match outcome {
            Ok(result) if result.success => {
                tracing::info!(
                    workflow_id = %workflow_id,
                    completed_steps = result.completed_steps,
                    "workflow completed"
                );
                self.statuses
                    .finish(workflow_id, WorkflowState::Completed, None);
            }
            Ok(result) => {
                tracing::warn!(
                    workflow_id = %workflow_id,
                    completed_steps = result.completed_steps,
                    error = result.error_message.as_deref().unwrap_or_default(),
                    "workflow failed"
                );
                self.statuses.finish(
                    workflow_id,
                    WorkflowState::Failed,
                    result.error_message.clone(),
                );
            }
            Err(ExecutorError::Cancelled { completed_steps, .. }) => {
                tracing::info!(
                    workflow_id = %workflow_id,
                    completed_steps,
                    "workflow cancelled"
                );
                self.statuses
                    .finish(workflow_id, WorkflowState::Cancelled, None);
            }
            Err(e) => {
                tracing::error!(workflow_id = %workflow_id, error = %e, "workflow aborted");
                self.statuses
                    .finish(workflow_id, WorkflowState::Failed, Some(e.to_string()));
            }
        }
    }
}

fn cancelled(
    workflow_id: &WorkflowId,
    step: &StepDefinition,
    completed_steps: u32,
) -> ExecutorError {
    tracing::debug!(
        step_number = step.step_number,
        step = step.name.as_str(),
        "cancellation observed, abandoning step"
    );
    ExecutorError::Cancelled {
        workflow_id: workflow_id.clone(),
        completed_steps,
    }
}

impl<S: CheckpointStore> WorkflowExecutor for WorkflowEngine<S> {
    async fn execute(
        &self,
        definition: &WorkflowDefinition,
        cancel: &CancellationToken,
    ) -> Result<WorkflowExecutionResult, ExecutorError> {
        definition.validate()?;

        let workflow_id = definition
            .workflow_id
            .clone()
            .unwrap_or_else(WorkflowId::generate);
        let total_steps = definition.steps.len() as u32;

        if !self.statuses.begin(&workflow_id, &definition.name, total_steps) {
            return Err(ExecutorError::AlreadyRunning(workflow_id));
        }
        let guard = RunGuard::new(&self.statuses, workflow_id.clone());

        let span = tracing::info_span!(
            "workflow",
            workflow_id = %workflow_id,
            name = definition.name.as_str()
        );

        let outcome = async {
            tracing::info!(
                total_steps,
                max_retry_per_step = definition.max_retry_per_step,
                "starting workflow execution"
            );
            self.run_steps(&workflow_id, definition, cancel).await
        }
        .instrument(span)
        .await;

        self.record_outcome(&workflow_id, &outcome);
        guard.disarm();
        outcome
    }

    async fn status(&self, workflow_id: &WorkflowId) -> WorkflowStatus {
        self.statuses.get(workflow_id)
    }
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors that can occur during workflow execution.
///
/// A step returning `success == false` is not an error; it ends up in
/// `WorkflowExecutionResult::error_message`.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Definition rejected before any step ran.
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Checkpoint persistence error.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// The cancellation token fired; checkpoints already written remain.
    #[error("workflow '{workflow_id}' cancelled after {completed_steps} completed steps")]
    Cancelled {
        workflow_id: WorkflowId,
        completed_steps: u32,
    },

    /// An execution with the same workflow id is still in flight.
    #[error("workflow '{0}' is already running")]
    AlreadyRunning(WorkflowId),
}

impl ExecutorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutorError::Cancelled { .. })
    }

    pub fn is_invalid_definition(&self) -> bool {
        matches!(
            self,
            ExecutorError::Workflow(WorkflowError::InvalidWorkflowDefinition(_))
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;
    use stepwise_types::error::RepositoryError;
    use stepwise_types::workflow::ExecutionCheckpoint;
    use uuid::Uuid;

    use super::super::step::StepHandler;

    // --- Test store ---

    /// Map-backed store that counts saves and can be told to reject them.
    #[derive(Default)]
    struct MockStore {
        checkpoints: Mutex<HashMap<(WorkflowId, u32), ExecutionCheckpoint>>,
        saves: AtomicUsize,
        reject_saves: bool,
    }

    impl MockStore {
        fn rejecting() -> Self {
            Self {
                reject_saves: true,
                ..Self::default()
            }
        }
    }

    impl CheckpointStore for MockStore {
        async fn save_checkpoint(
            &self,
            mut checkpoint: ExecutionCheckpoint,
        ) -> Result<ExecutionCheckpoint, RepositoryError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.reject_saves {
                return Err(RepositoryError::Connection);
            }
            checkpoint.checkpoint_id.get_or_insert_with(Uuid::now_v7);
            self.checkpoints.lock().unwrap().insert(
                (checkpoint.workflow_id.clone(), checkpoint.step_number),
                checkpoint.clone(),
            );
            Ok(checkpoint)
        }

        async fn get_checkpoint(
            &self,
            workflow_id: &WorkflowId,
            checkpoint_id: &Uuid,
        ) -> Result<Option<ExecutionCheckpoint>, RepositoryError> {
            Ok(self
                .get_workflow_checkpoints(workflow_id)
                .await?
                .into_iter()
                .find(|cp| cp.checkpoint_id == Some(*checkpoint_id)))
        }

        async fn get_latest_checkpoint(
            &self,
            workflow_id: &WorkflowId,
        ) -> Result<Option<ExecutionCheckpoint>, RepositoryError> {
            Ok(self.get_workflow_checkpoints(workflow_id).await?.pop())
        }

        async fn get_workflow_checkpoints(
            &self,
            workflow_id: &WorkflowId,
        ) -> Result<Vec<ExecutionCheckpoint>, RepositoryError> {
            let mut found: Vec<ExecutionCheckpoint> = self
                .checkpoints
                .lock()
                .unwrap()
                .values()
                .filter(|cp| &cp.workflow_id == workflow_id)
                .cloned()
                .collect();
            found.sort_by_key(|cp| cp.step_number);
            Ok(found)
        }

        async fn purge_workflow_checkpoints(
            &self,
            workflow_id: &WorkflowId,
        ) -> Result<u64, RepositoryError> {
            let mut guard = self.checkpoints.lock().unwrap();
            let before = guard.len();
            guard.retain(|(wf, _), _| wf != workflow_id);
            Ok((before - guard.len()) as u64)
        }

        async fn total_checkpoints(&self) -> Result<u64, RepositoryError> {
            Ok(self.checkpoints.lock().unwrap().len() as u64)
        }
    }

    // --- Test steps ---

    /// Fails its first `failures` attempts, then succeeds. Counts every call.
    struct FlakyStep {
        calls: Arc<AtomicU32>,
        failures: u32,
    }

    impl StepHandler for FlakyStep {
        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _cancel: &CancellationToken,
        ) -> StepResult {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                StepResult::failed(format!("attempt {attempt} failed"))
            } else {
                StepResult::ok(json!({ "attempt": attempt }))
            }
        }
    }


    fn always_ok(steps: u32, name: &str) -> WorkflowDefinition {
        (0..steps)
            .fold(WorkflowDefinition::builder(name), |builder, n| {
                builder.step_fn(format!("step-{n}"), move |_ctx, _cancel| async move {
                    StepResult::ok(json!(n))
                })
            })
            .build()
    }

    // --- Success path ---

    #[tokio::test]
    async fn all_steps_succeed_with_ordered_completed_checkpoints() {
        let engine = WorkflowEngine::new(MockStore::default());
        let def = always_ok(5, "CheckpointTest");

        let result = engine.execute(&def, &CancellationToken::new()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.completed_steps, 5);
        assert_eq!(result.failed_steps, 0);
        assert_eq!(result.total_steps, 5);
        assert_eq!(result.final_output, json!(4));
        assert!(result.error_message.is_none());
        assert_eq!(result.checkpoints.len(), 5);
        for (i, cp) in result.checkpoints.iter().enumerate() {
            assert_eq!(cp.step_number, i as u32);
            assert_eq!(cp.status, CheckpointStatus::Completed);
            assert!(cp.checkpoint_id.is_some());
        }

        let stored = engine.checkpoints().list(&result.workflow_id).await.unwrap();
        assert_eq!(stored, result.checkpoints);
    }

    #[tokio::test]
    async fn state_updates_are_visible_to_later_steps() {
        let def = WorkflowDefinition::builder("propagation")
            .step_fn("fetch", |_ctx, _cancel| async {
                StepResult::ok("fetched").with_update("customer", "acme").with_update("count", 1)
            })
            .step_fn("enrich", |ctx: ExecutionContext, _cancel| async move {
                let customer = ctx.get_as::<String>("customer").unwrap_or_default();
                let count = ctx.get_as::<u32>("count").unwrap_or_default();
                StepResult::ok(format!("{customer}:{count}")).with_update("count", count + 1)
            })
            .step_fn("report", |ctx: ExecutionContext, _cancel| async move {
                StepResult::ok(ctx.get("count").cloned().unwrap_or_default())
            })
            .build();

        let engine = WorkflowEngine::new(MockStore::default());
        let result = engine.execute(&def, &CancellationToken::new()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.final_output, json!(2));
        assert_eq!(
            result.checkpoints[0].state_json,
            r#"{"count":1,"customer":"acme"}"#
        );
        assert_eq!(
            result.checkpoints[1].state_json,
            r#"{"count":2,"customer":"acme"}"#
        );
    }

    #[tokio::test]
    async fn steps_run_in_step_number_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let make = |n: u32| {
            let order = Arc::clone(&order);
            StepDefinition::from_fn(n, format!("s{n}"), move |_ctx, _cancel| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().unwrap().push(n);
                    StepResult::ok(n)
                }
            })
        };
        let def = WorkflowDefinition::new("shuffled", vec![make(2), make(0), make(1)], 0);

        let engine = WorkflowEngine::new(MockStore::default());
        let result = engine.execute(&def, &CancellationToken::new()).await.unwrap();

        assert!(result.success);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(result.final_output, json!(2));
    }

    // --- Failure and retry ---

    #[tokio::test]
    async fn failing_step_stops_the_pipeline() {
        let later_calls = Arc::new(AtomicU32::new(0));
        let later = Arc::clone(&later_calls);

        let def = WorkflowDefinition::builder("fail-stop")
            .max_retry_per_step(1)
            .step_fn("a", |_ctx, _cancel| async { StepResult::ok(1).with_update("a", true) })
            .step_fn("b", |_ctx, _cancel| async { StepResult::ok(2) })
            .step_fn("c", |_ctx, _cancel| async { StepResult::failed("quota exceeded") })
            .step_fn("d", move |_ctx, _cancel| {
                let later = Arc::clone(&later);
                async move {
                    later.fetch_add(1, Ordering::SeqCst);
                    StepResult::ok(4)
                }
            })
            .build();

        let engine = WorkflowEngine::new(MockStore::default());
        let result = engine.execute(&def, &CancellationToken::new()).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.completed_steps, 2);
        assert_eq!(result.failed_steps, 1);
        assert_eq!(result.total_steps, 4);
        assert_eq!(result.error_message.as_deref(), Some("quota exceeded"));
        assert_eq!(result.final_output, Value::Null);
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);

        let failed = result.latest_checkpoint().unwrap();
        assert_eq!(failed.step_number, 2);
        assert_eq!(failed.status, CheckpointStatus::Failed);
        assert_eq!(failed.state_json, r#"{"a":true}"#);

        let status = engine.status(&result.workflow_id).await;
        assert_eq!(status.state, WorkflowState::Failed);
        assert_eq!(status.completed_steps, 2);
        assert_eq!(status.error.as_deref(), Some("quota exceeded"));
    }

    #[tokio::test]
    async fn retry_then_succeed() {
        let calls = Arc::new(AtomicU32::new(0));
        let def = WorkflowDefinition::builder("retry")
            .max_retry_per_step(2)
            .step(
                "flaky",
                FlakyStep {
                    calls: Arc::clone(&calls),
                    failures: 2,
                },
            )
            .build();

        let engine = WorkflowEngine::new(MockStore::default());
        let result = engine.execute(&def, &CancellationToken::new()).await.unwrap();

        assert!(result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.final_output, json!({ "attempt": 3 }));
        assert_eq!(result.checkpoints.len(), 1);
        assert_eq!(result.checkpoints[0].status, CheckpointStatus::Completed);
    }

    #[tokio::test]
    async fn retry_exhaustion_reports_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let def = WorkflowDefinition::builder("exhaust")
            .max_retry_per_step(3)
            .step(
                "always-broken",
                FlakyStep {
                    calls: Arc::clone(&calls),
                    failures: u32::MAX,
                },
            )
            .build();

        let engine = WorkflowEngine::new(MockStore::default());
        let result = engine.execute(&def, &CancellationToken::new()).await.unwrap();

        assert!(!result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.error_message.as_deref(), Some("attempt 4 failed"));
        assert_eq!(result.completed_steps, 0);
        assert_eq!(result.checkpoints.len(), 1);
        assert_eq!(result.checkpoints[0].status, CheckpointStatus::Failed);
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let def = WorkflowDefinition::builder("no-retry")
            .max_retry_per_step(0)
            .step(
                "once",
                FlakyStep {
                    calls: Arc::clone(&calls),
                    failures: 1,
                },
            )
            .build();

        let engine = WorkflowEngine::new(MockStore::default());
        let result = engine.execute(&def, &CancellationToken::new()).await.unwrap();

        assert!(!result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_without_message_gets_a_default() {
        let def = WorkflowDefinition::builder("silent")
            .max_retry_per_step(0)
            .step_fn("mute", |_ctx, _cancel| async {
                StepResult {
                    success: false,
                    ..StepResult::default()
                }
            })
            .build();

        let engine = WorkflowEngine::new(MockStore::default());
        let result = engine.execute(&def, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.error_message.as_deref(), Some("step 0 ('mute') failed"));
    }

    #[tokio::test]
    async fn configured_backoff_delays_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let def = WorkflowDefinition::builder("backoff")
            .max_retry_per_step(2)
            .step(
                "flaky",
                FlakyStep {
                    calls: Arc::clone(&calls),
                    failures: 2,
                },
            )
            .build();

        let config = EngineConfig {
            retry_backoff_ms: 20,
            ..EngineConfig::default()
        };
        let engine = WorkflowEngine::with_config(MockStore::default(), config);

        let started = std::time::Instant::now();
        let result = engine.execute(&def, &CancellationToken::new()).await.unwrap();

        assert!(result.success);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    // --- Cancellation ---

    #[tokio::test]
    async fn cancellation_before_start_runs_nothing() {
        let calls = Arc::new(AtomicU32::new(0));
        let def = WorkflowDefinition::builder("pre-cancelled")
            .step(
                "never",
                FlakyStep {
                    calls: Arc::clone(&calls),
                    failures: 0,
                },
            )
            .build();

        let store = Arc::new(MockStore::default());
        let engine = WorkflowEngine::new(Arc::clone(&store));
        let token = CancellationToken::new();
        token.cancel();

        let err = engine.execute(&def, &token).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_during_step_stops_without_checkpoint() {
        let later_calls = Arc::new(AtomicU32::new(0));
        let later = Arc::clone(&later_calls);

        let def = WorkflowDefinition::builder("cancel-mid")
            .workflow_id("wf-cancel-mid")
            .step_fn("first", |_ctx, _cancel| async { StepResult::ok(1) })
            .step_fn("blocking", |_ctx, cancel: CancellationToken| async move {
                cancel.cancelled().await;
                StepResult::ok("too late")
            })
            .step_fn("after", move |_ctx, _cancel| {
                let later = Arc::clone(&later);
                async move {
                    later.fetch_add(1, Ordering::SeqCst);
                    StepResult::ok(3)
                }
            })
            .build();

        let engine = WorkflowEngine::new(MockStore::default());
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = engine.execute(&def, &token).await.unwrap_err();

        match err {
            ExecutorError::Cancelled {
                workflow_id,
                completed_steps,
            } => {
                assert_eq!(workflow_id.as_str(), "wf-cancel-mid");
                assert_eq!(completed_steps, 1);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);

        let wf = WorkflowId::new("wf-cancel-mid");
        let stored = engine.checkpoints().list(&wf).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].step_number, 0);
        assert_eq!(engine.status(&wf).await.state, WorkflowState::Cancelled);
    }

    #[tokio::test]
    async fn step_that_cancels_prevents_next_step() {
        let later_calls = Arc::new(AtomicU32::new(0));
        let later = Arc::clone(&later_calls);

        let def = WorkflowDefinition::builder("self-cancel")
            .step_fn("abort", |_ctx, cancel: CancellationToken| async move {
                cancel.cancel();
                StepResult::ok("stopping")
            })
            .step_fn("after", move |_ctx, _cancel| {
                let later = Arc::clone(&later);
                async move {
                    later.fetch_add(1, Ordering::SeqCst);
                    StepResult::ok(2)
                }
            })
            .build();

        let engine = WorkflowEngine::new(MockStore::default());
        let err = engine
            .execute(&def, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff_wait() {
        let def = WorkflowDefinition::builder("cancel-backoff")
            .max_retry_per_step(5)
            .step_fn("broken", |_ctx, _cancel| async { StepResult::failed("down") })
            .build();

        let config = EngineConfig {
            retry_backoff_ms: 60_000,
            ..EngineConfig::default()
        };
        let engine = WorkflowEngine::with_config(MockStore::default(), config);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let outcome =
            tokio::time::timeout(Duration::from_secs(5), engine.execute(&def, &token)).await;
        let err = outcome.expect("backoff wait was not interrupted").unwrap_err();
        assert!(err.is_cancelled());
    }

    // --- Validation and persistence errors ---

    #[tokio::test]
    async fn empty_definition_fails_without_touching_store() {
        let store = Arc::new(MockStore::default());
        let engine = WorkflowEngine::new(Arc::clone(&store));
        let def = WorkflowDefinition::new("empty", vec![], 3);

        let err = engine
            .execute(&def, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_invalid_definition());
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
        assert!(engine.list_statuses().is_empty());
    }

    #[tokio::test]
    async fn checkpoint_write_failure_propagates() {
        let engine = WorkflowEngine::new(MockStore::rejecting());
        let def = always_ok(3, "doomed");

        let err = engine
            .execute(&def, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutorError::Checkpoint(CheckpointError::Repository(_))));
        let statuses = engine.list_statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, WorkflowState::Failed);
        assert!(statuses[0].error.as_deref().unwrap().contains("checkpoint"));
    }

    // --- Identity and status ---

    #[tokio::test]
    async fn missing_workflow_id_is_generated() {
        let engine = WorkflowEngine::new(MockStore::default());
        let def = always_ok(1, "anonymous");
        assert!(def.workflow_id.is_none());

        let result = engine.execute(&def, &CancellationToken::new()).await.unwrap();

        assert!(!result.workflow_id.as_str().is_empty());
        let status = engine.status(&result.workflow_id).await;
        assert_eq!(status.state, WorkflowState::Completed);
        assert_eq!(status.completed_steps, 1);
        assert_eq!(status.total_steps, 1);
    }

    #[tokio::test]
    async fn unknown_workflow_status_is_not_started() {
        let engine = WorkflowEngine::new(MockStore::default());
        let status = engine.status(&WorkflowId::new("never-ran")).await;
        assert_eq!(status.state, WorkflowState::NotStarted);
    }

    #[tokio::test]
    async fn same_workflow_id_cannot_run_twice_concurrently() {
        let engine = Arc::new(WorkflowEngine::new(MockStore::default()));
        let def = WorkflowDefinition::builder("exclusive")
            .workflow_id("wf-exclusive")
            .step_fn("wait", |_ctx, cancel: CancellationToken| async move {
                cancel.cancelled().await;
                StepResult::ok(())
            })
            .build();
        let wf = WorkflowId::new("wf-exclusive");

        let token = CancellationToken::new();
        let first = {
            let engine = Arc::clone(&engine);
            let def = def.clone();
            let token = token.clone();
            tokio::spawn(async move { engine.execute(&def, &token).await })
        };

        while engine.status(&wf).await.state != WorkflowState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = engine
            .execute(&def, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::AlreadyRunning(_)));

        token.cancel();
        assert!(first.await.unwrap().unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn dropped_execution_does_not_block_the_id() {
        let engine = WorkflowEngine::new(MockStore::default());
        let stalled = WorkflowDefinition::builder("stalled")
            .workflow_id("wf-drop")
            .step_fn("hang", |_ctx, _cancel| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                StepResult::ok(())
            })
            .build();
        let wf = WorkflowId::new("wf-drop");

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            engine.execute(&stalled, &CancellationToken::new()),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(engine.status(&wf).await.state, WorkflowState::Cancelled);

        let quick = WorkflowDefinition::builder("stalled")
            .workflow_id("wf-drop")
            .step_fn("done", |_ctx, _cancel| async { StepResult::ok(1) })
            .build();
        let result = engine.execute(&quick, &CancellationToken::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(engine.status(&wf).await.state, WorkflowState::Completed);
    }

    #[tokio::test]
    async fn concurrent_workflows_keep_checkpoints_apart() {
        let engine = Arc::new(WorkflowEngine::new(MockStore::default()));

        let mut handles = Vec::new();
        for name in ["alpha", "beta", "gamma"] {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                let def = WorkflowDefinition::builder(name)
                    .workflow_id(format!("wf-{name}"))
                    .step_fn("tag", move |_ctx, _cancel| async move {
                        StepResult::ok(name).with_update("owner", name)
                    })
                    .step_fn("wait", |_ctx, _cancel| async {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        StepResult::ok(())
                    })
                    .build();
                engine.execute(&def, &CancellationToken::new()).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().success);
        }

        for name in ["alpha", "beta", "gamma"] {
            let wf = WorkflowId::new(format!("wf-{name}"));
            let stored = engine.checkpoints().list(&wf).await.unwrap();
            assert_eq!(stored.len(), 2);
            assert!(stored.iter().all(|cp| cp.workflow_id == wf));
            assert!(stored[1].state_json.contains(name));
        }
        assert_eq!(engine.checkpoints().total().await.unwrap(), 6);
    }

    #[test]
    fn executor_error_display() {
        let err = ExecutorError::Cancelled {
            workflow_id: WorkflowId::new("wf-9"),
            completed_steps: 2,
        };
        assert!(err.to_string().contains("wf-9"));
        assert!(err.to_string().contains("cancelled"));

        let err = ExecutorError::from(WorkflowError::InvalidWorkflowDefinition(
            "workflow must have at least one step".to_string(),
        ));
        assert!(err.is_invalid_definition());
        assert!(err.to_string().contains("at least one step"));
    }
}
