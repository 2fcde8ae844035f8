//! Workflow definitions: ordered steps plus a retry budget.
//!
//! A `WorkflowDefinition` is assembled by the caller (directly or through
//! [`WorkflowBuilder`]) and borrowed immutably by the engine for the whole
//! execution. Step numbers must be unique and contiguous from zero; they,
//! not the order of the `steps` vector, define execution order.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use stepwise_types::config::EngineConfig;
use stepwise_types::workflow::{StepResult, WorkflowId};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::context::ExecutionContext;
use super::step::{FnStep, StepHandler, StepHandlerDyn};

/// Errors that can occur while validating or preparing a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Structural problem with the definition (no steps, bad numbering).
    #[error("invalid workflow definition: {0}")]
    InvalidWorkflowDefinition(String),

    /// Execution state could not be serialized or parsed.
    #[error("state serialization error: {0}")]
    StateSerialization(String),
}

// ---------------------------------------------------------------------------
// StepDefinition
// ---------------------------------------------------------------------------

/// One numbered step and the handler that executes it.
#[derive(Clone)]
pub struct StepDefinition {
    pub step_number: u32,
    pub name: String,
    handler: Arc<dyn StepHandlerDyn>,
}

impl StepDefinition {
    pub fn new<H: StepHandler + 'static>(
        step_number: u32,
        name: impl Into<String>,
        handler: H,
    ) -> Self {
        Self {
            step_number,
            name: name.into(),
            handler: Arc::new(handler),
        }
    }

    /// Build a step from a closure; see [`FnStep`].
    pub fn from_fn<F, Fut>(step_number: u32, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ExecutionContext, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        Self::new(step_number, name, FnStep::new(f))
    }

    /// Run one attempt of this step.
    pub async fn execute(&self, ctx: &ExecutionContext, cancel: &CancellationToken) -> StepResult {
        self.handler.execute_boxed(ctx, cancel).await
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("step_number", &self.step_number)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// Ordered, immutable description of a workflow.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    /// Generated by the engine when absent.
    pub workflow_id: Option<WorkflowId>,
    pub name: String,
    pub steps: Vec<StepDefinition>,
    /// Additional attempts allowed for a failing step (total = this + 1).
    pub max_retry_per_step: u32,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>, max_retry_per_step: u32) -> Self {
        Self {
            workflow_id: None,
            name: name.into(),
            steps,
            max_retry_per_step,
        }
    }

    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    /// Check the structural invariants: at least one step, and step numbers
    /// that are unique and cover `0..N-1` exactly.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidWorkflowDefinition(
                "workflow must have at least one step".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.step_number) {
                return Err(WorkflowError::InvalidWorkflowDefinition(format!(
                    "duplicate step number {} ('{}')",
                    step.step_number, step.name
                )));
            }
        }

        let count = self.steps.len() as u32;
        if let Some(step) = self.steps.iter().find(|s| s.step_number >= count) {
            return Err(WorkflowError::InvalidWorkflowDefinition(format!(
                "step numbers must be contiguous from 0 to {}, found {} ('{}')",
                count - 1,
                step.step_number,
                step.name
            )));
        }

        Ok(())
    }

    /// Steps in execution order (ascending step number).
    pub fn ordered_steps(&self) -> Vec<&StepDefinition> {
        let mut steps: Vec<&StepDefinition> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.step_number);
        steps
    }
}

// ---------------------------------------------------------------------------
// WorkflowBuilder
// ---------------------------------------------------------------------------

/// Fluent builder that numbers steps in insertion order.
pub struct WorkflowBuilder {
    workflow_id: Option<WorkflowId>,
    name: String,
    steps: Vec<StepDefinition>,
    max_retry_per_step: u32,
}

impl WorkflowBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            workflow_id: None,
            name: name.into(),
            steps: Vec::new(),
            max_retry_per_step: EngineConfig::default().default_max_retry_per_step,
        }
    }

    pub fn workflow_id(mut self, id: impl Into<WorkflowId>) -> Self {
        self.workflow_id = Some(id.into());
        self
    }

    pub fn max_retry_per_step(mut self, retries: u32) -> Self {
        self.max_retry_per_step = retries;
        self
    }

    /// Take the retry budget from engine configuration.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.max_retry_per_step = config.default_max_retry_per_step;
        self
    }

    pub fn step<H: StepHandler + 'static>(mut self, name: impl Into<String>, handler: H) -> Self {
        let number = self.steps.len() as u32;
        self.steps.push(StepDefinition::new(number, name, handler));
        self
    }

    pub fn step_fn<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ExecutionContext, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        let number = self.steps.len() as u32;
        self.steps.push(StepDefinition::from_fn(number, name, f));
        self
    }

    pub fn build(self) -> WorkflowDefinition {
        WorkflowDefinition {
            workflow_id: self.workflow_id,
            name: self.name,
            steps: self.steps,
            max_retry_per_step: self.max_retry_per_step,
        }
    }
}
