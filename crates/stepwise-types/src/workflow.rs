//! Workflow domain types for Stepwise.
//!
//! Everything here is plain data: identifiers, the result a step reports back
//! to the engine, the checkpoint records the engine persists, and the status
//! and result records it hands to callers. The executable parts of a workflow
//! (step handlers, definitions) live in `stepwise-core`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// WorkflowId
// ---------------------------------------------------------------------------

/// Identifier of one workflow execution.
///
/// Callers may supply their own (e.g. `"invoice-2024-07"`); when absent the
/// engine generates a UUIDv7 string so ids sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, time-sortable identifier.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for WorkflowId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// What a single step attempt reports back to the engine.
///
/// A `success == false` result is a business failure, not an error: the
/// engine applies the retry policy to it. `state_updates` are merged into the
/// execution context only when the step succeeds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub state_updates: HashMap<String, Value>,
}

impl StepResult {
    /// A successful attempt producing `output`.
    pub fn ok(output: impl Into<Value>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error_message: None,
            state_updates: HashMap::new(),
        }
    }

    /// A failed attempt with the given error message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error_message: Some(message.into()),
            state_updates: HashMap::new(),
        }
    }

    /// Add a key to merge into the shared state on success.
    pub fn with_update(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.state_updates.insert(key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// Status recorded on an execution checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointStatus::Pending => write!(f, "pending"),
            CheckpointStatus::Running => write!(f, "running"),
            CheckpointStatus::Completed => write!(f, "completed"),
            CheckpointStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(CheckpointStatus::Pending),
            "running" => Ok(CheckpointStatus::Running),
            "completed" => Ok(CheckpointStatus::Completed),
            "failed" => Ok(CheckpointStatus::Failed),
            other => Err(format!("invalid checkpoint status: '{other}'")),
        }
    }
}

/// Durable record of a step's terminal outcome.
///
/// `state_json` is the serialized execution state at that point, which is
/// enough for an external resumption mechanism to rebuild the context at the
/// last completed step. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCheckpoint {
    /// Assigned by the checkpoint store when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<Uuid>,
    pub workflow_id: WorkflowId,
    pub step_number: u32,
    pub step_name: String,
    pub status: CheckpointStatus,
    pub state_json: String,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionCheckpoint {
    /// Build an unsaved checkpoint stamped with the current time.
    pub fn new(
        workflow_id: WorkflowId,
        step_number: u32,
        step_name: impl Into<String>,
        status: CheckpointStatus,
        state_json: impl Into<String>,
    ) -> Self {
        Self {
            checkpoint_id: None,
            workflow_id,
            step_number,
            step_name: step_name.into(),
            status,
            state_json: state_json.into(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of a workflow as seen by status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowState {
    /// Whether the workflow has stopped and will not change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Cancelled
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::NotStarted => write!(f, "not_started"),
            WorkflowState::Running => write!(f, "running"),
            WorkflowState::Completed => write!(f, "completed"),
            WorkflowState::Failed => write!(f, "failed"),
            WorkflowState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Last known status of a workflow, cached by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub workflow_id: WorkflowId,
    pub state: WorkflowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub completed_steps: u32,
    pub total_steps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowStatus {
    /// Status reported for a workflow id the engine has never seen.
    pub fn not_started(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id,
            state: WorkflowState::NotStarted,
            name: None,
            completed_steps: 0,
            total_steps: 0,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

/// Aggregated outcome of one `execute` call that ran to a success or a
/// terminal step failure. Cancellation is reported as an error instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionResult {
    pub workflow_id: WorkflowId,
    pub success: bool,
    pub completed_steps: u32,
    pub failed_steps: u32,
    pub total_steps: u32,
    /// Output of the last step when every step succeeded, `null` otherwise.
    pub final_output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Checkpoints written during this execution, ascending by step number.
    pub checkpoints: Vec<ExecutionCheckpoint>,
}

impl WorkflowExecutionResult {
    pub fn latest_checkpoint(&self) -> Option<&ExecutionCheckpoint> {
        self.checkpoints.last()
    }
}
