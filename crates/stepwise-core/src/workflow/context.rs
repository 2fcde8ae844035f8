//! Execution context: the mutable, cumulative state of one workflow run.
//!
//! `ExecutionContext` is created fresh for each execution and owned by it.
//! Steps receive a shared reference; only the engine mutates it, by merging
//! a successful step's `state_updates`. Snapshots serialize the state with
//! sorted keys so identical state always yields identical `state_json`.

use std::collections::{BTreeMap, HashMap};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepwise_types::workflow::WorkflowId;

use super::definition::WorkflowError;

/// Mutable state shared across the steps of a single workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    workflow_id: WorkflowId,
    workflow_name: String,
    state: HashMap<String, Value>,
}

impl ExecutionContext {
    /// Create an empty context for a run.
    pub fn new(workflow_id: WorkflowId, workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_id,
            workflow_name: workflow_name.into(),
            state: HashMap::new(),
        }
    }

    /// Create a context seeded with previously captured state.
    pub fn with_state(
        workflow_id: WorkflowId,
        workflow_name: impl Into<String>,
        state: HashMap<String, Value>,
    ) -> Self {
        Self {
            workflow_id,
            workflow_name: workflow_name.into(),
            state,
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    pub fn state(&self) -> &HashMap<String, Value> {
        &self.state
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Get a value and deserialize it into `T`. `None` if missing or mistyped.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.state
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }

    /// Merge updates into the state. Keys present in both are overwritten.
    pub fn merge(&mut self, updates: HashMap<String, Value>) {
        self.state.extend(updates);
    }

    /// Serialize the current state as a JSON object with sorted keys.
    pub fn snapshot_json(&self) -> Result<String, WorkflowError> {
        let sorted: BTreeMap<&String, &Value> = self.state.iter().collect();
        serde_json::to_string(&sorted)
            .map_err(|e| WorkflowError::StateSerialization(e.to_string()))
    }

    /// Parse a `state_json` snapshot back into a state map.
    pub fn state_from_json(json: &str) -> Result<HashMap<String, Value>, WorkflowError> {
        serde_json::from_str(json).map_err(|e| WorkflowError::StateSerialization(e.to_string()))
    }
}
