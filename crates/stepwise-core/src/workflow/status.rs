//! Thread-safe registry of the last known status of each workflow.

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use stepwise_types::workflow::{WorkflowId, WorkflowState, WorkflowStatus};

/// Workflow id -> status map shared by concurrent executions.
#[derive(Debug, Default)]
pub struct StatusRegistry {
    statuses: DashMap<WorkflowId, WorkflowStatus>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a workflow as running.
    ///
    /// Returns `false` without touching the registry if the workflow is
    /// already running, so one id never has two live executions.
    pub fn begin(&self, workflow_id: &WorkflowId, name: &str, total_steps: u32) -> bool {
        let running = WorkflowStatus {
            workflow_id: workflow_id.clone(),
            state: WorkflowState::Running,
            name: Some(name.to_string()),
            completed_steps: 0,
            total_steps,
            error: None,
            updated_at: Utc::now(),
        };

        match self.statuses.entry(workflow_id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().state == WorkflowState::Running {
                    return false;
                }
                entry.insert(running);
            }
            Entry::Vacant(entry) => {
                entry.insert(running);
            }
        }
        true
    }

    /// Record that another step of a running workflow completed.
    pub fn advance(&self, workflow_id: &WorkflowId, completed_steps: u32) {
        if let Some(mut status) = self.statuses.get_mut(workflow_id) {
            status.completed_steps = completed_steps;
            status.updated_at = Utc::now();
        }
    }

    /// Record the final state of an execution started with [`begin`](Self::begin).
    pub fn finish(&self, workflow_id: &WorkflowId, state: WorkflowState, error: Option<String>) {
        if let Some(mut status) = self.statuses.get_mut(workflow_id) {
            status.state = state;
            status.error = error;
            status.updated_at = Utc::now();
        }
    }

    /// Last recorded status, or `NotStarted` for an unknown id.
    pub fn get(&self, workflow_id: &WorkflowId) -> WorkflowStatus {
        self.statuses
            .get(workflow_id)
            .map(|s| s.value().clone())
            .unwrap_or_else(|| WorkflowStatus::not_started(workflow_id.clone()))
    }

    /// All recorded statuses, most recently updated first.
    pub fn list(&self) -> Vec<WorkflowStatus> {
        let mut all: Vec<WorkflowStatus> =
            self.statuses.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

}

/// Marks a workflow `Cancelled` when dropped while still armed.
///
/// Held for the lifetime of one execution so that a caller dropping the
/// execution future (timeout, `select!`) does not leave the id `Running`.
#[must_use = "dropping the guard immediately ends the run as cancelled"]
pub struct RunGuard<'a> {
    registry: &'a StatusRegistry,
    workflow_id: WorkflowId,
    armed: bool,
}

impl<'a> RunGuard<'a> {
    pub fn new(registry: &'a StatusRegistry, workflow_id: WorkflowId) -> Self {
        Self {
            registry,
            workflow_id,
            armed: true,
        }
    }

    /// The final status has been recorded elsewhere.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::info!(workflow_id = %self.workflow_id, "execution dropped, marking cancelled");
            self.registry
                .finish(&self.workflow_id, WorkflowState::Cancelled, None);
        }
    }
}
