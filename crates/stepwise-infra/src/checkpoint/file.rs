//! JSON-lines checkpoint store.
//!
//! Each workflow gets one append-only file, `{dir}/{workflow_id}.jsonl`,
//! holding one serialized [`ExecutionCheckpoint`] per line. Reads fold the
//! lines by step number so a later line for the same step replaces an
//! earlier one. Purging a workflow deletes its file.
//!
//! Directory layout:
//! ```text
//! {dir}/
//!   nightly-report.jsonl
//!   0192f1c4-7b0e-7c3a-9d1e-5f2a8b6c4d3e.jsonl
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use stepwise_core::repository::checkpoint::CheckpointStore;
use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::{ExecutionCheckpoint, WorkflowId};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

const EXTENSION: &str = "jsonl";

/// File-backed implementation of [`CheckpointStore`].
///
/// Workflow ids are used as file names, so only ASCII letters, digits,
/// `.`, `_` and `-` are accepted.
pub struct JsonFileCheckpointStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileCheckpointStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids of every workflow with a checkpoint file, sorted.
    pub async fn workflow_ids(&self) -> Result<Vec<WorkflowId>, RepositoryError> {
        let mut ids: Vec<WorkflowId> = self
            .checkpoint_files()
            .await?
            .into_iter()
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(WorkflowId::from)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn path_for(&self, workflow_id: &WorkflowId) -> Result<PathBuf, RepositoryError> {
        let id = workflow_id.as_str();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

        if !valid {
            return Err(RepositoryError::Conflict(format!(
                "Workflow id '{id}' is not usable as a file name (allowed: A-Z a-z 0-9 . _ -)"
            )));
        }

        Ok(self.dir.join(format!("{id}.{EXTENSION}")))
    }

    async fn checkpoint_files(&self) -> Result<Vec<PathBuf>, RepositoryError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RepositoryError::Query(format!(
                    "Failed to read {}: {e}",
                    self.dir.display()
                )));
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RepositoryError::Query(format!("Failed to list checkpoint files: {e}")))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }

    async fn load(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<BTreeMap<u32, ExecutionCheckpoint>, RepositoryError> {
        let path = self.path_for(workflow_id)?;
        load_file(&path).await
    }
}

/// Fold a checkpoint file into step number -> latest checkpoint.
async fn load_file(path: &Path) -> Result<BTreeMap<u32, ExecutionCheckpoint>, RepositoryError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(RepositoryError::Query(format!(
                "Failed to read {}: {e}",
                path.display()
            )));
        }
    };

    let mut checkpoints = BTreeMap::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let checkpoint: ExecutionCheckpoint = serde_json::from_str(line).map_err(|e| {
            RepositoryError::Serialization(format!(
                "{} line {}: {e}",
                path.display(),
                index + 1
            ))
        })?;
        checkpoints.insert(checkpoint.step_number, checkpoint);
    }
    Ok(checkpoints)
}

/// Distinct step numbers among the lines of a file that still parse.
///
/// Used by purge, which must succeed on a file left torn by a crash.
async fn count_readable_steps(path: &Path) -> u64 {
    let content = match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => return 0,
    };

    let mut steps = BTreeSet::new();
    let mut skipped = 0usize;
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<ExecutionCheckpoint>(line) {
            Ok(checkpoint) => {
                steps.insert(checkpoint.step_number);
            }
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::warn!(path = %path.display(), skipped, "purging checkpoint file with unreadable lines");
    }
    steps.len() as u64
}

impl CheckpointStore for JsonFileCheckpointStore {
    async fn save_checkpoint(
        &self,
        mut checkpoint: ExecutionCheckpoint,
    ) -> Result<ExecutionCheckpoint, RepositoryError> {
        let path = self.path_for(&checkpoint.workflow_id)?;
        checkpoint.checkpoint_id.get_or_insert_with(Uuid::now_v7);

        let mut line = serde_json::to_string(&checkpoint)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| RepositoryError::Query(format!("Failed to create checkpoint dir: {e}")))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| RepositoryError::Query(format!("Failed to open {}: {e}", path.display())))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| RepositoryError::Query(format!("Failed to append checkpoint: {e}")))?;
        file.sync_data()
            .await
            .map_err(|e| RepositoryError::Query(format!("Failed to sync checkpoint file: {e}")))?;

        tracing::trace!(
            path = %path.display(),
            step_number = checkpoint.step_number,
            "appended checkpoint"
        );
        Ok(checkpoint)
    }

    async fn get_checkpoint(
        &self,
        workflow_id: &WorkflowId,
        checkpoint_id: &Uuid,
    ) -> Result<Option<ExecutionCheckpoint>, RepositoryError> {
        Ok(self
            .load(workflow_id)
            .await?
            .into_values()
            .find(|cp| cp.checkpoint_id == Some(*checkpoint_id)))
    }

    async fn get_latest_checkpoint(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<ExecutionCheckpoint>, RepositoryError> {
        Ok(self
            .load(workflow_id)
            .await?
            .pop_last()
            .map(|(_, cp)| cp))
    }

    async fn get_workflow_checkpoints(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<ExecutionCheckpoint>, RepositoryError> {
        Ok(self.load(workflow_id).await?.into_values().collect())
    }

    async fn purge_workflow_checkpoints(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<u64, RepositoryError> {
        let path = self.path_for(workflow_id)?;
        let _guard = self.write_lock.lock().await;

        let removed = count_readable_steps(&path).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(removed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(RepositoryError::Query(format!(
                "Failed to remove {}: {e}",
                path.display()
            ))),
        }
    }

    async fn total_checkpoints(&self) -> Result<u64, RepositoryError> {
        let mut total = 0u64;
        for path in self.checkpoint_files().await? {
            total += load_file(&path).await?.len() as u64;
        }
        Ok(total)
    }
}
