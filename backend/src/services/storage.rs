//! Persistence seam for workflow definitions and finished executions.
//!
//! The engine only talks to `WorkflowStorage`; the storage technology is the
//! caller's choice. `NoopStorage` keeps the engine purely in memory and
//! `JsonFileStorage` writes one JSON document per workflow plus a JSON-lines
//! execution history.

use async_trait::async_trait;
use autoflow_shared::{Execution, Workflow};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait WorkflowStorage: Send + Sync {
    async fn save_workflow(&self, workflow: &Workflow) -> StorageResult<()>;

    async fn load_workflows(&self) -> StorageResult<Vec<Workflow>>;

    async fn delete_workflow_storage(&self, workflow_id: Uuid) -> StorageResult<()>;

    async fn save_execution_history(&self, execution: &Execution) -> StorageResult<()>;
}

/// Storage that persists nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStorage;

#[async_trait]
impl WorkflowStorage for NoopStorage {
    async fn save_workflow(&self, _workflow: &Workflow) -> StorageResult<()> {
        Ok(())
    }

    async fn load_workflows(&self) -> StorageResult<Vec<Workflow>> {
        Ok(Vec::new())
    }

    async fn delete_workflow_storage(&self, _workflow_id: Uuid) -> StorageResult<()> {
        Ok(())
    }

    async fn save_execution_history(&self, _execution: &Execution) -> StorageResult<()> {
        Ok(())
    }
}

const WORKFLOWS_DIR: &str = "workflows";
const HISTORY_FILE: &str = "execution_history.jsonl";

pub struct JsonFileStorage {
    root: PathBuf,
    history_lock: Mutex<()>,
}

impl JsonFileStorage {
    pub async fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(WORKFLOWS_DIR)).await?;

        Ok(Self {
            root,
            history_lock: Mutex::new(()),
        })
    }

    fn workflow_path(&self, workflow_id: Uuid) -> PathBuf {
        self.root.join(WORKFLOWS_DIR).join(format!("{}.json", workflow_id))
    }

    fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    /// Read back every execution appended to the history file.
    pub async fn read_execution_history(&self) -> StorageResult<Vec<Execution>> {
        let raw = match fs::read_to_string(self.history_path()).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StorageError::from))
            .collect()
    }
}

#[async_trait]
impl WorkflowStorage for JsonFileStorage {
    async fn save_workflow(&self, workflow: &Workflow) -> StorageResult<()> {
        let path = self.workflow_path(workflow.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(workflow)?;

        // Write-then-rename so a crash never leaves a truncated definition
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;

        debug!(workflow_id = %workflow.id, path = %path.display(), "workflow saved");
        Ok(())
    }

    async fn load_workflows(&self) -> StorageResult<Vec<Workflow>> {
        let mut workflows = Vec::new();
        let mut entries = fs::read_dir(self.root.join(WORKFLOWS_DIR)).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let raw = fs::read(&path).await?;
            match serde_json::from_slice::<Workflow>(&raw) {
                Ok(workflow) => workflows.push(workflow),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable workflow file"),
            }
        }

        Ok(workflows)
    }

    async fn delete_workflow_storage(&self, workflow_id: Uuid) -> StorageResult<()> {
        match fs::remove_file(self.workflow_path(workflow_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_execution_history(&self, execution: &Execution) -> StorageResult<()> {
        let mut line = serde_json::to_vec(execution)?;
        line.push(b'\n');

        let _guard = self.history_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.history_path())
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(())
    }
}
