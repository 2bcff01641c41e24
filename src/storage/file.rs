//! JSON file backend

use crate::storage::StorageBackend;
use crate::task::Task;
use crate::TaskQueueError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Stores every task in one JSON document.
///
/// The document is rewritten on each change through a temporary file and a
/// rename, so a crash never leaves a half-written file behind.
pub struct FileBackend {
    path: PathBuf,
    tasks: Mutex<BTreeMap<String, Task>>,
}

impl FileBackend {
    /// Open (or create on first write) the document at `path`
    pub async fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        let tasks = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => {
                let tasks: Vec<Task> = serde_json::from_slice(&bytes)?;
                info!("Loaded {} tasks from {}", tasks.len(), path.display());
                tasks.into_iter().map(|t| (t.id.clone(), t)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            tasks: Mutex::new(tasks),
        })
    }

    /// Location of the document
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_all(&self, tasks: &BTreeMap<String, Task>) -> crate::Result<()> {
        let document: Vec<&Task> = tasks.values().collect();
        let bytes = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Wrote {} tasks to {}", tasks.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn save(&self, task: &Task) -> crate::Result<()> {
        let mut tasks = self.tasks.lock().await;
        tasks.insert(task.id.clone(), task.clone());
        self.write_all(&tasks).await
    }

    async fn load(&self, task_id: &str) -> crate::Result<Task> {
        self.tasks
            .lock()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| TaskQueueError::TaskNotFound(task_id.to_string()))
    }

    async fn delete(&self, task_id: &str) -> crate::Result<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.remove(task_id).is_none() {
            return Err(TaskQueueError::TaskNotFound(task_id.to_string()));
        }
        self.write_all(&tasks).await
    }

    async fn list(&self) -> crate::Result<Vec<Task>> {
        Ok(self.tasks.lock().await.values().cloned().collect())
    }

    async fn health_check(&self) -> bool {
        match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => tokio::fs::metadata(parent).await.is_ok(),
            None => true,
        }
    }
}
