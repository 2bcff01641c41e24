//! Backend

use crate::storage::StorageBackend;
use crate::task::Task;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage backend, mostly useful for tests and for restoring
/// a queue within the same process.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl MemoryBackend {
    /// Create a new in-memory storage backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether nothing is stored
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn save(&self, task: &Task) -> crate::Result<()> {
        self.tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load(&self, task_id: &str) -> crate::Result<Task> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| crate::TaskQueueError::TaskNotFound(task_id.to_string()))
    }

    async fn delete(&self, task_id: &str) -> crate::Result<()> {
        self.tasks
            .write()
            .await
            .remove(task_id)
            .ok_or_else(|| crate::TaskQueueError::TaskNotFound(task_id.to_string()))?;
        Ok(())
    }

    async fn list(&self) -> crate::Result<Vec<Task>> {
        Ok(self.tasks.read().await.values().cloned().collect())
    }

    async fn health_check(&self) -> bool {
        true
    }
}
