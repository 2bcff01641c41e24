/// In-memory backend
pub mod backend;
/// JSON file backend
pub mod file;

pub use backend::MemoryBackend;
pub use file::FileBackend;

use crate::task::Task;
use async_trait::async_trait;

/// Trait for storage backend implementations.
///
/// The queue writes through a single background writer, so calls for the
/// same task never race each other.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert or replace a task
    async fn save(&self, task: &Task) -> crate::Result<()>;

    /// Load a task from storage by ID
    async fn load(&self, task_id: &str) -> crate::Result<Task>;

    /// Delete a task from storage
    async fn delete(&self, task_id: &str) -> crate::Result<()>;

    /// List all tasks in storage
    async fn list(&self) -> crate::Result<Vec<Task>>;

    /// Check if storage is healthy
    async fn health_check(&self) -> bool;
}
