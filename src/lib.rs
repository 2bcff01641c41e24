//! Admin Task Queue - asynchronous task queue for long running admin operations
//!
//! Operations such as image pushes, model pulls, remote commands and file
//! transfers are submitted as typed tasks, executed by registered handlers
//! under a concurrency ceiling, and tracked through a uniform lifecycle with
//! progress, retries, pause/resume and cancellation.

/// Configuration management for the task queue
pub mod config;
/// Handler trait, registry and execution context
pub mod handler;
/// Built-in handlers
pub mod handlers;
/// Typed submission façade
pub mod manager;
/// Scheduler, admission and queries
pub mod queue;
/// Storage backend implementations
pub mod storage;
/// Task definitions and execution logic
pub mod task;

pub use config::Config;
pub use handler::{handler_fn, HandlerRegistry, TaskContext, TaskHandler};
pub use manager::QueueManager;
pub use queue::{QueueStats, RetentionPolicy, TaskFilter, TaskQueue, TaskSelection};
pub use task::{ErrorCode, Params, Priority, Task, TaskError, TaskRequest, TaskStatus, TaskSummary};

use thiserror::Error;

/// Result type for task queue operations
pub type Result<T> = std::result::Result<T, TaskQueueError>;

/// Error types for the task queue system
#[derive(Error, Debug)]
pub enum TaskQueueError {
    /// Task with the specified ID was not found
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Operation not allowed from the task's current status
    #[error("Cannot {operation} task {task_id} in status {status}")]
    InvalidState {
        /// Task the operation targeted
        task_id: String,
        /// Status the task was in
        status: TaskStatus,
        /// Operation that was refused, e.g. `pause`
        operation: &'static str,
    },

    /// Submission rejected by the handler's param validation
    #[error("Invalid parameters for {task_type}: {message}")]
    Validation {
        /// Type of the rejected submission
        task_type: String,
        /// Validation failure reported by the handler
        message: String,
    },

    /// No handler registered for the task type
    #[error("No handler registered for task type: {0}")]
    HandlerNotFound(String),

    /// Queue already holds the maximum number of unfinished tasks
    #[error("Queue is full ({0} tasks)")]
    QueueFull(usize),

    /// Queue no longer accepts work
    #[error("Queue is shutting down")]
    ShuttingDown,

    /// Task did not finish within the wait timeout
    #[error("Timed out waiting for task {0}")]
    WaitTimeout(String),

    /// Running tasks did not drain before the shutdown deadline
    #[error("Shutdown timed out with {0} tasks still running")]
    ShutdownTimeout(usize),

    /// Storage backend error occurred
    #[error("Storage error: {0}")]
    StorageError(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl TaskQueueError {
    /// Error code reported to command callers
    pub fn code(&self) -> ErrorCode {
        match self {
            TaskQueueError::TaskNotFound(_) => ErrorCode::QueueTaskNotFound,
            TaskQueueError::InvalidState { .. } => ErrorCode::InvalidState,
            TaskQueueError::Validation { .. } => ErrorCode::ValidationError,
            TaskQueueError::HandlerNotFound(_) => ErrorCode::HandlerNotFound,
            TaskQueueError::QueueFull(_) => ErrorCode::ResourceError,
            TaskQueueError::ShuttingDown => ErrorCode::ResourceError,
            TaskQueueError::WaitTimeout(_) | TaskQueueError::ShutdownTimeout(_) => {
                ErrorCode::SystemTimeout
            }
            TaskQueueError::SerializationError(_) => ErrorCode::ValidationError,
            TaskQueueError::StorageError(_)
            | TaskQueueError::Io(_)
            | TaskQueueError::ConfigError(_) => ErrorCode::UnknownError,
        }
    }
}
