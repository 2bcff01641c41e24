//! Serializable task views

use super::{ErrorCode, Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Status block of a summary
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    /// Current status
    pub current: TaskStatus,
    /// Human-readable status description
    pub description: &'static str,
    /// Progress percentage
    pub progress: u8,
    /// Step reported last
    pub current_step: String,
}

/// Timing block of a summary
#[derive(Debug, Clone, Serialize)]
pub struct TimingView {
    /// Submission time
    pub created: DateTime<Utc>,
    /// Start of the current attempt
    pub started: Option<DateTime<Utc>>,
    /// Time the task finished
    pub completed: Option<DateTime<Utc>>,
    /// Run time in seconds, if started
    pub duration_seconds: Option<f64>,
}

/// Error block of a summary, present only for failed tasks
#[derive(Debug, Clone, Serialize)]
pub struct ErrorView {
    /// Error message
    pub message: String,
    /// Error code
    pub code: Option<ErrorCode>,
    /// Structured error details
    pub details: Option<serde_json::Value>,
}

/// Retry block of a summary
#[derive(Debug, Clone, Serialize)]
pub struct RetryView {
    /// Automatic retries performed
    pub count: u32,
    /// Automatic retry budget
    pub max: u32,
    /// Manual retries requested
    pub manual: u32,
    /// Whether `retry_task` is allowed now
    pub can_retry: bool,
    /// Whether automatic retries are left
    pub retries_remaining: bool,
}

/// Status report for a single task, as returned to command callers
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    /// Task id
    pub id: String,
    /// Task type
    pub task_type: String,
    /// Task category
    pub category: String,
    /// Status block
    pub status: StatusView,
    /// Timing block
    pub timing: TimingView,
    /// Error block
    pub error: Option<ErrorView>,
    /// Retry block
    pub retry: RetryView,
    /// Handler result, once completed
    pub result: Option<serde_json::Value>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            task_type: task.task_type.clone(),
            category: task.category.clone(),
            status: StatusView {
                current: task.status,
                description: task.status.description(),
                progress: task.progress,
                current_step: task.current_step.clone(),
            },
            timing: TimingView {
                created: task.created_at,
                started: task.started_at,
                completed: task.completed_at,
                duration_seconds: task.duration_seconds(),
            },
            error: task.error.as_ref().map(|message| ErrorView {
                message: message.clone(),
                code: task.error_code.clone(),
                details: task.error_details.clone(),
            }),
            retry: RetryView {
                count: task.retry_count,
                max: task.max_retries,
                manual: task.manual_retries,
                can_retry: task.can_retry(),
                retries_remaining: task.retries_remaining(),
            },
            result: task.result.clone(),
        }
    }
}
