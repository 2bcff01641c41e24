/// Error codes and handler failures
pub mod error;
/// Task executor implementation
pub mod executor;
/// Well-known task types
pub mod kinds;
/// Serializable task views
pub mod summary;

pub use error::{ErrorCode, TaskError};
pub use summary::TaskSummary;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;
use uuid::Uuid;

/// Handler input: ordered string keys to arbitrary JSON values
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Maximum number of lines kept in a task's log
pub const MAX_LOG_LINES: usize = 500;

/// Ordering hint among pending tasks, higher executes first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    /// Background work
    pub const LOW: Priority = Priority(-10);
    /// Default priority
    pub const NORMAL: Priority = Priority(0);
    /// Interactive requests
    pub const HIGH: Priority = Priority(10);
    /// Jumps ahead of everything else
    pub const CRITICAL: Priority = Priority(100);
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Priority(value)
    }
}

/// Status of a task in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the pending queue
    Pending,
    /// Handler is checking params
    Validating,
    /// Handler is about to start
    Preparing,
    /// Handler is executing
    Running,
    /// Held out of the pending queue until resumed
    Paused,
    /// Handler returned a result
    Completed,
    /// Handler failed and will not be retried automatically
    Failed,
    /// Cancelled by request
    Cancelled,
    /// Execution deadline exceeded and retries exhausted
    Timeout,
}

impl TaskStatus {
    /// Every status, in lifecycle order
    pub const ALL: [TaskStatus; 9] = [
        TaskStatus::Pending,
        TaskStatus::Validating,
        TaskStatus::Preparing,
        TaskStatus::Running,
        TaskStatus::Paused,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Timeout,
    ];

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Validating => "validating",
            TaskStatus::Preparing => "preparing",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Timeout => "timeout",
        }
    }

    /// Human readable description
    pub fn description(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Task is waiting in queue",
            TaskStatus::Validating => "Validating task parameters",
            TaskStatus::Preparing => "Preparing task execution",
            TaskStatus::Running => "Task is currently executing",
            TaskStatus::Paused => "Task execution is paused",
            TaskStatus::Completed => "Task completed successfully",
            TaskStatus::Failed => "Task failed with error",
            TaskStatus::Cancelled => "Task was cancelled",
            TaskStatus::Timeout => "Task execution timed out",
        }
    }

    /// No automatic transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }

    /// The task occupies an execution slot
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Validating | TaskStatus::Preparing | TaskStatus::Running
        )
    }

    /// Whether the state machine allows moving to `next`.
    ///
    /// `Failed`/`Timeout` -> `Pending` is only taken by an explicit manual retry.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        match (*self, next) {
            (Pending, Validating | Paused | Cancelled) => true,
            (Validating, Preparing) | (Preparing, Running) => true,
            (Validating | Preparing | Running, Completed) => *self == Running,
            (Validating | Preparing | Running, Failed | Cancelled | Paused | Timeout | Pending) => {
                true
            }
            (Paused, Pending | Cancelled) => true,
            (Failed | Timeout, Pending) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a task owned by the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: String,

    /// Type tag used to look up the handler
    pub task_type: String,

    /// Handler input
    pub params: Params,

    /// Current status of the task
    pub status: TaskStatus,

    /// Grouping label for filtering
    pub category: String,

    /// Free-form labels for filtering
    pub tags: BTreeSet<String>,

    /// Admission priority
    pub priority: Priority,

    /// Completion percentage, 0-100
    pub progress: u8,

    /// Description of the current sub-stage
    pub current_step: String,

    /// Task creation timestamp
    pub created_at: DateTime<Utc>,

    /// Task last updated timestamp
    pub updated_at: DateTime<Utc>,

    /// Start of the current (or last) attempt
    pub started_at: Option<DateTime<Utc>>,

    /// Time the task reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Handler output on success
    pub result: Option<serde_json::Value>,

    /// Error message on failure
    pub error: Option<String>,

    /// Classified error code on failure
    pub error_code: Option<ErrorCode>,

    /// Structured failure details
    pub error_details: Option<serde_json::Value>,

    /// Timestamped activity log
    pub logs: Vec<String>,

    /// Automatic retries performed
    pub retry_count: u32,

    /// Automatic retries allowed
    pub max_retries: u32,

    /// Explicit retries requested after a terminal failure
    pub manual_retries: u32,

    /// Execution deadline per attempt
    pub timeout_seconds: Option<u64>,
}

impl Task {
    /// Create a pending task of the given type
    pub fn new(task_type: impl Into<String>, params: Params) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            params,
            status: TaskStatus::Pending,
            category: "general".to_string(),
            tags: BTreeSet::new(),
            priority: Priority::default(),
            progress: 0,
            current_step: String::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            error_code: None,
            error_details: None,
            logs: Vec::new(),
            retry_count: 0,
            max_retries: 3,
            manual_retries: 0,
            timeout_seconds: None,
        }
    }

    /// Check whether the task carries `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// A manual retry is available
    pub fn can_retry(&self) -> bool {
        matches!(self.status, TaskStatus::Failed | TaskStatus::Timeout)
    }

    /// Automatic retry budget left
    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Time spent executing.
    ///
    /// `completed_at - started_at` once finished, time since start while
    /// active, `None` otherwise.
    pub fn get_duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        match self.completed_at {
            Some(completed) => Some(completed - started),
            None if self.status.is_active() => Some(Utc::now() - started),
            None => None,
        }
    }

    /// Duration in fractional seconds
    pub fn duration_seconds(&self) -> Option<f64> {
        self.get_duration()
            .map(|d| d.num_milliseconds() as f64 / 1000.0)
    }

    /// Get task age in seconds
    pub fn age_seconds(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }

    /// Serializable summary view
    pub fn summary(&self) -> TaskSummary {
        TaskSummary::from(self)
    }

    pub(crate) fn add_log(&mut self, message: impl AsRef<str>) {
        let timestamp = Utc::now().format("%H:%M:%S");
        self.logs.push(format!("[{timestamp}] {}", message.as_ref()));
        if self.logs.len() > MAX_LOG_LINES {
            let overflow = self.logs.len() - MAX_LOG_LINES;
            self.logs.drain(..overflow);
        }
    }

    /// Move to `next`, refusing moves the lifecycle does not allow
    fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                task_id = %self.id,
                "Rejected status change {} -> {}",
                self.status,
                next
            );
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    fn clear_outcome(&mut self) {
        self.result = None;
        self.error = None;
        self.error_code = None;
        self.error_details = None;
    }

    fn reset_attempt(&mut self) {
        self.clear_outcome();
        self.progress = 0;
        self.current_step.clear();
        self.started_at = None;
        self.completed_at = None;
    }

    /// Admitted to an execution slot
    pub(crate) fn mark_validating(&mut self) {
        if !self.transition(TaskStatus::Validating) {
            return;
        }
        self.started_at = Some(Utc::now());
        self.current_step = "Validating parameters".to_string();
        self.add_log(format!("Task started: {}", self.task_type));
    }

    pub(crate) fn mark_preparing(&mut self) {
        if !self.transition(TaskStatus::Preparing) {
            return;
        }
        self.current_step = "Preparing execution".to_string();
    }

    pub(crate) fn mark_running(&mut self) {
        if !self.transition(TaskStatus::Running) {
            return;
        }
        self.current_step = "Executing".to_string();
    }

    /// Record handler progress. Progress never decreases within an attempt.
    pub(crate) fn update_progress(&mut self, progress: u8, step: Option<&str>) {
        self.progress = self.progress.max(progress.min(100));
        self.updated_at = Utc::now();
        if let Some(step) = step.filter(|s| !s.is_empty()) {
            self.current_step = step.to_string();
            let line = format!("Progress: {}% - {}", self.progress, step);
            self.add_log(line);
        }
    }

    pub(crate) fn complete(&mut self, result: serde_json::Value) {
        if !self.transition(TaskStatus::Completed) {
            return;
        }
        self.completed_at = Some(Utc::now());
        self.progress = 100;
        self.clear_outcome();
        self.result = Some(result);
        self.add_log("Task completed successfully");
    }

    pub(crate) fn fail(&mut self, error: &TaskError) {
        if !self.transition(TaskStatus::Failed) {
            return;
        }
        self.record_error(error);
        self.add_log(format!(
            "Task failed: {} (Code: {})",
            error.message, error.code
        ));
    }

    pub(crate) fn time_out(&mut self, error: &TaskError) {
        if !self.transition(TaskStatus::Timeout) {
            return;
        }
        self.record_error(error);
        self.add_log("Task timed out");
    }

    pub(crate) fn cancel(&mut self, reason: &str) {
        if !self.transition(TaskStatus::Cancelled) {
            return;
        }
        let error = TaskError::new(ErrorCode::Cancelled, reason);
        self.record_error(&error);
        self.add_log(format!("Task cancelled: {reason}"));
    }

    pub(crate) fn pause(&mut self) {
        if !self.transition(TaskStatus::Paused) {
            return;
        }
        self.add_log(format!("Task paused at {}%", self.progress));
    }

    /// Back to pending after a pause; progress is kept.
    pub(crate) fn resume(&mut self) {
        if !self.transition(TaskStatus::Pending) {
            return;
        }
        self.add_log("Task resumed");
    }

    /// Automatic retry after a retryable failure
    pub(crate) fn schedule_retry(&mut self, error: &TaskError) {
        if !self.transition(TaskStatus::Pending) {
            return;
        }
        self.retry_count += 1;
        self.reset_attempt();
        self.add_log(format!(
            "Retry attempt {}/{} after: {}",
            self.retry_count, self.max_retries, error
        ));
    }

    /// Explicit retry of a terminal failure; `retry_count` is left untouched.
    pub(crate) fn manual_retry(&mut self) {
        if !self.transition(TaskStatus::Pending) {
            return;
        }
        self.manual_retries += 1;
        self.reset_attempt();
        self.add_log(format!("Manual retry #{}", self.manual_retries));
    }

    /// Requeue an attempt interrupted by a process restart
    pub(crate) fn restart(&mut self) {
        self.status = TaskStatus::Pending;
        self.updated_at = Utc::now();
        self.reset_attempt();
        self.add_log("Task requeued after restart");
    }

    fn record_error(&mut self, error: &TaskError) {
        let now = Utc::now();
        self.completed_at = Some(now);
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.result = None;
        self.error = Some(error.message.clone());
        self.error_code = Some(error.code.clone());
        self.error_details = error.details.clone();
    }
}

/// Description of a task to submit.
///
/// Unset optional fields fall back to the queue configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Type tag used to look up the handler
    pub task_type: String,
    /// Handler input
    pub params: Params,
    /// Grouping label
    pub category: Option<String>,
    /// Filter labels
    pub tags: BTreeSet<String>,
    /// Admission priority
    pub priority: Priority,
    /// Automatic retries allowed
    pub max_retries: Option<u32>,
    /// Execution deadline per attempt
    pub timeout_seconds: Option<u64>,
}

impl TaskRequest {
    /// Create a request for the given task type
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            ..Default::default()
        }
    }

    /// Replace all params
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Set a single param
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set the category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Set the priority of the task
    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Set the maximum retry attempts (chainable)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the per-attempt execution deadline
    pub fn with_timeout_secs(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    pub(crate) fn into_task(self, default_max_retries: u32, default_timeout: Option<u64>) -> Task {
        let mut task = Task::new(self.task_type, self.params);
        if let Some(category) = self.category {
            task.category = category;
        }
        task.tags = self.tags;
        task.priority = self.priority;
        task.max_retries = self.max_retries.unwrap_or(default_max_retries);
        task.timeout_seconds = self.timeout_seconds.or(default_timeout);
        task
    }
}
