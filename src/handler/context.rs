//! Context

use crate::task::{ErrorCode, Params, TaskError, TaskStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Update written back into the task by a running execution unit
#[derive(Debug, Clone)]
pub(crate) enum ExecutionUpdate {
    /// Lifecycle stage reached before the handler body runs
    Stage(TaskStatus),
    /// Progress percentage and/or step description
    Progress {
        percent: Option<u8>,
        step: Option<String>,
    },
    /// Free-form task log line
    Log(String),
}

/// Write channel from an execution unit into the queue.
///
/// Updates from a unit that no longer owns the task (paused, cancelled,
/// timed out) are dropped and `apply` returns `false`.
#[async_trait]
pub(crate) trait ExecutionSink: Send + Sync {
    async fn apply(&self, task_id: &str, unit: u64, update: ExecutionUpdate) -> bool;
}

/// Sink for contexts that are not attached to a queue
struct DetachedSink;

#[async_trait]
impl ExecutionSink for DetachedSink {
    async fn apply(&self, task_id: &str, _unit: u64, update: ExecutionUpdate) -> bool {
        debug!(task_id, ?update, "detached task update");
        true
    }
}

/// Everything a handler may see or touch while executing one attempt.
///
/// Handlers never get the task itself: params are read-only and progress
/// goes through [`TaskContext::report`].
#[derive(Clone)]
pub struct TaskContext {
    task_id: String,
    task_type: String,
    params: Arc<Params>,
    attempt: u32,
    unit: u64,
    sink: Arc<dyn ExecutionSink>,
    token: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: String,
        task_type: String,
        params: Arc<Params>,
        attempt: u32,
        unit: u64,
        sink: Arc<dyn ExecutionSink>,
        token: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            task_type,
            params,
            attempt,
            unit,
            sink,
            token,
        }
    }

    /// Context not attached to any queue, for invoking a handler directly.
    /// Progress reports are only traced.
    pub fn detached(task_type: impl Into<String>, params: Params) -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            task_type.into(),
            Arc::new(params),
            0,
            0,
            Arc::new(DetachedSink),
            CancellationToken::new(),
        )
    }

    /// Id of the task being executed
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Type tag of the task being executed
    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    /// Handler input
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Automatic retries already performed before this attempt
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Raw param value
    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }

    /// Required string param
    pub fn str_param(&self, key: &str) -> Result<&str, TaskError> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| TaskError::validation(format!("Parameter '{key}' must be a string")))
    }

    /// Optional string param with a default
    pub fn str_param_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
    }

    /// Optional boolean param with a default
    pub fn bool_param_or(&self, key: &str, default: bool) -> bool {
        self.params
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    /// Optional list of strings; non-string items are rejected
    pub fn str_list_param(&self, key: &str) -> Result<Vec<String>, TaskError> {
        match self.params.get(key) {
            None | Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        TaskError::validation(format!("Parameter '{key}' must be a list of strings"))
                    })
                })
                .collect(),
            Some(_) => Err(TaskError::validation(format!(
                "Parameter '{key}' must be a list of strings"
            ))),
        }
    }

    /// Report progress (0-100) and the current step.
    ///
    /// Returns `false` once this attempt no longer owns the task.
    pub async fn report(&self, percent: u8, step: impl Into<String>) -> bool {
        let update = ExecutionUpdate::Progress {
            percent: Some(percent),
            step: Some(step.into()),
        };
        self.sink.apply(&self.task_id, self.unit, update).await
    }

    /// Change the step description without touching the percentage
    pub async fn step(&self, step: impl Into<String>) -> bool {
        let update = ExecutionUpdate::Progress {
            percent: None,
            step: Some(step.into()),
        };
        self.sink.apply(&self.task_id, self.unit, update).await
    }

    /// Append a line to the task log
    pub async fn log(&self, message: impl Into<String>) -> bool {
        self.sink
            .apply(&self.task_id, self.unit, ExecutionUpdate::Log(message.into()))
            .await
    }

    pub(crate) async fn advance(&self, stage: TaskStatus) -> bool {
        self.sink
            .apply(&self.task_id, self.unit, ExecutionUpdate::Stage(stage))
            .await
    }

    /// Cancellation, pause or timeout has been requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Error out if the attempt should stop; call between handler steps
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.token.is_cancelled() {
            Err(TaskError::new(ErrorCode::Cancelled, "Task execution was interrupted")
                .with_retryable(false))
        } else {
            Ok(())
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Token for handing to transports that support hard abort
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("task_type", &self.task_type)
            .field("attempt", &self.attempt)
            .field("unit", &self.unit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_detached_context_params() {
        let params = json!({"command": "ls", "args": ["-l", "/tmp"], "shell": true})
            .as_object()
            .cloned()
            .unwrap();
        let ctx = TaskContext::detached("custom_command", params);

        assert_eq!(ctx.str_param("command").unwrap(), "ls");
        assert!(ctx.str_param("missing").is_err());
        assert_eq!(ctx.str_param_or("cwd", "."), ".");
        assert!(ctx.bool_param_or("shell", false));
        assert_eq!(ctx.str_list_param("args").unwrap(), vec!["-l", "/tmp"]);
        assert!(ctx.report(10, "starting").await);
    }

    #[test]
    fn test_checkpoint_after_cancel() {
        let ctx = TaskContext::detached("noop", Params::new());
        assert!(ctx.checkpoint().is_ok());

        ctx.token.cancel();
        let err = ctx.checkpoint().unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
        assert!(ctx.cancellation_token().is_cancelled());
    }
}
