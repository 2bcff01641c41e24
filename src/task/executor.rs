//! Executor

use crate::handler::{TaskContext, TaskHandler};
use crate::task::{ErrorCode, Task, TaskError, TaskStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Exponential backoff between automatic retries
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound for any delay
    pub max_delay: Duration,

    /// Multiplier applied per retry
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// Create a policy doubling from `base_delay` up to `max_delay`
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            backoff_factor: 2.0,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// How one attempt ended
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Handler returned a result
    Completed(serde_json::Value),
    /// Handler (or validation) failed
    Failed(TaskError),
    /// The executor's deadline fired first
    TimedOut(TaskError),
    /// The attempt was stopped by pause, cancel or shutdown
    Interrupted,
}

/// What the queue must do after an outcome has been applied
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Task reached a terminal state
    Finished(TaskStatus),
    /// Task is pending again and becomes eligible after the delay
    Retry(Duration),
}

/// Runs single attempts through their handlers and turns outcomes into
/// state transitions.
#[derive(Debug, Clone, Default)]
pub struct TaskExecutor {
    retry_policy: RetryPolicy,
}

impl TaskExecutor {
    /// Create an executor with the given backoff policy
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    /// Backoff policy in use
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Run one attempt.
    ///
    /// The task must already be `Validating`. The handler body runs in its own
    /// Tokio task so a panic is contained and a timeout or cancellation can
    /// abort it at its next await point.
    pub async fn execute(
        &self,
        handler: Option<Arc<dyn TaskHandler>>,
        ctx: TaskContext,
        timeout: Option<Duration>,
    ) -> ExecutionOutcome {
        let Some(handler) = handler else {
            let error = TaskError::new(
                ErrorCode::HandlerNotFound,
                format!("No handler registered for task type '{}'", ctx.task_type()),
            )
            .with_retryable(false);
            return ExecutionOutcome::Failed(error);
        };

        if let Err(err) = handler.validate(ctx.params()) {
            return ExecutionOutcome::Failed(err);
        }

        if !ctx.advance(TaskStatus::Preparing).await || !ctx.advance(TaskStatus::Running).await {
            return ExecutionOutcome::Interrupted;
        }

        let token = ctx.token().clone();
        let task_id = ctx.task_id().to_string();
        let mut join = tokio::spawn(async move { handler.execute(ctx).await });

        let deadline = async {
            match timeout {
                Some(limit) => sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            joined = &mut join => match joined {
                Ok(Ok(result)) => ExecutionOutcome::Completed(result),
                Ok(Err(err)) => ExecutionOutcome::Failed(err),
                Err(join_err) if join_err.is_panic() => {
                    error!(task_id = %task_id, "Handler panicked");
                    ExecutionOutcome::Failed(
                        TaskError::new(ErrorCode::UnknownError, "Task handler panicked")
                            .with_retryable(false),
                    )
                }
                Err(_) => ExecutionOutcome::Interrupted,
            },
            _ = token.cancelled() => {
                join.abort();
                ExecutionOutcome::Interrupted
            }
            _ = deadline => {
                token.cancel();
                join.abort();
                let limit = timeout.unwrap_or_default();
                warn!(task_id = %task_id, "Task timed out after {:?}", limit);
                ExecutionOutcome::TimedOut(
                    TaskError::new(
                        ErrorCode::SystemTimeout,
                        format!("Task execution timed out after {}s", limit.as_secs_f64()),
                    )
                    .with_details(serde_json::json!({ "timeout_seconds": limit.as_secs_f64() })),
                )
            }
        }
    }

    /// Apply an outcome to the task, deciding between retry and a terminal
    /// state.
    pub fn resolve(&self, task: &mut Task, outcome: ExecutionOutcome) -> Resolution {
        match outcome {
            ExecutionOutcome::Completed(result) => {
                task.complete(result);
                info!(task_id = %task.id, "Task completed successfully");
                Resolution::Finished(TaskStatus::Completed)
            }
            ExecutionOutcome::Failed(err) => {
                if let Some(delay) = self.try_schedule_retry(task, &err) {
                    return Resolution::Retry(delay);
                }
                error!(task_id = %task.id, code = %err.code, "Task failed: {}", err.message);
                task.fail(&err);
                Resolution::Finished(TaskStatus::Failed)
            }
            ExecutionOutcome::TimedOut(err) => {
                if let Some(delay) = self.try_schedule_retry(task, &err) {
                    return Resolution::Retry(delay);
                }
                task.time_out(&err);
                Resolution::Finished(TaskStatus::Timeout)
            }
            ExecutionOutcome::Interrupted => {
                task.cancel("Execution interrupted");
                Resolution::Finished(TaskStatus::Cancelled)
            }
        }
    }

    fn try_schedule_retry(&self, task: &mut Task, err: &TaskError) -> Option<Duration> {
        if !err.is_retryable() || !task.retries_remaining() {
            return None;
        }

        task.schedule_retry(err);
        let delay = self.retry_policy.delay_for(task.retry_count);
        warn!(
            task_id = %task.id,
            code = %err.code,
            "Retrying task ({}/{}) in {:?}: {}",
            task.retry_count,
            task.max_retries,
            delay,
            err.message
        );
        Some(delay)
    }
}
