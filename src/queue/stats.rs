//! Queue statistics

use crate::task::{Task, TaskStatus};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Counts describing the queue as a whole
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSummary {
    /// Tasks known to the queue, in any status
    pub total_tasks: usize,
    /// Current concurrency ceiling
    pub max_concurrent: usize,
    /// Execution slots in use
    pub current_running: usize,
    /// Tasks waiting in PENDING
    pub queue_size: usize,
}

/// Outcome figures over finished tasks
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceStats {
    /// Mean duration of completed tasks, in seconds
    pub average_duration_seconds: f64,
    /// Tasks in COMPLETED
    pub completed_tasks: usize,
    /// Tasks in FAILED
    pub failed_tasks: usize,
    /// Percentage of completed over completed + failed
    pub success_rate: f64,
}

/// Retry counters summed over all tasks
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryStats {
    /// Automatic retries performed
    pub total_retries: u64,
    /// Tasks retried automatically at least once
    pub tasks_with_retries: usize,
    /// FAILED or TIMEOUT tasks that used their whole retry budget
    pub max_retries_reached: usize,
    /// Retries requested through `retry_task`
    pub manual_retries: u64,
}

/// Tasks created within recent windows
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecentActivity {
    /// Created in the last 24 hours
    pub last_24h: usize,
    /// Created in the last hour
    pub last_hour: usize,
}

/// Read-only snapshot of queue statistics.
///
/// `summary.total_tasks` always equals the sum of `status_distribution`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    /// Queue-wide counts
    pub summary: StatsSummary,
    /// Task count per status, every status present
    pub status_distribution: BTreeMap<TaskStatus, usize>,
    /// Task count per task type
    pub type_distribution: BTreeMap<String, usize>,
    /// Count of recorded errors per error code
    pub error_distribution: BTreeMap<String, usize>,
    /// Outcome figures
    pub performance: PerformanceStats,
    /// Retry counters
    pub retry_stats: RetryStats,
    /// Creation counts over recent windows
    pub recent_activity: RecentActivity,
}

impl QueueStats {
    /// Compute statistics over a task snapshot
    pub fn compute<'a, I>(tasks: I, max_concurrent: usize, current_running: usize) -> Self
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let mut stats = QueueStats {
            status_distribution: TaskStatus::ALL.iter().map(|s| (*s, 0)).collect(),
            ..Default::default()
        };
        stats.summary.max_concurrent = max_concurrent;
        stats.summary.current_running = current_running;

        let now = Utc::now();
        let mut completed_durations = Vec::new();

        for task in tasks {
            stats.summary.total_tasks += 1;
            *stats.status_distribution.entry(task.status).or_default() += 1;
            *stats
                .type_distribution
                .entry(task.task_type.clone())
                .or_default() += 1;

            if task.status == TaskStatus::Pending {
                stats.summary.queue_size += 1;
            }

            if matches!(task.status, TaskStatus::Failed | TaskStatus::Timeout) {
                if let Some(code) = &task.error_code {
                    *stats
                        .error_distribution
                        .entry(code.to_string())
                        .or_default() += 1;
                }
            }

            match task.status {
                TaskStatus::Completed => {
                    stats.performance.completed_tasks += 1;
                    if let Some(seconds) = task.duration_seconds() {
                        completed_durations.push(seconds);
                    }
                }
                TaskStatus::Failed => stats.performance.failed_tasks += 1,
                _ => {}
            }

            stats.retry_stats.total_retries += u64::from(task.retry_count);
            stats.retry_stats.manual_retries += u64::from(task.manual_retries);
            if task.retry_count > 0 {
                stats.retry_stats.tasks_with_retries += 1;
            }
            if task.max_retries > 0
                && task.retry_count >= task.max_retries
                && matches!(task.status, TaskStatus::Failed | TaskStatus::Timeout)
            {
                stats.retry_stats.max_retries_reached += 1;
            }

            let age = now - task.created_at;
            if age <= Duration::hours(24) {
                stats.recent_activity.last_24h += 1;
            }
            if age <= Duration::hours(1) {
                stats.recent_activity.last_hour += 1;
            }
        }

        if !completed_durations.is_empty() {
            stats.performance.average_duration_seconds =
                completed_durations.iter().sum::<f64>() / completed_durations.len() as f64;
        }

        let finished = stats.performance.completed_tasks + stats.performance.failed_tasks;
        if finished > 0 {
            stats.performance.success_rate =
                stats.performance.completed_tasks as f64 / finished as f64 * 100.0;
        }

        stats
    }

    /// Number of tasks in `status`
    pub fn count(&self, status: TaskStatus) -> usize {
        self.status_distribution.get(&status).copied().unwrap_or(0)
    }
}
