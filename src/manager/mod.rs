//! Queue manager
//!
//! Thin façade over [`TaskQueue`] used by the command layer: typed helpers
//! that shape params, category and tags for the well-known task types, and
//! caller-friendly views of task and queue state. It holds no state of its
//! own beyond the queue handle.

use crate::queue::{QueueStats, TaskQueue};
use crate::task::{kinds, Params, Task, TaskRequest, TaskSummary};
use crate::{Result, TaskQueueError};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Wait assumed per queued task when no task has completed yet
pub const DEFAULT_TASK_ESTIMATE: Duration = Duration::from_secs(30);

/// Number of tasks listed in [`QueueStatus::recent_tasks`]
const RECENT_TASKS: usize = 10;

/// Statistics plus the most recent and the running tasks
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    /// Queue-wide statistics
    pub statistics: QueueStats,
    /// Most recently created tasks, newest first
    pub recent_tasks: Vec<TaskSummary>,
    /// Tasks holding an execution slot
    pub running_tasks: Vec<TaskSummary>,
}

/// Typed submission and reporting façade
#[derive(Clone)]
pub struct QueueManager {
    queue: TaskQueue,
}

impl QueueManager {
    /// Wrap a queue handle
    pub fn new(queue: TaskQueue) -> Self {
        Self { queue }
    }

    /// Underlying queue
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Submit a fully specified request
    pub async fn add_task(&self, request: TaskRequest) -> Result<String> {
        self.queue.submit(request).await
    }

    /// Build a request for a well-known type: category from the type
    /// prefix, tagged with the category and the type. `options` are merged
    /// last and win over the named params.
    async fn add_typed(&self, task_type: &str, mut params: Params, options: Params) -> Result<String> {
        params.extend(options);
        let category = kinds::category_of(task_type);
        let request = TaskRequest::new(task_type)
            .with_params(params)
            .with_category(category)
            .with_tag(category)
            .with_tag(task_type);
        self.queue.submit(request).await
    }

    /// Push a Docker image
    pub async fn add_docker_push_task(&self, image_name: &str, tag: &str, options: Params) -> Result<String> {
        let params = params([("image_name", image_name.into()), ("tag", tag.into())]);
        self.add_typed(kinds::DOCKER_PUSH, params, options).await
    }

    /// Build a Docker image
    pub async fn add_docker_build_task(
        &self,
        dockerfile_path: &str,
        tag: Option<&str>,
        context_path: &str,
        options: Params,
    ) -> Result<String> {
        let params = params([
            ("dockerfile_path", dockerfile_path.into()),
            ("tag", tag.map_or(Value::Null, Value::from)),
            ("context_path", context_path.into()),
        ]);
        self.add_typed(kinds::DOCKER_BUILD, params, options).await
    }

    /// Pull a Docker image
    pub async fn add_docker_pull_task(&self, image_name: &str, tag: &str, options: Params) -> Result<String> {
        let params = params([("image_name", image_name.into()), ("tag", tag.into())]);
        self.add_typed(kinds::DOCKER_PULL, params, options).await
    }

    /// Pull an Ollama model
    pub async fn add_ollama_pull_task(&self, model_name: &str, options: Params) -> Result<String> {
        let params = params([("model_name", model_name.into())]);
        self.add_typed(kinds::OLLAMA_PULL, params, options).await
    }

    /// Run inference on an Ollama model
    pub async fn add_ollama_run_task(
        &self,
        model_name: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
        options: Params,
    ) -> Result<String> {
        let params = params([
            ("model_name", model_name.into()),
            ("prompt", prompt.into()),
            ("max_tokens", max_tokens.into()),
            ("temperature", temperature.into()),
        ]);
        self.add_typed(kinds::OLLAMA_RUN, params, options).await
    }

    /// Copy a local file to a remote host over SCP
    pub async fn add_scp_upload_task(
        &self,
        host: &str,
        local_path: &str,
        remote_path: &str,
        options: Params,
    ) -> Result<String> {
        let params = params([
            ("host", host.into()),
            ("local_path", local_path.into()),
            ("remote_path", remote_path.into()),
        ]);
        self.add_typed(kinds::SCP_UPLOAD, params, options).await
    }

    /// Run a command on a remote host over SSH
    pub async fn add_ssh_execute_task(&self, host: &str, command: &str, options: Params) -> Result<String> {
        let params = params([("host", host.into()), ("command", command.into())]);
        self.add_typed(kinds::SSH_EXECUTE, params, options).await
    }

    /// Upload a local file to an FTP server
    pub async fn add_ftp_upload_task(
        &self,
        host: &str,
        local_path: &str,
        remote_path: &str,
        options: Params,
    ) -> Result<String> {
        let params = params([
            ("host", host.into()),
            ("local_path", local_path.into()),
            ("remote_path", remote_path.into()),
        ]);
        self.add_typed(kinds::FTP_UPLOAD, params, options).await
    }

    /// Download a file from an FTP server
    pub async fn add_ftp_download_task(
        &self,
        host: &str,
        remote_path: &str,
        local_path: &str,
        options: Params,
    ) -> Result<String> {
        let params = params([
            ("host", host.into()),
            ("remote_path", remote_path.into()),
            ("local_path", local_path.into()),
        ]);
        self.add_typed(kinds::FTP_DOWNLOAD, params, options).await
    }

    /// Apply a Kubernetes manifest
    pub async fn add_k8s_deploy_task(&self, manifest_path: &str, namespace: &str, options: Params) -> Result<String> {
        let params = params([
            ("manifest_path", manifest_path.into()),
            ("namespace", namespace.into()),
        ]);
        self.add_typed(kinds::K8S_DEPLOY, params, options).await
    }

    /// Create a Vast.ai instance
    pub async fn add_vast_create_task(&self, image: &str, options: Params) -> Result<String> {
        let params = params([("image", image.into())]);
        self.add_typed(kinds::VAST_CREATE, params, options).await
    }

    /// Clone a GitHub repository
    pub async fn add_github_clone_task(
        &self,
        repo_url: &str,
        target_dir: &str,
        branch: Option<&str>,
        options: Params,
    ) -> Result<String> {
        let params = params([
            ("repo_url", repo_url.into()),
            ("target_dir", target_dir.into()),
            ("branch", branch.map_or(Value::Null, Value::from)),
        ]);
        self.add_typed(kinds::GITHUB_CLONE, params, options).await
    }

    /// Sample host resource usage; `monitor_type` in `options` is
    /// `general` (default) or `processes`
    pub async fn add_system_monitor_task(&self, options: Params) -> Result<String> {
        self.add_typed(kinds::SYSTEM_MONITOR, Params::new(), options).await
    }

    /// Run a local program with arguments
    pub async fn add_custom_command_task(&self, command: &str, args: &[&str], options: Params) -> Result<String> {
        let params = params([("command", command.into()), ("args", args.into())]);
        self.add_typed(kinds::CUSTOM_COMMAND, params, options).await
    }

    /// Run a local shell script
    pub async fn add_custom_script_task(&self, script: &str, options: Params) -> Result<String> {
        let params = params([("script", script.into())]);
        self.add_typed(kinds::CUSTOM_SCRIPT, params, options).await
    }

    /// Task by id, or `QUEUE_TASK_NOT_FOUND`
    pub async fn get_task(&self, task_id: &str) -> Result<Arc<Task>> {
        self.queue
            .get_task(task_id)
            .await
            .ok_or_else(|| TaskQueueError::TaskNotFound(task_id.to_string()))
    }

    /// Summary view of a task
    pub async fn get_task_status(&self, task_id: &str) -> Result<TaskSummary> {
        Ok(self.get_task(task_id).await?.summary())
    }

    /// Activity log of a task
    pub async fn get_task_logs(&self, task_id: &str) -> Result<Vec<String>> {
        Ok(self.get_task(task_id).await?.logs.clone())
    }

    /// Queue statistics snapshot
    pub async fn get_queue_stats(&self) -> QueueStats {
        self.queue.get_queue_stats().await
    }

    /// Statistics with the most recent and the running tasks
    pub async fn get_queue_status(&self) -> QueueStatus {
        let statistics = self.queue.get_queue_stats().await;
        let all = self.queue.get_all_tasks().await;

        let mut recent: Vec<&Task> = all.iter().collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        QueueStatus {
            statistics,
            recent_tasks: recent.iter().take(RECENT_TASKS).map(|t| t.summary()).collect(),
            running_tasks: all
                .iter()
                .filter(|t| t.status.is_active())
                .map(Task::summary)
                .collect(),
        }
    }

    /// Pause a pending or running task
    pub async fn pause_task(&self, task_id: &str) -> Result<()> {
        self.queue.pause_task(task_id).await
    }

    /// Put a paused task back in line
    pub async fn resume_task(&self, task_id: &str) -> Result<()> {
        self.queue.resume_task(task_id).await
    }

    /// Run a failed or timed out task once more
    pub async fn retry_task(&self, task_id: &str) -> Result<()> {
        self.queue.retry_task(task_id).await
    }

    /// Cancel a task that has not finished
    pub async fn cancel_task(&self, task_id: &str) -> Result<()> {
        self.queue.cancel_task(task_id).await
    }

    /// Stop admitting tasks; running tasks are left to finish
    pub async fn pause_queue(&self) {
        info!("Pausing task queue");
        self.queue.set_max_concurrent(0).await;
    }

    /// Admit tasks again with the given ceiling
    pub async fn resume_queue(&self, max_concurrent: usize) {
        info!("Resuming task queue with max_concurrent {}", max_concurrent);
        self.queue.set_max_concurrent(max_concurrent).await;
    }

    /// 0 while executing, otherwise 1-based place among pending tasks
    pub async fn get_task_position(&self, task_id: &str) -> Result<usize> {
        self.queue.position(task_id).await
    }

    /// Rough wait before a pending task starts: its position times the
    /// average completed duration.
    pub async fn get_estimated_wait_time(&self, task_id: &str) -> Result<Duration> {
        let position = self.queue.position(task_id).await?;
        if position == 0 {
            return Ok(Duration::ZERO);
        }

        let stats = self.queue.get_queue_stats().await;
        let per_task = if stats.performance.completed_tasks > 0 {
            Duration::from_secs_f64(stats.performance.average_duration_seconds.max(0.0))
        } else {
            DEFAULT_TASK_ESTIMATE
        };
        Ok(per_task * position as u32)
    }

    /// Remove every finished task
    pub async fn clear_completed_tasks(&self) -> usize {
        self.queue.clear_finished().await
    }

    /// Wait for a task to finish and return its summary
    pub async fn wait_for_task(&self, task_id: &str, timeout: Duration) -> Result<TaskSummary> {
        Ok(self.queue.wait_for(task_id, timeout).await?.summary())
    }
}

fn params<const N: usize>(entries: [(&str, Value); N]) -> Params {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
