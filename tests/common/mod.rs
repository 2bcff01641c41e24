#![allow(dead_code)]

use admin_task_queue::{Config, Params, Task, TaskQueue, TaskStatus};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

/// Config with a short retry backoff so retry tests finish quickly
pub fn test_config(max_concurrent: usize) -> Config {
    Config {
        max_concurrent,
        retry_base_delay_ms: 10,
        retry_max_delay_ms: 50,
        ..Config::default()
    }
}

pub fn params(value: serde_json::Value) -> Params {
    value.as_object().cloned().unwrap_or_default()
}

/// Poll until the task satisfies `pred`, failing the test after 5 seconds
pub async fn wait_until<F>(queue: &TaskQueue, task_id: &str, pred: F) -> Arc<Task>
where
    F: Fn(&Task) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(task) = queue.get_task(task_id).await {
                if pred(&task) {
                    return task;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task did not reach the expected state in time")
}

pub async fn wait_for_status(queue: &TaskQueue, task_id: &str, status: TaskStatus) -> Arc<Task> {
    wait_until(queue, task_id, |task| task.status == status).await
}

/// Wait for a terminal status
pub async fn finished(queue: &TaskQueue, task_id: &str) -> Arc<Task> {
    queue
        .wait_for(task_id, Duration::from_secs(5))
        .await
        .expect("task did not finish in time")
}
