#![cfg(unix)]

mod common;

use admin_task_queue::handlers::command::{CUSTOM_COMMAND_FAILED, CUSTOM_SCRIPT_FAILED};
use admin_task_queue::handlers::register_builtin;
use admin_task_queue::{ErrorCode, Params, QueueManager, TaskQueue, TaskRequest, TaskStatus};
use common::{finished, params, test_config, wait_for_status};
use serde_json::json;
use std::time::Instant;
use tokio::time::Duration;

async fn builtin_manager() -> QueueManager {
    let queue = TaskQueue::new(&test_config(2));
    register_builtin(queue.registry()).await;
    QueueManager::new(queue)
}

#[tokio::test]
async fn test_custom_command_captures_output() {
    let manager = builtin_manager().await;
    let id = manager
        .add_custom_command_task("echo", &["hello", "world"], Params::new())
        .await
        .unwrap();

    let task = finished(manager.queue(), &id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.clone().unwrap();
    assert_eq!(result["stdout"], "hello world\n");
    assert_eq!(result["exit_code"], 0);
    assert_eq!(task.category, "custom");
}

#[tokio::test]
async fn test_custom_command_failure_code() {
    let manager = builtin_manager().await;
    let id = manager
        .add_custom_command_task("false", &[], Params::new())
        .await
        .unwrap();

    let task = finished(manager.queue(), &id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_code, Some(ErrorCode::from(CUSTOM_COMMAND_FAILED)));
    assert_eq!(task.retry_count, 0);
}

#[tokio::test]
async fn test_missing_program_is_permanent() {
    let manager = builtin_manager().await;
    let id = manager
        .add_custom_command_task("/definitely/not/a/program", &[], Params::new())
        .await
        .unwrap();

    let task = finished(manager.queue(), &id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_code, Some(ErrorCode::PermanentError));
}

#[tokio::test]
async fn test_custom_script_env_and_exit_code() {
    let manager = builtin_manager().await;

    let ok = manager
        .add_custom_script_task(
            "echo \"$GREETING\"",
            params(json!({"env": {"GREETING": "hi there"}})),
        )
        .await
        .unwrap();
    let task = finished(manager.queue(), &ok).await;
    assert_eq!(task.result.as_ref().unwrap()["stdout"], "hi there\n");

    let failing = manager
        .add_custom_script_task("echo oops >&2; exit 3", Params::new())
        .await
        .unwrap();
    let task = finished(manager.queue(), &failing).await;
    assert_eq!(task.error_code, Some(ErrorCode::from(CUSTOM_SCRIPT_FAILED)));
    let details = task.error_details.clone().unwrap();
    assert_eq!(details["exit_code"], 3);
    assert_eq!(details["stderr"], "oops\n");
}

#[tokio::test]
async fn test_invalid_command_params_are_rejected() {
    let manager = builtin_manager().await;

    let err = manager
        .add_task(TaskRequest::new("custom_command").with_param("command", ""))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

#[tokio::test]
async fn test_command_is_stopped_on_timeout_and_cancel() {
    let manager = builtin_manager().await;

    let started = Instant::now();
    let timed = manager
        .add_task(
            TaskRequest::new("custom_command")
                .with_param("command", "sleep")
                .with_param("args", json!(["5"]))
                .with_timeout_secs(1)
                .with_max_retries(0),
        )
        .await
        .unwrap();
    assert_eq!(finished(manager.queue(), &timed).await.status, TaskStatus::Timeout);
    assert!(started.elapsed() < Duration::from_secs(3));

    let cancelled = manager
        .add_custom_command_task("sleep", &["5"], Params::new())
        .await
        .unwrap();
    wait_for_status(manager.queue(), &cancelled, TaskStatus::Running).await;
    manager.cancel_task(&cancelled).await.unwrap();
    assert_eq!(
        finished(manager.queue(), &cancelled).await.status,
        TaskStatus::Cancelled
    );
}

#[tokio::test]
async fn test_system_monitor_is_builtin() {
    let manager = builtin_manager().await;

    let general = manager.add_system_monitor_task(Params::new()).await.unwrap();
    let task = finished(manager.queue(), &general).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.category, "system");
    let result = task.result.clone().unwrap();
    assert_eq!(result["monitor_type"], "general");
    assert!(result["memory_available"].as_u64().is_some());

    let processes = manager
        .add_system_monitor_task(params(json!({"monitor_type": "processes"})))
        .await
        .unwrap();
    let task = finished(manager.queue(), &processes).await;
    let listed = task.result.as_ref().unwrap()["processes"].as_array().unwrap().len();
    assert!(listed > 0 && listed <= 100);

    let err = manager
        .add_system_monitor_task(params(json!({"monitor_type": "gpu"})))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}
