mod common;

use admin_task_queue::task::kinds;
use admin_task_queue::{handler_fn, ErrorCode, Params, QueueManager, TaskQueue, TaskStatus};
use common::{params, test_config};
use serde_json::json;
use std::time::Duration;

/// Manager whose queue echoes params back for every well-known type
async fn echo_manager(max_concurrent: usize) -> QueueManager {
    let queue = TaskQueue::new(&test_config(max_concurrent));
    for kind in [
        kinds::DOCKER_PUSH,
        kinds::DOCKER_BUILD,
        kinds::OLLAMA_RUN,
        kinds::SSH_EXECUTE,
        kinds::SCP_UPLOAD,
        kinds::GITHUB_CLONE,
        kinds::SYSTEM_MONITOR,
    ] {
        queue
            .register_handler(
                kind,
                handler_fn(|ctx| async move {
                    ctx.report(60, "Echoing").await;
                    Ok(json!(ctx.params()))
                }),
            )
            .await;
    }
    QueueManager::new(queue)
}

#[tokio::test]
async fn test_typed_helpers_shape_requests() {
    let manager = echo_manager(2).await;

    let push = manager
        .add_docker_push_task("registry.local/app", "v1", params(json!({"tag": "v2", "retries": 2})))
        .await
        .unwrap();
    let task = manager.get_task(&push).await.unwrap();
    assert_eq!(task.task_type, kinds::DOCKER_PUSH);
    assert_eq!(task.category, "docker");
    assert!(task.has_tag("docker"));
    assert!(task.has_tag(kinds::DOCKER_PUSH));
    assert_eq!(task.params["image_name"], "registry.local/app");
    // options override named params
    assert_eq!(task.params["tag"], "v2");
    assert_eq!(task.params["retries"], 2);

    let build = manager
        .add_docker_build_task("Dockerfile", None, ".", Params::new())
        .await
        .unwrap();
    assert!(manager.get_task(&build).await.unwrap().params["tag"].is_null());

    let ssh = manager
        .add_ssh_execute_task("10.0.0.5", "uptime", Params::new())
        .await
        .unwrap();
    let summary = manager.wait_for_task(&ssh, Duration::from_secs(5)).await.unwrap();
    assert_eq!(summary.category, "ssh");
    assert_eq!(summary.status.current, TaskStatus::Completed);
    assert_eq!(
        summary.result,
        Some(json!({"host": "10.0.0.5", "command": "uptime"}))
    );

    let run = manager
        .add_ollama_run_task("llama3", "hello", 256, 0.2, Params::new())
        .await
        .unwrap();
    let run_task = manager.get_task(&run).await.unwrap();
    assert_eq!(run_task.params["max_tokens"], 256);
    assert_eq!(run_task.category, "ollama");

    let clone = manager
        .add_github_clone_task("https://github.com/org/repo", "/srv/repo", Some("main"), Params::new())
        .await
        .unwrap();
    assert_eq!(manager.get_task(&clone).await.unwrap().params["branch"], "main");
}

#[tokio::test]
async fn test_helper_without_handler_is_rejected() {
    let manager = echo_manager(1).await;

    let err = manager
        .add_ftp_upload_task("ftp.local", "/tmp/a", "/upload/a", Params::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::HandlerNotFound);
}

#[tokio::test]
async fn test_task_status_summary_and_logs() {
    let manager = echo_manager(1).await;
    let id = manager
        .add_system_monitor_task(params(json!({"interval": 5})))
        .await
        .unwrap();

    let summary = manager.wait_for_task(&id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(summary.id, id);
    assert_eq!(summary.status.description, "Task completed successfully");
    assert_eq!(summary.status.progress, 100);
    assert!(summary.timing.duration_seconds.is_some());
    assert!(summary.error.is_none());
    assert!(!summary.retry.can_retry);

    let logs = manager.get_task_logs(&id).await.unwrap();
    assert!(logs[0].contains("Task created: system_monitor"));
    assert!(logs.iter().any(|line| line.contains("Echoing")));

    let json = serde_json::to_value(manager.get_task_status(&id).await.unwrap()).unwrap();
    assert_eq!(json["status"]["current"], "completed");

    assert_eq!(
        manager.get_task_status("missing").await.unwrap_err().code(),
        ErrorCode::QueueTaskNotFound
    );
}

#[tokio::test]
async fn test_pause_queue_positions_and_wait_estimate() {
    let manager = echo_manager(1).await;
    manager.pause_queue().await;

    let mut ids = Vec::new();
    for host in ["a", "b", "c"] {
        ids.push(
            manager
                .add_ssh_execute_task(host, "true", Params::new())
                .await
                .unwrap(),
        );
    }

    assert_eq!(manager.get_task_position(&ids[0]).await.unwrap(), 1);
    assert_eq!(manager.get_task_position(&ids[2]).await.unwrap(), 3);
    assert_eq!(
        manager.get_estimated_wait_time(&ids[2]).await.unwrap(),
        Duration::from_secs(90)
    );

    let status = manager.get_queue_status().await;
    assert_eq!(status.statistics.summary.queue_size, 3);
    assert_eq!(status.recent_tasks.len(), 3);
    assert!(status.running_tasks.is_empty());

    manager.resume_queue(2).await;
    for id in &ids {
        manager.wait_for_task(id, Duration::from_secs(5)).await.unwrap();
    }

    // finished tasks have no queue position
    assert_eq!(
        manager.get_task_position(&ids[0]).await.unwrap_err().code(),
        ErrorCode::InvalidState
    );
    assert_eq!(manager.clear_completed_tasks().await, 3);
    assert!(manager.queue().get_all_tasks().await.is_empty());
}

#[tokio::test]
async fn test_recent_tasks_are_capped() {
    let manager = echo_manager(0).await;
    for i in 0..12 {
        manager
            .add_system_monitor_task(params(json!({ "index": i })))
            .await
            .unwrap();
    }

    let status = manager.get_queue_status().await;
    assert_eq!(status.recent_tasks.len(), 10);
    assert_eq!(status.statistics.summary.total_tasks, 12);
}

#[tokio::test]
async fn test_control_delegation() {
    let manager = echo_manager(0).await;
    let id = manager
        .add_scp_upload_task("10.0.0.9", "/tmp/file", "/srv/file", Params::new())
        .await
        .unwrap();

    manager.pause_task(&id).await.unwrap();
    manager.resume_task(&id).await.unwrap();
    manager.cancel_task(&id).await.unwrap();
    assert_eq!(
        manager.retry_task(&id).await.unwrap_err().code(),
        ErrorCode::InvalidState
    );
    assert_eq!(
        manager.get_task(&id).await.unwrap().status,
        TaskStatus::Cancelled
    );
}
