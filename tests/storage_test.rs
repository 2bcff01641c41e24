mod common;

use admin_task_queue::storage::{FileBackend, MemoryBackend, StorageBackend};
use admin_task_queue::{handler_fn, Params, Task, TaskQueue, TaskRequest, TaskStatus};
use common::{finished, test_config};
use serde_json::json;
use std::sync::Arc;

async fn register_echo(queue: &TaskQueue) {
    queue
        .register_handler("echo", handler_fn(|ctx| async move { Ok(json!(ctx.params())) }))
        .await;
}

#[tokio::test]
async fn test_memory_backend_crud() {
    let backend = MemoryBackend::new();
    let task = Task::new("echo", Params::new());

    backend.save(&task).await.unwrap();
    assert_eq!(backend.load(&task.id).await.unwrap().id, task.id);
    assert_eq!(backend.list().await.unwrap().len(), 1);
    assert!(backend.health_check().await);

    backend.delete(&task.id).await.unwrap();
    assert!(backend.load(&task.id).await.is_err());
    assert!(backend.delete(&task.id).await.is_err());
    assert!(backend.is_empty().await);
}

#[tokio::test]
async fn test_file_backend_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("tasks.json");

    let mut task = Task::new("echo", Params::new());
    task.tags.insert("nightly".to_string());
    {
        let backend = FileBackend::open(&path).await.unwrap();
        assert!(backend.list().await.unwrap().is_empty());
        backend.save(&task).await.unwrap();
        backend
            .save(&Task::new("other", Params::new()))
            .await
            .unwrap();
    }

    let reopened = FileBackend::open(&path).await.unwrap();
    assert_eq!(reopened.list().await.unwrap().len(), 2);
    let loaded = reopened.load(&task.id).await.unwrap();
    assert!(loaded.has_tag("nightly"));
    assert!(reopened.health_check().await);

    reopened.delete(&task.id).await.unwrap();
    let again = FileBackend::open(&path).await.unwrap();
    assert_eq!(again.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_file_backend_rejects_corrupt_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.json");
    tokio::fs::write(&path, b"{not json").await.unwrap();

    assert!(FileBackend::open(&path).await.is_err());
}

#[tokio::test]
async fn test_queue_writes_every_change() {
    let backend = MemoryBackend::new();
    let queue = TaskQueue::with_storage(&test_config(1), Arc::new(backend.clone()));
    register_echo(&queue).await;

    let task_id = queue.submit(TaskRequest::new("echo")).await.unwrap();
    finished(&queue, &task_id).await;
    queue.flush_persistence().await;

    let stored = backend.load(&task_id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);

    assert_eq!(queue.clear_finished().await, 1);
    queue.flush_persistence().await;
    assert!(backend.is_empty().await);
}

#[tokio::test]
async fn test_restore_requeues_pending_and_interrupted_tasks() {
    let backend = MemoryBackend::new();

    let pending_id = {
        let queue = TaskQueue::with_storage(&test_config(0), Arc::new(backend.clone()));
        register_echo(&queue).await;
        let id = queue.submit(TaskRequest::new("echo")).await.unwrap();
        queue.flush_persistence().await;
        id
    };

    let mut interrupted = Task::new("echo", Params::new());
    interrupted.status = TaskStatus::Running;
    interrupted.progress = 40;
    backend.save(&interrupted).await.unwrap();

    let mut done = Task::new("echo", Params::new());
    done.status = TaskStatus::Completed;
    done.result = Some(json!({}));
    backend.save(&done).await.unwrap();

    let queue = TaskQueue::with_storage(&test_config(2), Arc::new(backend.clone()));
    register_echo(&queue).await;
    assert_eq!(queue.restore().await.unwrap(), 3);

    assert_eq!(finished(&queue, &pending_id).await.status, TaskStatus::Completed);
    let resumed = finished(&queue, &interrupted.id).await;
    assert_eq!(resumed.status, TaskStatus::Completed);
    assert!(resumed
        .logs
        .iter()
        .any(|line| line.contains("requeued after restart")));
    assert_eq!(
        queue.get_task(&done.id).await.unwrap().status,
        TaskStatus::Completed
    );

    // restoring again does not duplicate tasks
    assert_eq!(queue.restore().await.unwrap(), 0);
    assert_eq!(queue.get_all_tasks().await.len(), 3);
}

#[tokio::test]
async fn test_restore_without_storage_is_noop() {
    let queue = TaskQueue::new(&test_config(1));
    assert_eq!(queue.restore().await.unwrap(), 0);
}
