mod common;

use admin_task_queue::{
    handler_fn, RetentionPolicy, TaskError, TaskFilter, TaskQueue, TaskRequest, TaskStatus,
};
use common::{finished, test_config};
use serde_json::json;
use tokio::time::Duration;

async fn mixed_queue() -> TaskQueue {
    let queue = TaskQueue::new(&test_config(2));
    queue
        .register_handler("ok", handler_fn(|_ctx| async { Ok(json!({})) }))
        .await;
    queue
        .register_handler(
            "bad",
            handler_fn(|_ctx| async { Err(TaskError::permanent("access denied")) }),
        )
        .await;
    queue
}

#[tokio::test]
async fn test_stats_total_matches_distribution() {
    let queue = mixed_queue().await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(queue.submit(TaskRequest::new("ok")).await.unwrap());
    }
    ids.push(queue.submit(TaskRequest::new("bad")).await.unwrap());
    for id in &ids {
        finished(&queue, id).await;
    }

    queue.set_max_concurrent(0).await;
    let pending = queue.submit(TaskRequest::new("ok")).await.unwrap();
    queue.cancel_task(&pending).await.unwrap();
    queue.submit(TaskRequest::new("ok")).await.unwrap();

    let stats = queue.get_queue_stats().await;
    let sum: usize = stats.status_distribution.values().sum();
    assert_eq!(stats.summary.total_tasks, 6);
    assert_eq!(stats.summary.total_tasks, sum);
    assert_eq!(stats.summary.queue_size, 1);
    assert_eq!(stats.summary.max_concurrent, 0);
    assert_eq!(stats.count(TaskStatus::Completed), 3);
    assert_eq!(stats.count(TaskStatus::Failed), 1);
    assert_eq!(stats.count(TaskStatus::Cancelled), 1);
    assert_eq!(stats.type_distribution["ok"], 5);
    assert_eq!(stats.error_distribution["PERMANENT_ERROR"], 1);
    assert_eq!(stats.performance.success_rate, 75.0);
    assert_eq!(stats.recent_activity.last_hour, 6);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["status_distribution"]["completed"], 3);
    assert!(json["performance"]["average_duration_seconds"].is_number());
}

#[tokio::test]
async fn test_selections_by_category_tag_type_status() {
    let queue = mixed_queue().await;
    queue.set_max_concurrent(0).await;

    let a = queue
        .submit(
            TaskRequest::new("ok")
                .with_category("docker")
                .with_tag("registry")
                .with_tag("nightly"),
        )
        .await
        .unwrap();
    let b = queue
        .submit(TaskRequest::new("ok").with_category("docker"))
        .await
        .unwrap();
    let c = queue
        .submit(TaskRequest::new("bad").with_tag("nightly"))
        .await
        .unwrap();

    let docker = queue.get_tasks_by_category("docker").await;
    assert_eq!(docker.ids(), vec![a.clone(), b.clone()]);
    assert_eq!(docker.filter(), &TaskFilter::Category("docker".to_string()));

    let nightly = queue.get_tasks_by_tag("nightly").await;
    assert_eq!(nightly.len(), 2);
    // restartable
    assert_eq!(nightly.iter().count(), nightly.iter().count());

    let bad = queue.get_tasks_by_type("bad").await;
    assert_eq!(bad.ids(), vec![c.clone()]);

    queue.pause_task(&b).await.unwrap();
    assert_eq!(queue.get_tasks_by_status(TaskStatus::Paused).await.ids(), vec![b]);
    assert_eq!(queue.get_tasks_by_status(TaskStatus::Pending).await.len(), 2);
    assert!(queue.get_tasks_by_category("missing").await.is_empty());
}

#[tokio::test]
async fn test_selection_is_a_snapshot() {
    let queue = mixed_queue().await;
    queue.set_max_concurrent(0).await;
    let id = queue.submit(TaskRequest::new("ok")).await.unwrap();

    let before = queue.get_all_tasks().await;
    queue.cancel_task(&id).await.unwrap();

    let task = before.iter().next().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(
        queue.get_task(&id).await.unwrap().status,
        TaskStatus::Cancelled
    );
}

#[tokio::test]
async fn test_clear_finished_keeps_unfinished() {
    let queue = mixed_queue().await;
    let done = queue.submit(TaskRequest::new("ok")).await.unwrap();
    finished(&queue, &done).await;

    queue.set_max_concurrent(0).await;
    let waiting = queue.submit(TaskRequest::new("ok")).await.unwrap();

    assert_eq!(queue.clear_finished().await, 1);
    assert!(queue.get_task(&done).await.is_none());
    assert!(queue.get_task(&waiting).await.is_some());
}

#[tokio::test]
async fn test_cleanup_by_count_and_age() {
    let queue = mixed_queue().await;
    let mut ids = Vec::new();
    for _ in 0..4 {
        let id = queue.submit(TaskRequest::new("ok")).await.unwrap();
        finished(&queue, &id).await;
        ids.push(id);
    }

    assert_eq!(queue.cleanup(&RetentionPolicy::keep_all()).await, 0);

    let keep_two = RetentionPolicy {
        max_finished: Some(2),
        max_age: None,
    };
    assert_eq!(queue.cleanup(&keep_two).await, 2);
    assert!(queue.get_task(&ids[3]).await.is_some());
    assert!(queue.get_task(&ids[0]).await.is_none());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let expire_all = RetentionPolicy {
        max_finished: None,
        max_age: Some(Duration::from_millis(1)),
    };
    assert_eq!(queue.cleanup(&expire_all).await, 2);
    assert!(queue.get_all_tasks().await.is_empty());
}

#[tokio::test]
async fn test_success_on_last_retry_is_not_exhausted() {
    let queue = mixed_queue().await;
    queue
        .register_handler(
            "flaky",
            handler_fn(|ctx| async move {
                if ctx.attempt() < 2 {
                    Err(TaskError::transient("connection reset"))
                } else {
                    Ok(json!({"attempt": ctx.attempt()}))
                }
            }),
        )
        .await;

    let recovered = queue
        .submit(TaskRequest::new("flaky").with_max_retries(2))
        .await
        .unwrap();
    let exhausted = queue
        .submit(TaskRequest::new("bad").with_max_retries(0))
        .await
        .unwrap();

    let task = finished(&queue, &recovered).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retry_count, 2);
    finished(&queue, &exhausted).await;

    let stats = queue.get_queue_stats().await;
    assert_eq!(stats.retry_stats.total_retries, 2);
    assert_eq!(stats.retry_stats.tasks_with_retries, 1);
    // only counts tasks that ended unsuccessfully
    assert_eq!(stats.retry_stats.max_retries_reached, 0);
}
