//! Task queue: submission, admission under a concurrency ceiling, control
//! operations and queries.
//!
//! A [`TaskQueue`] is a cheap handle; clones share the same scheduler. All
//! structural state sits behind one `RwLock` that is never held across a
//! handler await, so queries and control operations are never blocked by a
//! running task.

/// Pending heap ordered by priority and submission
pub(crate) mod pending;
/// Execution units and the persistence writer
mod runner;
/// Point-in-time task selections
pub mod selection;
/// Queue statistics
pub mod stats;

pub use selection::{SelectionIter, TaskFilter, TaskSelection};
pub use stats::QueueStats;

use crate::config::Config;
use crate::handler::{HandlerRegistry, TaskHandler};
use crate::storage::StorageBackend;
use crate::task::executor::TaskExecutor;
use crate::task::{Task, TaskRequest, TaskStatus};
use crate::{Result, TaskQueueError};
use chrono::Utc;
use pending::PendingQueue;
use runner::PersistOp;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Eviction rules for finished tasks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetentionPolicy {
    /// Keep at most this many terminal tasks, newest first
    pub max_finished: Option<usize>,
    /// Drop terminal tasks that finished longer ago than this
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    /// Policy that never evicts
    pub fn keep_all() -> Self {
        Self::default()
    }

    /// Whether the policy removes nothing
    pub fn is_noop(&self) -> bool {
        self.max_finished.is_none() && self.max_age.is_none()
    }
}

/// Submission defaults taken from the configuration
#[derive(Debug, Clone)]
struct QueueSettings {
    max_queue_size: usize,
    default_max_retries: u32,
    default_timeout: Option<u64>,
}

/// A task plus the execution unit that currently owns it
#[derive(Debug)]
struct TaskEntry {
    task: Arc<Task>,
    active_unit: Option<u64>,
}

/// Live execution unit occupying a slot
#[derive(Debug)]
struct RunningSlot {
    task_id: String,
    token: CancellationToken,
}

#[derive(Debug)]
struct QueueState {
    tasks: HashMap<String, TaskEntry>,
    pending: PendingQueue,
    /// Live units by id; a unit keeps its slot until its future exits
    running: HashMap<u64, RunningSlot>,
    max_concurrent: usize,
    accepting: bool,
    next_unit: u64,
    wake_at: Option<Instant>,
}

impl QueueState {
    fn entry_mut(&mut self, task_id: &str) -> Result<&mut TaskEntry> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskQueueError::TaskNotFound(task_id.to_string()))
    }

    /// Stop the unit executing a task, if any
    fn release_unit(&mut self, task_id: &str) {
        let Some(entry) = self.tasks.get_mut(task_id) else {
            return;
        };
        if let Some(unit) = entry.active_unit.take() {
            if let Some(slot) = self.running.get(&unit) {
                slot.token.cancel();
            }
        }
    }
}

struct Shared {
    settings: QueueSettings,
    registry: HandlerRegistry,
    executor: TaskExecutor,
    state: RwLock<QueueState>,
    /// Bumped on every change; waiters re-check state when it moves
    changes: watch::Sender<u64>,
    persist: Option<mpsc::UnboundedSender<PersistOp>>,
    storage: Option<Arc<dyn StorageBackend>>,
}

impl Shared {
    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Queue a storage write; called with the state lock held to keep order
    fn persist(&self, op: PersistOp) {
        if let Some(tx) = &self.persist {
            if tx.send(op).is_err() {
                warn!("Persistence writer has stopped, dropping write");
            }
        }
    }

    fn persist_save(&self, task: &Arc<Task>) {
        self.persist(PersistOp::Save(Arc::clone(task)));
    }
}

/// Handle to the task queue
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
}

impl TaskQueue {
    /// Create an in-memory queue
    pub fn new(config: &Config) -> Self {
        Self::build(config, None)
    }

    /// Create a queue that writes every task change to `storage`.
    ///
    /// Must be called inside a Tokio runtime. Call [`TaskQueue::restore`]
    /// afterwards to reload previously stored tasks.
    pub fn with_storage(config: &Config, storage: Arc<dyn StorageBackend>) -> Self {
        Self::build(config, Some(storage))
    }

    fn build(config: &Config, storage: Option<Arc<dyn StorageBackend>>) -> Self {
        let (changes, _) = watch::channel(0);
        let persist = storage.as_ref().map(|s| runner::spawn_writer(Arc::clone(s)));

        info!(
            "Initialized task queue (max_concurrent: {}, max_queue_size: {}, persistence: {})",
            config.max_concurrent,
            config.max_queue_size,
            storage.is_some()
        );

        let shared = Shared {
            settings: QueueSettings {
                max_queue_size: config.max_queue_size,
                default_max_retries: config.default_max_retries,
                default_timeout: (config.default_timeout_secs > 0)
                    .then_some(config.default_timeout_secs),
            },
            registry: HandlerRegistry::new(),
            executor: TaskExecutor::new(config.retry_policy()),
            state: RwLock::new(QueueState {
                tasks: HashMap::new(),
                pending: PendingQueue::new(),
                running: HashMap::new(),
                max_concurrent: config.max_concurrent,
                accepting: true,
                next_unit: 1,
                wake_at: None,
            }),
            changes,
            persist,
            storage,
        };

        Self {
            shared: Arc::new(shared),
        }
    }

    /// Handler registry used by this queue
    pub fn registry(&self) -> &HandlerRegistry {
        &self.shared.registry
    }

    /// Register the handler for a task type
    pub async fn register_handler<H>(&self, task_type: impl Into<String>, handler: H)
    where
        H: TaskHandler + 'static,
    {
        self.shared.registry.register(task_type, handler).await;
    }

    /// Submit a task and return its id.
    ///
    /// Unregistered types and params rejected by the handler's validation
    /// fail here and never enter the queue.
    pub async fn submit(&self, request: TaskRequest) -> Result<String> {
        let handler = self
            .shared
            .registry
            .get(&request.task_type)
            .await
            .ok_or_else(|| TaskQueueError::HandlerNotFound(request.task_type.clone()))?;

        handler
            .validate(&request.params)
            .map_err(|err| TaskQueueError::Validation {
                task_type: request.task_type.clone(),
                message: err.message,
            })?;

        let settings = &self.shared.settings;
        let mut task = request.into_task(settings.default_max_retries, settings.default_timeout);
        task.add_log(format!("Task created: {}", task.task_type));
        let task_id = task.id.clone();

        {
            let mut guard = self.shared.state.write().await;
            let state = &mut *guard;

            if !state.accepting {
                return Err(TaskQueueError::ShuttingDown);
            }

            let unfinished = state
                .tasks
                .values()
                .filter(|entry| !entry.task.status.is_terminal())
                .count();
            if unfinished >= settings.max_queue_size {
                warn!("Rejecting task {}: queue is full", task.task_type);
                return Err(TaskQueueError::QueueFull(settings.max_queue_size));
            }

            state.pending.push(task_id.clone(), task.priority, None);
            let task = Arc::new(task);
            self.shared.persist_save(&task);
            info!(
                "Added task {} ({}) with priority {:?}, {} pending",
                task_id,
                task.task_type,
                task.priority,
                state.pending.len()
            );
            state.tasks.insert(
                task_id.clone(),
                TaskEntry {
                    task,
                    active_unit: None,
                },
            );
        }

        self.shared.notify();
        self.shared.dispatch().await;
        Ok(task_id)
    }

    /// Snapshot of a task
    pub async fn get_task(&self, task_id: &str) -> Option<Arc<Task>> {
        let state = self.shared.state.read().await;
        state.tasks.get(task_id).map(|entry| Arc::clone(&entry.task))
    }

    /// Snapshot of the tasks matching `filter`
    pub async fn select(&self, filter: TaskFilter) -> TaskSelection {
        let tasks = {
            let state = self.shared.state.read().await;
            state
                .tasks
                .values()
                .filter(|entry| filter.matches(&entry.task))
                .map(|entry| Arc::clone(&entry.task))
                .collect()
        };
        TaskSelection::new(filter, tasks)
    }

    /// Every task
    pub async fn get_all_tasks(&self) -> TaskSelection {
        self.select(TaskFilter::All).await
    }

    /// Tasks in a category
    pub async fn get_tasks_by_category(&self, category: &str) -> TaskSelection {
        self.select(TaskFilter::Category(category.to_string())).await
    }

    /// Tasks carrying a tag
    pub async fn get_tasks_by_tag(&self, tag: &str) -> TaskSelection {
        self.select(TaskFilter::Tag(tag.to_string())).await
    }

    /// Tasks of a type
    pub async fn get_tasks_by_type(&self, task_type: &str) -> TaskSelection {
        self.select(TaskFilter::Type(task_type.to_string())).await
    }

    /// Tasks in a status
    pub async fn get_tasks_by_status(&self, status: TaskStatus) -> TaskSelection {
        self.select(TaskFilter::Status(status)).await
    }

    /// Statistics over a snapshot of all tasks
    pub async fn get_queue_stats(&self) -> QueueStats {
        let (tasks, max_concurrent, running) = {
            let state = self.shared.state.read().await;
            let tasks: Vec<Arc<Task>> = state.tasks.values().map(|e| Arc::clone(&e.task)).collect();
            (tasks, state.max_concurrent, state.running.len())
        };
        QueueStats::compute(tasks.iter().map(|t| t.as_ref()), max_concurrent, running)
    }

    /// Position of a task in admission order: 0 while executing, 1-based
    /// while pending.
    pub async fn position(&self, task_id: &str) -> Result<usize> {
        let state = self.shared.state.read().await;
        let entry = state
            .tasks
            .get(task_id)
            .ok_or_else(|| TaskQueueError::TaskNotFound(task_id.to_string()))?;

        match entry.task.status {
            status if status.is_active() => Ok(0),
            TaskStatus::Pending => state
                .pending
                .ordered_ids()
                .iter()
                .position(|id| id == task_id)
                .map(|index| index + 1)
                .ok_or_else(|| TaskQueueError::TaskNotFound(task_id.to_string())),
            status => Err(TaskQueueError::InvalidState {
                task_id: task_id.to_string(),
                status,
                operation: "locate",
            }),
        }
    }

    /// Pause a pending or executing task. An executing attempt is stopped.
    pub async fn pause_task(&self, task_id: &str) -> Result<()> {
        {
            let mut guard = self.shared.state.write().await;
            let state = &mut *guard;
            let status = state.entry_mut(task_id)?.task.status;

            if !(status == TaskStatus::Pending || status.is_active()) {
                return Err(invalid_state(task_id, status, "pause"));
            }

            state.pending.remove(task_id);
            state.release_unit(task_id);
            let entry = state.entry_mut(task_id)?;
            Arc::make_mut(&mut entry.task).pause();
            self.shared.persist_save(&entry.task);
        }

        info!("Paused task {}", task_id);
        self.shared.notify();
        Ok(())
    }

    /// Put a paused task back into the pending queue
    pub async fn resume_task(&self, task_id: &str) -> Result<()> {
        {
            let mut guard = self.shared.state.write().await;
            let state = &mut *guard;
            let entry = state.entry_mut(task_id)?;

            if entry.task.status != TaskStatus::Paused {
                return Err(invalid_state(task_id, entry.task.status, "resume"));
            }

            let task = Arc::make_mut(&mut entry.task);
            task.resume();
            let priority = task.priority;
            self.shared.persist_save(&entry.task);
            state.pending.push(task_id.to_string(), priority, None);
        }

        info!("Resumed task {}", task_id);
        self.shared.notify();
        self.shared.dispatch().await;
        Ok(())
    }

    /// Run a failed or timed out task once more.
    ///
    /// The automatic retry counter is kept; if the extra attempt fails and
    /// no automatic retries remain, the task goes straight back to a
    /// terminal status.
    pub async fn retry_task(&self, task_id: &str) -> Result<()> {
        {
            let mut guard = self.shared.state.write().await;
            let state = &mut *guard;
            let entry = state.entry_mut(task_id)?;

            if !entry.task.can_retry() {
                return Err(invalid_state(task_id, entry.task.status, "retry"));
            }

            let task = Arc::make_mut(&mut entry.task);
            task.manual_retry();
            let priority = task.priority;
            self.shared.persist_save(&entry.task);
            state.pending.push(task_id.to_string(), priority, None);
        }

        info!("Manual retry requested for task {}", task_id);
        self.shared.notify();
        self.shared.dispatch().await;
        Ok(())
    }

    /// Cancel a task that has not finished
    pub async fn cancel_task(&self, task_id: &str) -> Result<()> {
        {
            let mut guard = self.shared.state.write().await;
            let state = &mut *guard;
            let status = state.entry_mut(task_id)?.task.status;

            if status.is_terminal() {
                return Err(invalid_state(task_id, status, "cancel"));
            }

            state.pending.remove(task_id);
            state.release_unit(task_id);
            let entry = state.entry_mut(task_id)?;
            Arc::make_mut(&mut entry.task).cancel("Cancelled by user");
            self.shared.persist_save(&entry.task);
        }

        info!("Cancelled task {}", task_id);
        self.shared.notify();
        Ok(())
    }

    /// Current execution ceiling
    pub async fn max_concurrent(&self) -> usize {
        self.shared.state.read().await.max_concurrent
    }

    /// Change the execution ceiling. Lowering it never stops running tasks;
    /// 0 stops admission entirely.
    pub async fn set_max_concurrent(&self, max_concurrent: usize) {
        {
            let mut state = self.shared.state.write().await;
            debug!(
                "Changing max_concurrent from {} to {}",
                state.max_concurrent, max_concurrent
            );
            state.max_concurrent = max_concurrent;
        }
        self.shared.notify();
        self.shared.dispatch().await;
    }

    /// Number of live execution units
    pub async fn running_count(&self) -> usize {
        self.shared.state.read().await.running.len()
    }

    /// Wait until a task reaches a terminal status
    pub async fn wait_for(&self, task_id: &str, timeout: Duration) -> Result<Arc<Task>> {
        let mut changes = self.shared.changes.subscribe();

        let wait = async {
            loop {
                match self.get_task(task_id).await {
                    None => return Err(TaskQueueError::TaskNotFound(task_id.to_string())),
                    Some(task) if task.status.is_terminal() => return Ok(task),
                    Some(_) => {}
                }
                if changes.changed().await.is_err() {
                    return Err(TaskQueueError::ShuttingDown);
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| TaskQueueError::WaitTimeout(task_id.to_string()))?
    }

    /// Remove every terminal task, returning how many were removed
    pub async fn clear_finished(&self) -> usize {
        let removed = {
            let mut state = self.shared.state.write().await;
            let ids: Vec<String> = state
                .tasks
                .iter()
                .filter(|(_, entry)| entry.task.status.is_terminal())
                .map(|(id, _)| id.clone())
                .collect();
            self.remove_locked(&mut state, &ids)
        };

        if removed > 0 {
            info!("Cleared {} finished tasks", removed);
            self.shared.notify();
        }
        removed
    }

    /// Evict terminal tasks according to `policy`
    pub async fn cleanup(&self, policy: &RetentionPolicy) -> usize {
        if policy.is_noop() {
            return 0;
        }

        let removed = {
            let mut state = self.shared.state.write().await;
            let mut finished: Vec<(String, chrono::DateTime<Utc>)> = state
                .tasks
                .values()
                .filter(|entry| entry.task.status.is_terminal())
                .map(|entry| {
                    let task = &entry.task;
                    (task.id.clone(), task.completed_at.unwrap_or(task.updated_at))
                })
                .collect();
            // newest first
            finished.sort_by(|a, b| b.1.cmp(&a.1));

            let now = Utc::now();
            let mut evict = Vec::new();
            for (index, (id, finished_at)) in finished.into_iter().enumerate() {
                let too_many = policy.max_finished.is_some_and(|max| index >= max);
                let too_old = policy.max_age.is_some_and(|age| {
                    chrono::Duration::from_std(age).is_ok_and(|age| now - finished_at > age)
                });
                if too_many || too_old {
                    evict.push(id);
                }
            }
            self.remove_locked(&mut state, &evict)
        };

        if removed > 0 {
            info!("Cleanup evicted {} finished tasks", removed);
            self.shared.notify();
        }
        removed
    }

    fn remove_locked(&self, state: &mut QueueState, ids: &[String]) -> usize {
        let mut removed = 0;
        for id in ids {
            if state.tasks.remove(id).is_some() {
                self.shared.persist(PersistOp::Delete(id.clone()));
                removed += 1;
            }
        }
        removed
    }

    /// Reload tasks from the storage backend.
    ///
    /// Tasks that were executing when the process stopped go back to
    /// pending with their progress reset. Ids already in the queue are
    /// skipped. Returns the number of tasks loaded.
    pub async fn restore(&self) -> Result<usize> {
        let Some(storage) = &self.shared.storage else {
            return Ok(0);
        };

        let mut stored = storage.list().await?;
        stored.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut loaded = 0;
        {
            let mut guard = self.shared.state.write().await;
            let state = &mut *guard;

            for mut task in stored {
                if state.tasks.contains_key(&task.id) {
                    continue;
                }

                if task.status.is_active() {
                    task.restart();
                }
                if task.status == TaskStatus::Pending {
                    state.pending.push(task.id.clone(), task.priority, None);
                }

                let task = Arc::new(task);
                self.shared.persist_save(&task);
                state.tasks.insert(
                    task.id.clone(),
                    TaskEntry {
                        task,
                        active_unit: None,
                    },
                );
                loaded += 1;
            }
        }

        info!("Restored {} tasks from storage", loaded);
        self.shared.notify();
        self.shared.dispatch().await;
        Ok(loaded)
    }

    /// Wait until every queued storage write has been applied
    pub async fn flush_persistence(&self) {
        let Some(tx) = &self.shared.persist else {
            return;
        };
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        if tx.send(PersistOp::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Stop admitting tasks and wait for running ones to finish.
    ///
    /// Pending tasks stay pending. Tasks still running at the deadline are
    /// cancelled and `ShutdownTimeout` is returned.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        info!("Initiating graceful shutdown...");
        {
            let mut state = self.shared.state.write().await;
            state.accepting = false;
            info!(
                "Waiting for {} running tasks to complete (timeout: {}s)...",
                state.running.len(),
                timeout.as_secs()
            );
        }

        let drained = tokio::time::timeout(timeout, self.wait_idle()).await;

        let result = match drained {
            Ok(()) => {
                info!("All running tasks finished");
                Ok(())
            }
            Err(_) => {
                let stragglers = self.cancel_running("Queue shutdown").await;
                warn!("Shutdown timeout reached, cancelled {} tasks", stragglers);
                Err(TaskQueueError::ShutdownTimeout(stragglers))
            }
        };

        self.flush_persistence().await;
        result
    }

    async fn wait_idle(&self) {
        let mut changes = self.shared.changes.subscribe();
        loop {
            if self.shared.state.read().await.running.is_empty() {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    async fn cancel_running(&self, reason: &str) -> usize {
        let mut cancelled = 0;
        {
            let mut guard = self.shared.state.write().await;
            let state = &mut *guard;
            let ids: Vec<String> = state.running.values().map(|s| s.task_id.clone()).collect();

            for id in ids {
                state.release_unit(&id);
                if let Some(entry) = state.tasks.get_mut(&id) {
                    if entry.task.status.is_active() {
                        Arc::make_mut(&mut entry.task).cancel(reason);
                        self.shared.persist_save(&entry.task);
                        cancelled += 1;
                    }
                }
            }
        }
        self.shared.notify();
        cancelled
    }
}

fn invalid_state(task_id: &str, status: TaskStatus, operation: &'static str) -> TaskQueueError {
    TaskQueueError::InvalidState {
        task_id: task_id.to_string(),
        status,
        operation,
    }
}
