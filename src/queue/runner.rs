//! Runner

use super::{RunningSlot, Shared};
use crate::handler::context::{ExecutionSink, ExecutionUpdate};
use crate::handler::TaskContext;
use crate::storage::StorageBackend;
use crate::task::executor::{ExecutionOutcome, Resolution};
use crate::task::{Task, TaskStatus};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Storage write queued by the scheduler
#[derive(Debug)]
pub(super) enum PersistOp {
    Save(Arc<Task>),
    Delete(String),
    Flush(oneshot::Sender<()>),
}

/// Apply storage writes one at a time, in the order they were queued
pub(super) fn spawn_writer(storage: Arc<dyn StorageBackend>) -> mpsc::UnboundedSender<PersistOp> {
    let (tx, mut rx) = mpsc::unbounded_channel::<PersistOp>();

    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            match op {
                PersistOp::Save(task) => {
                    if let Err(e) = storage.save(&task).await {
                        warn!(task_id = %task.id, "Failed to persist task: {}", e);
                    }
                }
                PersistOp::Delete(task_id) => {
                    if let Err(e) = storage.delete(&task_id).await {
                        debug!(task_id = %task_id, "Failed to delete stored task: {}", e);
                    }
                }
                PersistOp::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("Persistence writer stopped");
    });

    tx
}

/// A task admitted to a slot, handed to its execution unit
struct Admission {
    unit: u64,
    token: CancellationToken,
    task: Arc<Task>,
}

impl Shared {
    /// Admit eligible pending tasks while slots are free.
    ///
    /// Boxed because execution units call back into it when they finish.
    pub(super) fn dispatch(self: &Arc<Self>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut admitted = Vec::new();
            {
                let mut guard = self.state.write().await;
                let state = &mut *guard;
                if !state.accepting {
                    return;
                }

                let now = Instant::now();
                while state.running.len() < state.max_concurrent {
                    let Some(task_id) = state.pending.pop_ready(now) else {
                        break;
                    };
                    let Some(entry) = state.tasks.get_mut(&task_id) else {
                        continue;
                    };
                    if entry.task.status != TaskStatus::Pending {
                        debug!("Skipping stale queue entry for task {}", task_id);
                        continue;
                    }

                    let unit = state.next_unit;
                    state.next_unit += 1;
                    let token = CancellationToken::new();

                    Arc::make_mut(&mut entry.task).mark_validating();
                    entry.active_unit = Some(unit);
                    self.persist_save(&entry.task);
                    state.running.insert(
                        unit,
                        RunningSlot {
                            task_id,
                            token: token.clone(),
                        },
                    );
                    admitted.push(Admission {
                        unit,
                        token,
                        task: Arc::clone(&entry.task),
                    });
                }

                if let Some(at) = state.pending.next_ready_at(now) {
                    let sooner = state.wake_at.map_or(true, |wake| wake <= now || at < wake);
                    if sooner {
                        state.wake_at = Some(at);
                        self.schedule_wake(at);
                    }
                }
            }

            if admitted.is_empty() {
                return;
            }

            for admission in admitted {
                debug!(
                    "Starting task {} (unit {})",
                    admission.task.id, admission.unit
                );
                let shared = Arc::clone(self);
                tokio::spawn(async move { shared.run_unit(admission).await });
            }
            self.notify();
        })
    }

    /// Re-run admission once a backoff delay expires
    fn schedule_wake(self: &Arc<Self>, at: Instant) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            sleep_until(at).await;
            if let Some(shared) = weak.upgrade() {
                shared.dispatch().await;
            }
        });
    }

    async fn run_unit(self: Arc<Self>, admission: Admission) {
        let Admission { unit, token, task } = admission;

        let handler = self.registry.get(&task.task_type).await;
        let sink: Arc<dyn ExecutionSink> = Arc::clone(&self) as Arc<dyn ExecutionSink>;
        let ctx = TaskContext::new(
            task.id.clone(),
            task.task_type.clone(),
            Arc::new(task.params.clone()),
            task.retry_count,
            unit,
            sink,
            token,
        );
        let timeout = task.timeout_seconds.map(Duration::from_secs);

        let outcome = self.executor.execute(handler, ctx, timeout).await;
        self.finish(&task.id, unit, outcome).await;
        self.dispatch().await;
    }

    /// Release the unit's slot and record the outcome if the unit still
    /// owns the task.
    async fn finish(&self, task_id: &str, unit: u64, outcome: ExecutionOutcome) {
        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            state.running.remove(&unit);

            match state.tasks.get_mut(task_id) {
                Some(entry) if entry.active_unit == Some(unit) => {
                    entry.active_unit = None;
                    let task = Arc::make_mut(&mut entry.task);
                    let resolution = self.executor.resolve(task, outcome);
                    let priority = task.priority;
                    self.persist_save(&entry.task);

                    match resolution {
                        Resolution::Retry(delay) => {
                            state.pending.push(
                                task_id.to_string(),
                                priority,
                                Some(Instant::now() + delay),
                            );
                        }
                        Resolution::Finished(status) => {
                            info!("Task {} finished with status {}", task_id, status);
                        }
                    }
                }
                _ => debug!("Discarding outcome of stale unit {} for task {}", unit, task_id),
            }
        }
        self.notify();
    }
}

#[async_trait]
impl ExecutionSink for Shared {
    async fn apply(&self, task_id: &str, unit: u64, update: ExecutionUpdate) -> bool {
        {
            let mut state = self.state.write().await;
            let Some(entry) = state.tasks.get_mut(task_id) else {
                return false;
            };
            if entry.active_unit != Some(unit) {
                return false;
            }

            let task = Arc::make_mut(&mut entry.task);
            match update {
                ExecutionUpdate::Stage(TaskStatus::Preparing) => task.mark_preparing(),
                ExecutionUpdate::Stage(TaskStatus::Running) => task.mark_running(),
                ExecutionUpdate::Stage(other) => {
                    warn!(task_id, "Ignoring unexpected stage {}", other);
                    return true;
                }
                ExecutionUpdate::Progress { percent, step } => {
                    let percent = percent.unwrap_or(task.progress);
                    task.update_progress(percent, step.as_deref());
                }
                ExecutionUpdate::Log(line) => task.add_log(line),
            }
            self.persist_save(&entry.task);
        }
        self.notify();
        true
    }
}
