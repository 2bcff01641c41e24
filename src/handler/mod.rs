//! Handler registry
//!
//! Every task type is executed by a [`TaskHandler`] registered under its
//! type tag. Domains (docker, ssh, ftp, ...) register their handlers once
//! at startup; the queue never interprets params itself.

/// Execution context passed to handlers
pub mod context;

pub use context::TaskContext;

use crate::task::{Params, TaskError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Executes tasks of one type
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Params that must be present (and non-null) for a submission to be accepted
    fn required_params(&self) -> &[&'static str] {
        &[]
    }

    /// Structural validation, run at submission and again before execution
    fn validate(&self, params: &Params) -> Result<(), TaskError> {
        check_required(params, self.required_params())
    }

    /// Run the task. Long running handlers should report progress and poll
    /// [`TaskContext::checkpoint`] between steps.
    async fn execute(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskError>;
}

/// Fail with a validation error naming the first missing param
pub fn check_required(params: &Params, required: &[&str]) -> Result<(), TaskError> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| params.get(*key).map_or(true, |v| v.is_null()))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(TaskError::validation(format!(
            "Missing required parameters: {}",
            missing.join(", ")
        ))
        .with_details(serde_json::json!({ "missing": missing })))
    }
}

/// Handler backed by an async closure
pub struct FnHandler<F> {
    required: Vec<&'static str>,
    func: F,
}

impl<F> FnHandler<F> {
    /// Declare params that must be present at submission
    pub fn requires(mut self, params: &[&'static str]) -> Self {
        self.required.extend_from_slice(params);
        self
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(func: F) -> FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, TaskError>> + Send + 'static,
{
    FnHandler {
        required: Vec::new(),
        func,
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, TaskError>> + Send + 'static,
{
    fn required_params(&self) -> &[&'static str] {
        &self.required
    }

    async fn execute(&self, ctx: TaskContext) -> Result<serde_json::Value, TaskError> {
        (self.func)(ctx).await
    }
}

/// Mapping from task type to handler. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TaskHandler>>>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type
    pub async fn register<H>(&self, task_type: impl Into<String>, handler: H)
    where
        H: TaskHandler + 'static,
    {
        self.register_arc(task_type, Arc::new(handler)).await;
    }

    /// Register a shared handler
    pub async fn register_arc(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        let mut handlers = self.handlers.write().await;
        if handlers.insert(task_type.clone(), handler).is_some() {
            info!("Replaced handler for task type {}", task_type);
        } else {
            debug!("Registered handler for task type {}", task_type);
        }
    }

    /// Remove the handler for a type, returning whether one was registered
    pub async fn unregister(&self, task_type: &str) -> bool {
        self.handlers.write().await.remove(task_type).is_some()
    }

    /// Look up the handler for a type
    pub async fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().await.get(task_type).cloned()
    }

    /// Check whether a type has a handler
    pub async fn contains(&self, task_type: &str) -> bool {
        self.handlers.read().await.contains_key(task_type)
    }

    /// Registered task types, sorted
    pub async fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        types.sort();
        types
    }
}
