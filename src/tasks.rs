//! Background task plumbing shared by every periodic loop on a node.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum TaskState {
    Running,
    Stopped,
    /// The task hit an error it cannot recover from and exited
    Failed(String),
}

/// Last reported state of each background task on this node.
#[derive(Debug, Default)]
pub struct TaskHealth {
    tasks: DashMap<String, TaskState>,
}

impl TaskHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, task: &str, state: TaskState) {
        if let TaskState::Failed(reason) = &state {
            tracing::error!(task, reason = %reason, "Background task failed");
        }
        self.tasks.insert(task.to_string(), state);
    }

    pub fn get(&self, task: &str) -> Option<TaskState> {
        self.tasks.get(task).map(|state| state.clone())
    }

    /// Healthy unless some task has failed.
    pub fn is_healthy(&self) -> bool {
        !self
            .tasks
            .iter()
            .any(|entry| matches!(entry.value(), TaskState::Failed(_)))
    }

    pub fn snapshot(&self) -> BTreeMap<String, TaskState> {
        self.tasks
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// A unit of work repeated on a fixed interval.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// Checked before every tick. Leader-only tasks return false while the
    /// node is a follower.
    fn should_run(&self) -> bool {
        true
    }

    /// One pass of the task. Long passes should check `shutdown` between
    /// items rather than abandoning an item half way.
    async fn tick(&self, shutdown: &CancellationToken) -> Result<()>;

    /// Called once after the loop ends because of shutdown.
    async fn on_shutdown(&self) {}
}

/// Run `task` until `shutdown` fires. A failed tick is logged and retried on
/// the next interval; only the sleep between ticks is cancelled.
pub async fn run_periodic(
    task: Arc<dyn PeriodicTask>,
    health: Arc<TaskHealth>,
    shutdown: CancellationToken,
) {
    let name = task.name();
    health.set(name, TaskState::Running);
    tracing::debug!(task = name, interval = ?task.interval(), "Periodic task started");

    loop {
        if task.should_run() {
            if let Err(e) = task.tick(&shutdown).await {
                tracing::warn!(task = name, error = %e, "Periodic task tick failed");
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(task.interval()) => {}
        }
    }

    task.on_shutdown().await;
    health.set(name, TaskState::Stopped);
    tracing::debug!(task = name, "Periodic task stopped");
}

/// Run a long-lived task that only returns early on a fatal error, such as a
/// subscription that could not be established. The error ends this task
/// alone and is recorded as its health state.
pub async fn supervise<F>(name: &'static str, health: Arc<TaskHealth>, task: F)
where
    F: Future<Output = Result<()>>,
{
    health.set(name, TaskState::Running);
    match task.await {
        Ok(()) => health.set(name, TaskState::Stopped),
        Err(e) => health.set(name, TaskState::Failed(e.to_string())),
    }
}
