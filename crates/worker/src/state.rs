//! Worker state shared between the coordinator and the heartbeat tick

use serde::Serialize;
use stampede_core::Task;
use task_runner::ProcessTracker;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    #[default]
    Idle,
    Busy,
}

/// Who this worker is, as reported in task records and heartbeats
#[derive(Debug, Clone)]
pub struct WorkerIdentity {
    pub node: String,
    pub version: String,
    pub worker_name: String,
    pub worker_id: String,
}

impl WorkerIdentity {
    pub fn new(node: impl Into<String>, worker_name: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            worker_name: worker_name.into(),
            worker_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Mutable worker state. Written by the coordinator, read by the heartbeat.
#[derive(Debug, Default)]
pub struct WorkerState {
    status: RwLock<WorkerStatus>,
    last_task: RwLock<Option<Task>>,
    shutdown: CancellationToken,
    tracker: ProcessTracker,
}

impl WorkerState {
    pub fn new(tracker: ProcessTracker) -> Self {
        Self {
            tracker,
            ..Default::default()
        }
    }

    pub async fn status(&self) -> WorkerStatus {
        *self.status.read().await
    }

    pub async fn last_task(&self) -> Option<Task> {
        self.last_task.read().await.clone()
    }

    /// Mark the worker busy with `task`
    pub async fn begin(&self, task: &Task) {
        *self.status.write().await = WorkerStatus::Busy;
        *self.last_task.write().await = Some(task.clone());
    }

    /// Record the final state of the current task and go idle
    pub async fn finish(&self, task: &Task) {
        *self.last_task.write().await = Some(task.clone());
        *self.status.write().await = WorkerStatus::Idle;
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_pending(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled once shutdown has been requested
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn tracker(&self) -> &ProcessTracker {
        &self.tracker
    }
}
