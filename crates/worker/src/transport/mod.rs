//! Task and response transports
//!
//! The worker pulls tasks from a [`TaskSource`] and publishes task updates
//! and heartbeats to a [`ResponseSink`]. Delivery is at least once; every
//! consumer of the response channel must tolerate duplicate updates.

mod file;
#[cfg(test)]
pub mod memory;
mod spool;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use stampede_core::Task;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::state::WorkerStatus;

pub use file::{TestFileSink, TestFileSource};
pub use spool::{SpoolSink, SpoolSource};

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid task message in {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unable to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Heartbeat published on every tick
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    pub node: String,
    pub version: String,
    pub worker_name: String,
    #[serde(rename = "workerID")]
    pub worker_id: String,
    pub status: WorkerStatus,
    pub last_task: Option<Task>,
    pub task_queue: String,
}

/// Message on the response channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "response", content = "payload", rename_all = "camelCase")]
pub enum ResponseMessage {
    TaskUpdate(Task),
    Heartbeat(Heartbeat),
}

/// Where tasks come from
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Wait for the next task. `None` means the source is exhausted or
    /// `shutdown` fired while waiting.
    async fn next_task(&self, shutdown: &CancellationToken) -> Result<Option<Task>>;

    /// The task finished; it must not be delivered again
    async fn complete(&self, task: &Task) -> Result<()>;

    /// The task was not finished; hand it back for redelivery
    async fn release(&self, task: &Task) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Where task updates and heartbeats go
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn publish(&self, message: &ResponseMessage) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_update_envelope() {
        let task = Task::new("t-1", "octo", "widgets", "main", 3);
        let value = serde_json::to_value(ResponseMessage::TaskUpdate(task)).unwrap();

        assert_eq!(value["response"], "taskUpdate");
        assert_eq!(value["payload"]["taskID"], "t-1");
        assert_eq!(value["payload"]["status"], "queued");
    }

    #[test]
    fn test_heartbeat_envelope() {
        let heartbeat = Heartbeat {
            timestamp: Utc::now(),
            node: "build-01".to_string(),
            version: "0.1.0".to_string(),
            worker_name: "ios-1".to_string(),
            worker_id: "w-1".to_string(),
            status: WorkerStatus::Idle,
            last_task: None,
            task_queue: "tasks".to_string(),
        };
        let value = serde_json::to_value(ResponseMessage::Heartbeat(heartbeat)).unwrap();

        assert_eq!(value["response"], "heartbeat");
        assert_eq!(value["payload"]["workerID"], "w-1");
        assert_eq!(value["payload"]["workerName"], "ios-1");
        assert_eq!(value["payload"]["status"], "idle");
        assert_eq!(value["payload"]["lastTask"], json!(null));
        assert_eq!(value["payload"]["taskQueue"], "tasks");
    }
}
