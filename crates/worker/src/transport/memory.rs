//! In-memory transport used by the coordinator tests

use std::collections::VecDeque;

use async_trait::async_trait;
use stampede_core::Task;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{ResponseMessage, ResponseSink, Result, TaskSource};

#[derive(Debug, Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<Task>>,
    completed: Mutex<Vec<String>>,
    released: Mutex<Vec<Task>>,
    published: Mutex<Vec<ResponseMessage>>,
}

impl MemoryQueue {
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            pending: Mutex::new(tasks.into_iter().collect()),
            ..Default::default()
        }
    }

    pub async fn published(&self) -> Vec<ResponseMessage> {
        self.published.lock().await.clone()
    }

    /// Task snapshots published as task updates, in order
    pub async fn updates(&self) -> Vec<Task> {
        self.published
            .lock()
            .await
            .iter()
            .filter_map(|m| match m {
                ResponseMessage::TaskUpdate(task) => Some(task.clone()),
                ResponseMessage::Heartbeat(_) => None,
            })
            .collect()
    }

    pub async fn completed(&self) -> Vec<String> {
        self.completed.lock().await.clone()
    }

    pub async fn released(&self) -> Vec<Task> {
        self.released.lock().await.clone()
    }
}

#[async_trait]
impl TaskSource for MemoryQueue {
    async fn next_task(&self, shutdown: &CancellationToken) -> Result<Option<Task>> {
        if shutdown.is_cancelled() {
            return Ok(None);
        }
        Ok(self.pending.lock().await.pop_front())
    }

    async fn complete(&self, task: &Task) -> Result<()> {
        self.completed.lock().await.push(task.task_id.clone());
        Ok(())
    }

    async fn release(&self, task: &Task) -> Result<()> {
        self.released.lock().await.push(task.clone());
        Ok(())
    }
}

#[async_trait]
impl ResponseSink for MemoryQueue {
    async fn publish(&self, message: &ResponseMessage) -> Result<()> {
        self.published.lock().await.push(message.clone());
        Ok(())
    }
}
