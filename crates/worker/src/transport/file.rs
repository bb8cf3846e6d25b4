//! Test mode transport: one task read from a file, every response written
//! to its own numbered file

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use stampede_core::Task;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{ResponseMessage, ResponseSink, Result, TaskSource, TransportError};

/// Yields the task stored in a JSON file exactly once
#[derive(Debug)]
pub struct TestFileSource {
    path: PathBuf,
    delivered: AtomicBool,
}

impl TestFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delivered: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TaskSource for TestFileSource {
    async fn next_task(&self, _shutdown: &CancellationToken) -> Result<Option<Task>> {
        if self.delivered.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        let data = tokio::fs::read(&self.path)
            .await
            .map_err(|e| TransportError::io(&self.path, e))?;
        let task = serde_json::from_slice(&data).map_err(|source| TransportError::Decode {
            path: self.path.clone(),
            source,
        })?;
        info!("Loaded test task from {:?}", self.path);
        Ok(Some(task))
    }

    async fn complete(&self, _task: &Task) -> Result<()> {
        Ok(())
    }

    async fn release(&self, _task: &Task) -> Result<()> {
        Ok(())
    }
}

/// Writes every response to `<prefix>-<n>.log`, `n` counting from 1
#[derive(Debug)]
pub struct TestFileSink {
    prefix: PathBuf,
    counter: AtomicU64,
}

impl TestFileSink {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }

    fn next_path(&self) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let mut name = self.prefix.clone().into_os_string();
        name.push(format!("-{}.log", n));
        PathBuf::from(name)
    }
}

#[async_trait]
impl ResponseSink for TestFileSink {
    async fn publish(&self, message: &ResponseMessage) -> Result<()> {
        let path = self.next_path();
        let data = serde_json::to_vec_pretty(message)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| TransportError::io(&path, e))?;
        Ok(())
    }
}
