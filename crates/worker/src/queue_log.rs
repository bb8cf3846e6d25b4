//! Copies of dequeued task messages, for replaying a task by hand

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use stampede_core::Task;
use tracing::warn;

/// Writes each task to `<dir>/<queue>-<n>.log`, `n` counting from 1
#[derive(Debug)]
pub struct QueueLog {
    dir: PathBuf,
    queue: String,
    counter: AtomicU64,
}

impl QueueLog {
    pub fn new(dir: impl Into<PathBuf>, queue: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            queue: queue.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Save `task`. Failures are logged, never returned.
    pub async fn record(&self, task: &Task) -> Option<PathBuf> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(format!("{}-{}.log", self.queue, n));

        let data = match serde_json::to_vec_pretty(task) {
            Ok(data) => data,
            Err(e) => {
                warn!("Unable to encode task for the queue log: {}", e);
                return None;
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!("Unable to create queue log directory {:?}: {}", self.dir, e);
            return None;
        }
        match tokio::fs::write(&path, data).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("Unable to write queue log {:?}: {}", path, e);
                None
            }
        }
    }
}
