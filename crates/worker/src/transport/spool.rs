//! Spool directory transport
//!
//! ```text
//! <spoolDir>/
//!   inbox/     tasks waiting to be picked up (*.json)
//!   claimed/   tasks taken by a worker
//!   outbox/    responses, <responseQueue>-<n>.json
//! ```
//!
//! A task is claimed by renaming it out of `inbox/`, so several workers can
//! share one spool. Released tasks go back to `inbox/`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use stampede_core::Task;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ResponseMessage, ResponseSink, Result, TaskSource, TransportError};

const INBOX: &str = "inbox";
const CLAIMED: &str = "claimed";
const OUTBOX: &str = "outbox";

async fn ensure_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| TransportError::io(path, e))
}

/// Claims tasks from `<spoolDir>/inbox`
#[derive(Debug)]
pub struct SpoolSource {
    inbox: PathBuf,
    claimed: PathBuf,
    poll_interval: Duration,
    /// Claimed file names by task id
    in_flight: Mutex<HashMap<String, String>>,
}

impl SpoolSource {
    pub async fn open(spool_dir: &Path, poll_interval: Duration) -> Result<Self> {
        let inbox = spool_dir.join(INBOX);
        let claimed = spool_dir.join(CLAIMED);
        ensure_dir(&inbox).await?;
        ensure_dir(&claimed).await?;

        Ok(Self {
            inbox,
            claimed,
            poll_interval,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    async fn inbox_entries(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.inbox)
            .await
            .map_err(|e| TransportError::io(&self.inbox, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TransportError::io(&self.inbox, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Claim the oldest task in the inbox, if any
    async fn try_claim(&self) -> Result<Option<Task>> {
        for name in self.inbox_entries().await? {
            let from = self.inbox.join(&name);
            let to = self.claimed.join(&name);
            match tokio::fs::rename(&from, &to).await {
                Ok(()) => {}
                // Another worker got there first
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(TransportError::io(&from, e)),
            }

            let data = tokio::fs::read(&to)
                .await
                .map_err(|e| TransportError::io(&to, e))?;
            let task: Task = match serde_json::from_slice(&data) {
                Ok(task) => task,
                Err(e) => {
                    warn!("Discarding invalid task {:?}: {}", to, e);
                    let rejected = self.claimed.join(format!("{}.invalid", name));
                    if let Err(e) = tokio::fs::rename(&to, &rejected).await {
                        warn!("Unable to set aside {:?}: {}", to, e);
                    }
                    continue;
                }
            };

            info!(task_id = %task.task_id, "Claimed {}", name);
            self.in_flight
                .lock()
                .await
                .insert(task.task_id.clone(), name);
            return Ok(Some(task));
        }
        Ok(None)
    }
}

#[async_trait]
impl TaskSource for SpoolSource {
    async fn next_task(&self, shutdown: &CancellationToken) -> Result<Option<Task>> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(None);
            }
            if let Some(task) = self.try_claim().await? {
                return Ok(Some(task));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.cancelled() => return Ok(None),
            }
        }
    }

    async fn complete(&self, task: &Task) -> Result<()> {
        let Some(name) = self.in_flight.lock().await.remove(&task.task_id) else {
            return Ok(());
        };
        let path = self.claimed.join(&name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransportError::io(&path, e)),
        }
    }

    async fn release(&self, task: &Task) -> Result<()> {
        let name = self
            .in_flight
            .lock()
            .await
            .remove(&task.task_id)
            .unwrap_or_else(|| format!("{}.json", task.task_id));

        // The requeued copy carries the task's current state
        let path = self.inbox.join(&name);
        let data = serde_json::to_vec_pretty(task)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| TransportError::io(&path, e))?;

        let claimed = self.claimed.join(&name);
        if let Err(e) = tokio::fs::remove_file(&claimed).await {
            debug!("No claimed copy to remove at {:?}: {}", claimed, e);
        }
        info!(task_id = %task.task_id, "Released {} back to the inbox", name);
        Ok(())
    }
}

/// Writes responses to `<spoolDir>/outbox/<responseQueue>-<n>.json`
#[derive(Debug)]
pub struct SpoolSink {
    outbox: PathBuf,
    queue: String,
    counter: AtomicU64,
}

impl SpoolSink {
    pub async fn open(spool_dir: &Path, queue: impl Into<String>) -> Result<Self> {
        let outbox = spool_dir.join(OUTBOX);
        ensure_dir(&outbox).await?;
        Ok(Self {
            outbox,
            queue: queue.into(),
            counter: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl ResponseSink for SpoolSink {
    async fn publish(&self, message: &ResponseMessage) -> Result<()> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("{}-{}.json", self.queue, n);
        let data = serde_json::to_vec(message)?;

        // Readers only ever see complete files
        let partial = self.outbox.join(format!(".{}.tmp", name));
        let path = self.outbox.join(&name);
        tokio::fs::write(&partial, data)
            .await
            .map_err(|e| TransportError::io(&partial, e))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| TransportError::io(&path, e))?;
        Ok(())
    }
}
