//! Active process tracking
//!
//! The supervisor registers the process it is waiting on; the heartbeat
//! tick reads the registration to enforce the task timeout and to stop the
//! process on shutdown. Killing is requested through a cancellation token,
//! the supervisor owns the child and performs the actual kill.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug)]
struct TrackedProcess {
    label: String,
    started_at: Instant,
    timeout: Duration,
    kill: CancellationToken,
}

/// Shared handle to the process currently being supervised
#[derive(Debug, Clone, Default)]
pub struct ProcessTracker {
    inner: Arc<RwLock<Option<TrackedProcess>>>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process; the returned token fires when it must be killed
    pub async fn track(&self, label: impl Into<String>, timeout: Duration) -> CancellationToken {
        let kill = CancellationToken::new();
        *self.inner.write().await = Some(TrackedProcess {
            label: label.into(),
            started_at: Instant::now(),
            timeout,
            kill: kill.clone(),
        });
        kill
    }

    /// Forget the tracked process
    pub async fn clear(&self) {
        *self.inner.write().await = None;
    }

    /// Whether a process is currently tracked
    pub async fn is_active(&self) -> bool {
        self.inner.read().await.is_some()
    }

    /// Time since the tracked process started (or was last reset)
    pub async fn elapsed(&self) -> Option<Duration> {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|p| p.started_at.elapsed())
    }

    /// Kill the tracked process if it has outlived its timeout.
    ///
    /// The start time is reset after a kill so a process that is slow to
    /// exit is not reported again on the next tick.
    pub async fn check_timeout(&self) -> bool {
        let mut guard = self.inner.write().await;
        let Some(process) = guard.as_mut() else {
            return false;
        };

        if process.started_at.elapsed() <= process.timeout {
            return false;
        }

        warn!(
            "{} exceeded its timeout of {:?}, killing it",
            process.label, process.timeout
        );
        process.kill.cancel();
        process.started_at = Instant::now();
        true
    }

    /// Kill the tracked process regardless of elapsed time
    pub async fn kill(&self) -> bool {
        match self.inner.read().await.as_ref() {
            Some(process) => {
                info!("Stopping {}", process.label);
                process.kill.cancel();
                true
            }
            None => false,
        }
    }
}
