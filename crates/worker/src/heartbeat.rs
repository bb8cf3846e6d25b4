//! Heartbeat tick
//!
//! Every tick publishes a heartbeat (when a sink is attached), kills the
//! active task process once it outlives its timeout and, after shutdown has
//! been requested, stops the active process so the coordinator can requeue
//! its task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::state::{WorkerIdentity, WorkerState};
use crate::transport::{Heartbeat, ResponseMessage, ResponseSink};

pub struct HeartbeatTicker {
    interval: Duration,
    state: Arc<WorkerState>,
    identity: WorkerIdentity,
    task_queue: String,
    sink: Option<Arc<dyn ResponseSink>>,
}

impl HeartbeatTicker {
    pub fn new(
        interval: Duration,
        state: Arc<WorkerState>,
        identity: WorkerIdentity,
        task_queue: impl Into<String>,
    ) -> Self {
        Self {
            interval,
            state,
            identity,
            task_queue: task_queue.into(),
            sink: None,
        }
    }

    /// Publish heartbeats to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn ResponseSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub async fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            timestamp: Utc::now(),
            node: self.identity.node.clone(),
            version: self.identity.version.clone(),
            worker_name: self.identity.worker_name.clone(),
            worker_id: self.identity.worker_id.clone(),
            status: self.state.status().await,
            last_task: self.state.last_task().await,
            task_queue: self.task_queue.clone(),
        }
    }

    /// One heartbeat cycle
    pub async fn tick(&self) {
        if let Some(sink) = &self.sink {
            let message = ResponseMessage::Heartbeat(self.heartbeat().await);
            if let Err(e) = sink.publish(&message).await {
                warn!("Failed to publish heartbeat: {}", e);
            }
        }

        let tracker = self.state.tracker();
        if self.state.shutdown_pending() {
            tracker.kill().await;
        } else {
            tracker.check_timeout().await;
        }
    }

    /// Tick every interval until `stop` is cancelled
    pub async fn run(self, stop: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = stop.cancelled() => {
                    debug!("Heartbeat stopped");
                    break;
                }
            }
        }
    }
}
