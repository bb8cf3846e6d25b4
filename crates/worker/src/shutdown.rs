use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use std::sync::Arc;

use crate::state::WorkerState;

/// Request a graceful shutdown of `state` on SIGTERM or SIGINT.
///
/// An idle worker stops straight away. A busy worker stops its task process
/// on the next heartbeat tick, requeues the task and then exits.
pub fn install_shutdown_handler(state: Arc<WorkerState>) {
    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
        }

        state.request_shutdown();
    });
}
