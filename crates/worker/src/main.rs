//! Stampede worker
//!
//! Pulls CI tasks from its task source, prepares a git working directory for
//! each, runs the configured command and reports status and results on the
//! response channel.

mod config;
mod coordinator;
mod heartbeat;
mod queue_log;
mod shutdown;
mod state;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use git_workdir::{GitCli, GitIdentity, WorkingDirectoryPreparer, WorkspaceLayout};
use task_runner::{ProcessTracker, TaskExecutionSupervisor};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Cli, LogFormat, Settings, TransportSettings};
use crate::coordinator::TaskCoordinator;
use crate::heartbeat::HeartbeatTicker;
use crate::queue_log::QueueLog;
use crate::state::{WorkerIdentity, WorkerState};
use crate::transport::{
    ResponseSink, SpoolSink, SpoolSource, TaskSource, TestFileSink, TestFileSource,
};

/// How often an empty spool inbox is checked
const SPOOL_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let settings = match Settings::load(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}. Unable to start worker.", e);
            std::process::exit(1);
        }
    };

    run(settings).await
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stampede_worker=info,git_workdir=info,task_runner=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let identity = WorkerIdentity::new(&settings.node_name, &settings.worker_name);
    info!(
        worker_id = %identity.worker_id,
        "Starting stampede worker {}", identity.version
    );
    info!("Node name: {}", settings.node_name);
    info!("Worker name: {}", settings.worker_name);
    info!("Task queue: {}", settings.task_queue);
    info!("Script root: {:?}", settings.script_root);
    info!("Workspace root: {:?}", settings.workspace_root);

    let state = Arc::new(WorkerState::new(ProcessTracker::new()));

    let git = match (&settings.git_user_name, &settings.git_user_email) {
        (Some(name), Some(email)) => GitCli::with_identity(GitIdentity {
            name: name.clone(),
            email: email.clone(),
        }),
        _ => GitCli::new(),
    };
    let preparer = WorkingDirectoryPreparer::with_backend(
        WorkspaceLayout::new(&settings.workspace_root),
        Arc::new(git),
    );
    let supervisor = TaskExecutionSupervisor::new(&settings.script_root, state.tracker().clone());

    let (source, sink): (Arc<dyn TaskSource>, Arc<dyn ResponseSink>) = match &settings.transport
    {
        TransportSettings::Spool(dir) => {
            info!("Spool directory: {:?}", dir);
            let source = SpoolSource::open(dir, SPOOL_POLL_INTERVAL)
                .await
                .context("opening spool inbox")?;
            let sink = SpoolSink::open(dir, &settings.response_queue)
                .await
                .context("opening spool outbox")?;
            (Arc::new(source), Arc::new(sink))
        }
        TransportSettings::TestFiles { task, responses } => {
            info!("Test mode: running {:?}, responses to {:?}", task, responses);
            (
                Arc::new(TestFileSource::new(task)),
                Arc::new(TestFileSink::new(responses)),
            )
        }
    };

    let mut ticker = HeartbeatTicker::new(
        Duration::from_millis(settings.heartbeat_interval),
        state.clone(),
        identity.clone(),
        &settings.task_queue,
    );
    if !settings.is_test_mode() {
        ticker = ticker.with_sink(sink.clone());
    }
    let stop_heartbeat = CancellationToken::new();
    let heartbeat = tokio::spawn(ticker.run(stop_heartbeat.clone()));

    shutdown::install_shutdown_handler(state.clone());

    let mut coordinator = TaskCoordinator::new(
        identity,
        state,
        settings.task_defaults.clone(),
        preparer,
        supervisor,
        source,
        sink,
    )
    .with_log_files(
        &settings.environment_log_file,
        &settings.task_details_log_file,
    );
    if let Some(path) = &settings.log_queue_path {
        coordinator = coordinator.with_queue_log(QueueLog::new(path, &settings.task_queue));
    }

    let result = coordinator.run().await;

    stop_heartbeat.cancel();
    if let Err(e) = heartbeat.await {
        error!("Heartbeat task failed: {}", e);
    }
    info!("Worker stopped");
    result
}
