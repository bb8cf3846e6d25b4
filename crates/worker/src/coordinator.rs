//! Task coordinator
//!
//! Pulls one task at a time and walks it through
//! `resolve -> prepare -> environment -> execute -> report`. A snapshot of
//! the task is published after every status transition. Failures of any
//! step end up as the task's conclusion; the worker itself keeps running.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use git_workdir::WorkingDirectoryPreparer;
use stampede_core::environment::{self, render_exports, Environment};
use stampede_core::task::{TaskStats, WorkerInfo};
use stampede_core::{Conclusion, ExecutionPlan, Task, TaskDefaults, TaskStatus};
use task_runner::TaskExecutionSupervisor;
use tracing::{error, info, warn};

use crate::queue_log::QueueLog;
use crate::state::{WorkerIdentity, WorkerState};
use crate::transport::{ResponseMessage, ResponseSink, TaskSource};

pub const WORKDIR_ERROR_SUMMARY: &str = "Working directory error";
pub const RELEASE_BODY_FILE: &str = "releasebody.txt";

/// Pause before asking a failing source again
const RECEIVE_RETRY: Duration = Duration::from_secs(5);

/// What became of a handled task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Requeued,
}

pub struct TaskCoordinator {
    identity: WorkerIdentity,
    state: Arc<WorkerState>,
    defaults: TaskDefaults,
    preparer: WorkingDirectoryPreparer,
    supervisor: TaskExecutionSupervisor,
    source: Arc<dyn TaskSource>,
    sink: Arc<dyn ResponseSink>,
    queue_log: Option<QueueLog>,
    environment_log_file: String,
    task_details_log_file: String,
}

impl TaskCoordinator {
    pub fn new(
        identity: WorkerIdentity,
        state: Arc<WorkerState>,
        defaults: TaskDefaults,
        preparer: WorkingDirectoryPreparer,
        supervisor: TaskExecutionSupervisor,
        source: Arc<dyn TaskSource>,
        sink: Arc<dyn ResponseSink>,
    ) -> Self {
        Self {
            identity,
            state,
            defaults,
            preparer,
            supervisor,
            source,
            sink,
            queue_log: None,
            environment_log_file: "environment.log".to_string(),
            task_details_log_file: "worker.log".to_string(),
        }
    }

    /// Keep a copy of every received task
    pub fn with_queue_log(mut self, queue_log: QueueLog) -> Self {
        self.queue_log = Some(queue_log);
        self
    }

    /// File names for the environment dump and the final task record.
    /// An empty name disables that file.
    pub fn with_log_files(
        mut self,
        environment_log_file: impl Into<String>,
        task_details_log_file: impl Into<String>,
    ) -> Self {
        self.environment_log_file = environment_log_file.into();
        self.task_details_log_file = task_details_log_file.into();
        self
    }

    /// Handle tasks until the source is exhausted or shutdown is requested
    pub async fn run(&self) -> anyhow::Result<()> {
        let shutdown = self.state.shutdown_token().clone();

        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, no longer accepting tasks");
                break;
            }

            let task = match self.source.next_task(&shutdown).await {
                Ok(Some(task)) => task,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to receive task: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(RECEIVE_RETRY) => continue,
                        _ = shutdown.cancelled() => break,
                    }
                }
            };

            if let Some(queue_log) = &self.queue_log {
                queue_log.record(&task).await;
            }
            self.handle_task(task).await;
        }

        info!("Closing queues");
        self.source.close().await.context("closing task source")?;
        self.sink.close().await.context("closing response sink")?;
        Ok(())
    }

    /// Run one task to completion and report it
    pub async fn handle_task(&self, mut task: Task) -> Disposition {
        info!(
            task_id = %task.task_id,
            "Handling {}/{} {} #{} ({})",
            task.owner, task.repository, task.build_key, task.build_number, task.task.id
        );

        self.state.begin(&task).await;
        task.status = TaskStatus::InProgress;
        task.stats.started_at = Some(Utc::now());
        task.worker = Some(WorkerInfo {
            node: self.identity.node.clone(),
            version: self.identity.version.clone(),
            worker_id: self.identity.worker_id.clone(),
            worker_name: Some(self.identity.worker_name.clone()),
            directory: None,
        });
        self.publish(&task).await;

        let (conclusion, directory) = self.execute(&mut task).await;

        if self.state.shutdown_pending() {
            warn!(task_id = %task.task_id, "Shutdown during task, returning it to the queue");
            task.status = TaskStatus::Queued;
            task.stats = TaskStats::default();
            task.result = None;
            self.publish(&task).await;
            if let Err(e) = self.source.release(&task).await {
                error!(task_id = %task.task_id, "Failed to requeue task: {}", e);
            }
            self.state.finish(&task).await;
            return Disposition::Requeued;
        }

        info!(
            task_id = %task.task_id,
            "Task finished: {} ({})",
            conclusion.conclusion.as_str(),
            conclusion.summary
        );
        task.stats.finished_at = Some(Utc::now());
        task.status = TaskStatus::Completed;
        task.result = Some(conclusion);

        if let Some(directory) = &directory {
            self.write_task_details(&task, directory).await;
        }
        self.publish(&task).await;
        if let Err(e) = self.source.complete(&task).await {
            error!(task_id = %task.task_id, "Failed to acknowledge task: {}", e);
        }
        self.state.finish(&task).await;
        Disposition::Completed
    }

    /// Resolve, prepare and run the task. Returns the conclusion and, once
    /// it exists, the working directory.
    async fn execute(&self, task: &mut Task) -> (Conclusion, Option<PathBuf>) {
        let plan = match ExecutionPlan::resolve(task, &self.defaults) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(task_id = %task.task_id, "Invalid task configuration: {}", e);
                return (
                    Conclusion::failure(e.kind()).with_text(e.to_string()),
                    None,
                );
            }
        };

        let prepared = match self.preparer.prepare(task, &plan).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(task_id = %task.task_id, kind = e.kind(), "Unable to prepare working directory: {}", e);
                return (
                    Conclusion::failure(WORKDIR_ERROR_SUMMARY)
                        .with_text(format!("{}: {}", e.kind(), e)),
                    None,
                );
            }
        };
        let directory = prepared.directory;

        if let Some(worker) = task.worker.as_mut() {
            worker.directory = Some(directory.display().to_string());
        }
        if let Some(sha) = prepared.sha {
            if let Some(branch) = task.scm.branch.as_mut() {
                info!(task_id = %task.task_id, "Branch {} resolved to {}", branch.name, sha);
                branch.sha = sha;
                branch.commit = prepared.commit;
            }
        }

        self.write_release_body(task, &directory).await;

        let env = environment::build(task, &plan, &directory);
        self.write_environment_log(&env, &directory).await;

        let conclusion = self.supervisor.run(&plan, &directory, &env).await;
        (conclusion, Some(directory))
    }

    async fn publish(&self, task: &Task) {
        let message = ResponseMessage::TaskUpdate(task.clone());
        if let Err(e) = self.sink.publish(&message).await {
            error!(task_id = %task.task_id, "Failed to publish task update: {}", e);
        }
    }

    async fn write_release_body(&self, task: &Task, directory: &Path) {
        let Some(release) = &task.scm.release else {
            return;
        };
        if release.body.is_empty() {
            return;
        }
        let path = directory.join(RELEASE_BODY_FILE);
        if let Err(e) = tokio::fs::write(&path, &release.body).await {
            warn!("Unable to write {:?}: {}", path, e);
        }
    }

    async fn write_environment_log(&self, env: &Environment, directory: &Path) {
        if self.environment_log_file.is_empty() {
            return;
        }
        let path = directory.join(&self.environment_log_file);
        if let Err(e) = tokio::fs::write(&path, render_exports(env)).await {
            warn!("Unable to write environment log {:?}: {}", path, e);
        }
    }

    async fn write_task_details(&self, task: &Task, directory: &Path) {
        if self.task_details_log_file.is_empty() {
            return;
        }
        let path = directory.join(&self.task_details_log_file);
        let written = match serde_json::to_vec_pretty(task) {
            Ok(data) => tokio::fs::write(&path, data).await.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            warn!("Unable to write task details {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::HeartbeatTicker;
    use crate::transport::memory::MemoryQueue;
    use git_workdir::WorkspaceLayout;
    use stampede_core::task::{Release, Scm, LATEST_SHA};
    use stampede_core::{GitCloneMode, Outcome, WorkerConfig};
    use std::os::unix::fs::PermissionsExt;
    use std::process::Command;
    use task_runner::{ProcessTracker, MISCONFIGURED_SUMMARY, SUCCESS_SUMMARY};
    use tempfile::TempDir;

    struct Harness {
        scripts: TempDir,
        _workspace: TempDir,
        queue: Arc<MemoryQueue>,
        state: Arc<WorkerState>,
        coordinator: TaskCoordinator,
    }

    fn harness_with_root(tasks: Vec<Task>, workspace: TempDir, root: PathBuf) -> Harness {
        let scripts = TempDir::new().unwrap();
        let queue = Arc::new(MemoryQueue::with_tasks(tasks));
        let state = Arc::new(WorkerState::new(ProcessTracker::new()));
        let defaults = TaskDefaults {
            git_clone: GitCloneMode::None,
            shell: Some("/bin/sh".to_string()),
            ..TaskDefaults::default()
        };

        let coordinator = TaskCoordinator::new(
            WorkerIdentity::new("build-01", "ios-1"),
            state.clone(),
            defaults,
            WorkingDirectoryPreparer::new(WorkspaceLayout::new(root)),
            TaskExecutionSupervisor::new(scripts.path(), state.tracker().clone()),
            queue.clone(),
            queue.clone(),
        );

        Harness {
            scripts,
            _workspace: workspace,
            queue,
            state,
            coordinator,
        }
    }

    fn harness(tasks: Vec<Task>) -> Harness {
        let workspace = TempDir::new().unwrap();
        let root = workspace.path().to_path_buf();
        harness_with_root(tasks, workspace, root)
    }

    impl Harness {
        fn script(&self, name: &str, body: &str) {
            let path = self.scripts.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    fn task(command: &str) -> Task {
        Task::new("t-1", "octo", "widgets", "main", 7)
            .with_task_ref("build", 1)
            .with_scm(Scm::for_branch("main", "abc123"))
            .with_worker_config(WorkerConfig::with_command(command))
    }

    fn directory_of(task: &Task) -> PathBuf {
        PathBuf::from(task.worker.as_ref().unwrap().directory.as_ref().unwrap())
    }

    #[tokio::test]
    async fn test_successful_task_lifecycle() {
        let h = harness(vec![task("build.sh")]);
        h.script("build.sh", "echo \"owner=$STAMP_OWNER sha=$STAMP_GITSHA\"");

        h.coordinator.run().await.unwrap();

        let updates = h.queue.updates().await;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].status, TaskStatus::InProgress);
        assert!(updates[0].stats.started_at.is_some());
        assert_eq!(updates[0].worker.as_ref().unwrap().node, "build-01");

        let done = &updates[1];
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.stats.finished_at.is_some());
        let result = done.result.as_ref().unwrap();
        assert_eq!(result.conclusion, Outcome::Success);
        assert_eq!(result.summary, SUCCESS_SUMMARY);

        let dir = directory_of(done);
        assert!(dir.ends_with("octo-widgets/main/7/build-1"));
        assert_eq!(
            std::fs::read_to_string(dir.join("stdout.log")).unwrap(),
            "owner=octo sha=abc123\n"
        );
        let env_log = std::fs::read_to_string(dir.join("environment.log")).unwrap();
        assert!(env_log.contains("export STAMP_REPO=\"widgets\"\n"));
        let details: Task =
            serde_json::from_str(&std::fs::read_to_string(dir.join("worker.log")).unwrap())
                .unwrap();
        assert_eq!(details.status, TaskStatus::Completed);

        assert_eq!(h.queue.completed().await, vec!["t-1".to_string()]);
        assert_eq!(h.state.status().await, crate::state::WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn test_missing_command_completes_with_config_error() {
        let mut bad = task("unused");
        bad.worker_config = None;
        let h = harness(vec![bad]);

        h.coordinator.run().await.unwrap();

        let updates = h.queue.updates().await;
        assert_eq!(updates.len(), 2);
        let result = updates[1].result.as_ref().unwrap();
        assert_eq!(result.conclusion, Outcome::Failure);
        assert_eq!(result.summary, "task-config-missing-task-command");
        assert_eq!(updates[1].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_working_directory_error() {
        let workspace = TempDir::new().unwrap();
        let blocker = workspace.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let h = harness_with_root(vec![task("build.sh")], workspace, blocker);

        h.coordinator.run().await.unwrap();

        let updates = h.queue.updates().await;
        let result = updates[1].result.as_ref().unwrap();
        assert_eq!(result.summary, WORKDIR_ERROR_SUMMARY);
        assert!(result.text.starts_with("mkdir-error: "));
    }

    #[tokio::test]
    async fn test_missing_script_is_reported() {
        let h = harness(vec![task("nope.sh")]);
        h.coordinator.run().await.unwrap();

        let updates = h.queue.updates().await;
        assert_eq!(
            updates[1].result.as_ref().unwrap().summary,
            MISCONFIGURED_SUMMARY
        );
        // The worker moves on to the next task afterwards
        assert_eq!(h.state.status().await, crate::state::WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn test_release_body_and_queue_log() {
        let release = Release {
            tag: "v1.0.0".to_string(),
            sha: "feed".to_string(),
            name: "One".to_string(),
            body: "Release notes".to_string(),
        };
        let mut t = task("build.sh");
        t.scm = Scm::for_release(release);
        let mut h = harness(vec![t]);
        h.script("build.sh", "cat releasebody.txt");
        let log_dir = TempDir::new().unwrap();
        h.coordinator = h
            .coordinator
            .with_queue_log(QueueLog::new(log_dir.path(), "tasks"));

        h.coordinator.run().await.unwrap();

        let done = &h.queue.updates().await[1];
        assert_eq!(
            std::fs::read_to_string(directory_of(done).join("stdout.log")).unwrap(),
            "Release notes"
        );
        assert!(log_dir.path().join("tasks-1.log").exists());
    }

    #[tokio::test]
    async fn test_shutdown_requeues_running_task() {
        let h = harness(vec![task("hang.sh")]);
        h.script("hang.sh", "sleep 30");

        let ticker = HeartbeatTicker::new(
            Duration::from_millis(20),
            h.state.clone(),
            WorkerIdentity::new("build-01", "ios-1"),
            "tasks",
        );
        let stop = tokio_util::sync::CancellationToken::new();
        let heartbeat = tokio::spawn(ticker.run(stop.clone()));

        let state = h.state.clone();
        tokio::spawn(async move {
            while !state.tracker().is_active().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            state.request_shutdown();
        });

        tokio::time::timeout(Duration::from_secs(10), h.coordinator.run())
            .await
            .unwrap()
            .unwrap();
        stop.cancel();
        heartbeat.await.unwrap();

        let updates = h.queue.updates().await;
        assert_eq!(updates.last().unwrap().status, TaskStatus::Queued);
        assert!(updates.last().unwrap().result.is_none());
        let released = h.queue.released().await;
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].task_id, "t-1");
        assert!(h.queue.completed().await.is_empty());
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    #[tokio::test]
    async fn test_latest_branch_sha_is_recorded() {
        let source = TempDir::new().unwrap();
        git(source.path(), &["init"]);
        git(source.path(), &["config", "user.email", "test@test.com"]);
        git(source.path(), &["config", "user.name", "Test"]);
        git(source.path(), &["checkout", "-b", "main"]);
        std::fs::write(source.path().join("README.md"), "hello\n").unwrap();
        git(source.path(), &["add", "."]);
        git(source.path(), &["commit", "-m", "Initial commit"]);
        let head = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(source.path())
            .output()
            .unwrap();
        let head = String::from_utf8_lossy(&head.stdout).trim().to_string();

        let mut t = task("build.sh");
        t.scm = Scm::for_branch("main", LATEST_SHA)
            .with_ssh_url(format!("file://{}", source.path().display()));
        t.worker_config = Some(WorkerConfig {
            git_clone: Some(GitCloneMode::Ssh),
            ..WorkerConfig::with_command("build.sh")
        });
        let h = harness(vec![t]);
        h.script("build.sh", "cat README.md");

        h.coordinator.run().await.unwrap();

        let done = &h.queue.updates().await[1];
        let branch = done.scm.branch.as_ref().unwrap();
        assert_eq!(branch.sha, head);
        assert_eq!(branch.commit.as_deref(), Some("Initial commit"));
        assert!(done.result.as_ref().unwrap().is_success());
    }
}
