//! Task execution supervisor
//!
//! Runs the resolved task command inside its working directory and turns
//! whatever happens into a [`Conclusion`]. Nothing escapes as an error: a
//! task that cannot be started, times out or fails internally still
//! produces a failure conclusion.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use futures::FutureExt;
use stampede_core::conclusion::DEFAULT_TITLE;
use stampede_core::{Conclusion, Environment, ExecutionPlan, Outcome};
use tracing::{error, info, warn};

use crate::conclusion::{assemble, ConclusionRequest};
use crate::error::{Result, RunnerError};
use crate::process::{self, ProcessSpec};
use crate::script::{ScriptRegistry, TaskLog};
use crate::tracker::ProcessTracker;

pub const SUCCESS_SUMMARY: &str = "Task was successful";
pub const FAILURE_SUMMARY: &str = "Task Failed";
pub const TIMEOUT_SUMMARY: &str = "Task timeout";
pub const MISCONFIGURED_SUMMARY: &str = "Task configured incorrectly, contact your stampede admin.";
pub const INTERNAL_ERROR_SUMMARY: &str = "Task failed due to internal error";

/// Spawns task commands and classifies their results
#[derive(Debug, Clone)]
pub struct TaskExecutionSupervisor {
    script_root: PathBuf,
    scripts: ScriptRegistry,
    tracker: ProcessTracker,
}

impl TaskExecutionSupervisor {
    pub fn new(script_root: impl Into<PathBuf>, tracker: ProcessTracker) -> Self {
        Self {
            script_root: script_root.into(),
            scripts: ScriptRegistry::new(),
            tracker,
        }
    }

    pub fn with_scripts(mut self, scripts: ScriptRegistry) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn tracker(&self) -> &ProcessTracker {
        &self.tracker
    }

    /// Command path for `plan`, resolved under the script root
    pub fn resolve_command(&self, plan: &ExecutionPlan) -> PathBuf {
        self.script_root.join(&plan.task_command)
    }

    /// Run the task described by `plan` in `working_dir`
    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        working_dir: &Path,
        env: &Environment,
    ) -> Conclusion {
        let command = self.resolve_command(plan);

        if ScriptRegistry::is_script(&command) {
            return self.run_script(&command, plan, working_dir).await;
        }

        if !tokio::fs::try_exists(&command).await.unwrap_or(false) {
            warn!("Task command {:?} does not exist", command);
            return Conclusion::failure(MISCONFIGURED_SUMMARY);
        }

        info!("Executing {:?} {:?}", command, plan.task_arguments);
        match self.run_process(&command, plan, working_dir, env).await {
            Ok(code) => {
                info!("Task process exited with code {:?}", code);
                conclude(code, plan, working_dir).await
            }
            Err(e) => {
                error!("Task execution failed: {}", e);
                internal_error(&e)
            }
        }
    }

    async fn run_process(
        &self,
        command: &Path,
        plan: &ExecutionPlan,
        working_dir: &Path,
        env: &Environment,
    ) -> Result<Option<i32>> {
        let spec = ProcessSpec::new(command, working_dir)
            .with_args(plan.task_arguments.clone())
            .with_env(env.clone())
            .with_shell(plan.shell.clone())
            .with_logs(
                plan.stdout_log_file.as_ref().map(|f| working_dir.join(f)),
                plan.stderr_log_file.as_ref().map(|f| working_dir.join(f)),
            );

        let mut child = process::spawn(&spec).await?;
        let kill = self
            .tracker
            .track(command.display().to_string(), plan.task_timeout)
            .await;

        let result = tokio::select! {
            status = child.wait() => status.map(|s| s.code()).map_err(RunnerError::Wait),
            _ = kill.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill task process: {}", e);
                }
                Ok(None)
            }
        };

        self.tracker.clear().await;
        result
    }

    async fn run_script(&self, command: &Path, plan: &ExecutionPlan, working_dir: &Path) -> Conclusion {
        let Some(script) = self.scripts.get(command) else {
            warn!("No script task registered for {:?}", command);
            return Conclusion::failure(MISCONFIGURED_SUMMARY);
        };

        info!("Executing script task {:?}", command);
        let log = TaskLog::open(plan.stdout_log_file.as_ref().map(|f| working_dir.join(f))).await;
        let kill = self
            .tracker
            .track(command.display().to_string(), plan.task_timeout)
            .await;

        let execution = AssertUnwindSafe(script.execute(plan, working_dir, &log)).catch_unwind();
        let result = tokio::select! {
            result = execution => Some(result),
            _ = kill.cancelled() => None,
        };
        self.tracker.clear().await;

        match result {
            Some(Ok(Ok(conclusion))) => conclusion,
            Some(Ok(Err(e))) => {
                log.error(format!("{:#}", e)).await;
                error!("Script task {:?} failed: {:#}", command, e);
                internal_error(&RunnerError::Script(e))
            }
            Some(Err(payload)) => {
                let message = panic_message(&*payload);
                log.error(format!("panicked: {}", message)).await;
                error!("Script task {:?} panicked: {}", command, message);
                internal_error(&RunnerError::ScriptPanicked(message))
            }
            None => Conclusion::failure(TIMEOUT_SUMMARY),
        }
    }
}

/// Map a process exit code to a conclusion. `None` means the process was
/// killed.
async fn conclude(code: Option<i32>, plan: &ExecutionPlan, working_dir: &Path) -> Conclusion {
    let request = match code {
        Some(0) => ConclusionRequest {
            outcome: Outcome::Success,
            title: DEFAULT_TITLE,
            default_summary: SUCCESS_SUMMARY,
            summary_file: plan.success_summary_file.as_deref(),
            default_text: "",
            text_file: plan.success_text_file.as_deref(),
            artifact_list_file: plan.artifact_list_file.as_deref(),
            summary_table_file: plan.summary_table_file.as_deref(),
        },
        _ => ConclusionRequest {
            outcome: Outcome::Failure,
            title: DEFAULT_TITLE,
            default_summary: if code.is_none() {
                TIMEOUT_SUMMARY
            } else {
                FAILURE_SUMMARY
            },
            summary_file: plan.error_summary_file.as_deref(),
            default_text: "",
            text_file: plan.error_text_file.as_deref(),
            artifact_list_file: plan.artifact_list_file.as_deref(),
            summary_table_file: plan.summary_table_file.as_deref(),
        },
    };
    assemble(working_dir, &request).await
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn internal_error(error: &RunnerError) -> Conclusion {
    Conclusion::failure(INTERNAL_ERROR_SUMMARY).with_text(error.to_string())
}
