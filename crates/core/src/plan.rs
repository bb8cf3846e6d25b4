//! Execution plan resolution
//!
//! Merges a task's `workerConfig` with the process-wide [`TaskDefaults`]
//! into one immutable [`ExecutionPlan`]. Every optional field is resolved
//! independently: the task's value when present, the default otherwise.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::config::{GitCloneMode, TaskDefaults, WorkerConfig};
use crate::error::{ConfigError, Result};
use crate::task::Task;

/// Fully resolved configuration for running one task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub task_command: String,
    pub task_arguments: Vec<String>,
    pub git_clone: GitCloneMode,
    pub git_clone_options: Vec<String>,
    pub git_clone_depth: u32,
    pub git_merge: bool,
    pub environment_variable_prefix: String,
    pub shell: Option<String>,
    pub stdout_log_file: Option<String>,
    pub stderr_log_file: Option<String>,
    pub success_summary_file: Option<String>,
    pub success_text_file: Option<String>,
    pub error_summary_file: Option<String>,
    pub error_text_file: Option<String>,
    pub artifact_list_file: Option<String>,
    pub summary_table_file: Option<String>,
    pub task_timeout: Duration,
    pub clone_retry_attempts: u32,
    pub clone_retry_interval: Duration,
}

impl ExecutionPlan {
    /// Resolve the plan for `task` against `defaults`
    pub fn resolve(task: &Task, defaults: &TaskDefaults) -> Result<Self> {
        let empty = WorkerConfig::default();
        let config = task.worker_config.as_ref().unwrap_or(&empty);
        debug!(task_id = %task.task_id, ?config, "Resolving execution plan");

        let task_command = config
            .task_command
            .as_deref()
            .map(str::trim)
            .filter(|command| !command.is_empty())
            .ok_or(ConfigError::MissingTaskCommand)?
            .to_string();

        let git_clone_options = config
            .git_clone_options
            .as_deref()
            .unwrap_or(&defaults.git_clone_options)
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Ok(Self {
            task_command,
            task_arguments: config
                .task_arguments
                .as_ref()
                .map(|args| args.to_vec())
                .unwrap_or_default(),
            git_clone: config.git_clone.unwrap_or(defaults.git_clone),
            git_clone_options,
            git_clone_depth: config.git_clone_depth.unwrap_or(defaults.git_clone_depth),
            git_merge: config.git_merge.unwrap_or(defaults.git_merge),
            environment_variable_prefix: config
                .environment_variable_prefix
                .clone()
                .unwrap_or_else(|| defaults.environment_variable_prefix.clone()),
            shell: or_default(&config.shell, &defaults.shell),
            stdout_log_file: or_default(&config.stdout_log_file, &defaults.stdout_log_file),
            stderr_log_file: or_default(&config.stderr_log_file, &defaults.stderr_log_file),
            success_summary_file: or_default(
                &config.success_summary_file,
                &defaults.success_summary_file,
            ),
            success_text_file: or_default(&config.success_text_file, &defaults.success_text_file),
            error_summary_file: or_default(
                &config.error_summary_file,
                &defaults.error_summary_file,
            ),
            error_text_file: or_default(&config.error_text_file, &defaults.error_text_file),
            artifact_list_file: or_default(
                &config.artifact_list_file,
                &defaults.artifact_list_file,
            ),
            summary_table_file: or_default(
                &config.summary_table_file,
                &defaults.summary_table_file,
            ),
            task_timeout: Duration::from_millis(
                config.task_timeout.unwrap_or(defaults.task_timeout),
            ),
            clone_retry_attempts: config
                .clone_retry_attempts
                .unwrap_or(defaults.clone_retry_attempts),
            clone_retry_interval: Duration::from_millis(
                config
                    .clone_retry_interval
                    .unwrap_or(defaults.clone_retry_interval),
            ),
        })
    }
}

fn or_default(value: &Option<String>, default: &Option<String>) -> Option<String> {
    value.clone().or_else(|| default.clone())
}
