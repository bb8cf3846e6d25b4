//! Task execution defaults and per-task overrides

use serde::{Deserialize, Serialize};

/// How the repository is fetched into the working directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitCloneMode {
    #[default]
    Ssh,
    Https,
    None,
}

impl GitCloneMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Https => "https",
            Self::None => "none",
        }
    }
}

/// Task arguments as supplied by the pipeline definition: either one
/// whitespace separated string or an explicit list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskArguments {
    Line(String),
    List(Vec<String>),
}

impl TaskArguments {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            Self::List(list) => list.clone(),
        }
    }
}

/// Process-wide task defaults, applied to every field a task leaves unset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskDefaults {
    pub environment_variable_prefix: String,
    pub shell: Option<String>,
    pub git_clone: GitCloneMode,
    pub git_clone_options: String,
    pub git_clone_depth: u32,
    pub git_merge: bool,
    pub stdout_log_file: Option<String>,
    pub stderr_log_file: Option<String>,
    pub success_summary_file: Option<String>,
    pub success_text_file: Option<String>,
    pub error_summary_file: Option<String>,
    pub error_text_file: Option<String>,
    pub artifact_list_file: Option<String>,
    pub summary_table_file: Option<String>,
    /// Milliseconds
    pub task_timeout: u64,
    pub clone_retry_attempts: u32,
    /// Milliseconds
    pub clone_retry_interval: u64,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            environment_variable_prefix: "STAMP_".to_string(),
            shell: Some("/bin/bash".to_string()),
            git_clone: GitCloneMode::Ssh,
            git_clone_options: String::new(),
            git_clone_depth: 50,
            git_merge: true,
            stdout_log_file: Some("stdout.log".to_string()),
            stderr_log_file: None,
            success_summary_file: None,
            success_text_file: None,
            error_summary_file: None,
            error_text_file: None,
            artifact_list_file: None,
            summary_table_file: None,
            task_timeout: 30 * 60 * 1000,
            clone_retry_attempts: 3,
            clone_retry_interval: 5_000,
        }
    }
}

/// Per-task override of the execution defaults (`task.workerConfig`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_arguments: Option<TaskArguments>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_clone: Option<GitCloneMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_clone_options: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_clone_depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_merge: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_variable_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_log_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_log_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_summary_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_text_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_summary_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_list_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_table_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_retry_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_retry_interval: Option<u64>,
}

impl WorkerConfig {
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            task_command: Some(command.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_arguments_line_is_tokenized() {
        let args = TaskArguments::Line("  --scheme App   --verbose ".to_string());
        assert_eq!(args.to_vec(), vec!["--scheme", "App", "--verbose"]);
    }

    #[test]
    fn test_arguments_accept_list_or_string() {
        let config: WorkerConfig = serde_json::from_value(json!({
            "taskCommand": "build.sh",
            "taskArguments": ["a b", "c"]
        }))
        .unwrap();
        assert_eq!(config.task_arguments.unwrap().to_vec(), vec!["a b", "c"]);

        let config: WorkerConfig = serde_json::from_value(json!({
            "taskArguments": "a b"
        }))
        .unwrap();
        assert_eq!(config.task_arguments.unwrap().to_vec(), vec!["a", "b"]);
    }

    #[test]
    fn test_defaults_from_partial_toml_style_json() {
        let defaults: TaskDefaults = serde_json::from_value(json!({
            "gitClone": "https",
            "taskTimeout": 1000
        }))
        .unwrap();
        assert_eq!(defaults.git_clone, GitCloneMode::Https);
        assert_eq!(defaults.task_timeout, 1000);
        assert_eq!(defaults.environment_variable_prefix, "STAMP_");
        assert_eq!(defaults.stdout_log_file.as_deref(), Some("stdout.log"));
    }
}
