//! Worker settings
//!
//! Settings come from an optional TOML file, then command line flags and
//! environment variables override individual values.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use stampede_core::TaskDefaults;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Unable to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("taskTestFile and responseTestFile must be set together")]
    IncompleteTestMode,

    #[error("No task transport configured, set spoolDir or the test files")]
    NoTransport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug, Default)]
#[command(name = "stampede-worker")]
#[command(version)]
#[command(about = "Pulls CI tasks, prepares their git working directory and runs them")]
pub struct Cli {
    /// Settings file (TOML)
    #[arg(long, env = "STAMPEDE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Name of the node this worker runs on
    #[arg(long, env = "STAMPEDE_NODE_NAME")]
    pub node_name: Option<String>,

    /// Human readable worker name reported in heartbeats
    #[arg(long, env = "STAMPEDE_WORKER_NAME")]
    pub worker_name: Option<String>,

    /// Directory task commands are resolved against
    #[arg(long, env = "STAMPEDE_SCRIPT_ROOT")]
    pub script_root: Option<PathBuf>,

    /// Root of all task working directories
    #[arg(long, env = "STAMPEDE_WORKSPACE_ROOT")]
    pub workspace_root: Option<PathBuf>,

    #[arg(long, env = "STAMPEDE_TASK_QUEUE")]
    pub task_queue: Option<String>,

    #[arg(long, env = "STAMPEDE_RESPONSE_QUEUE")]
    pub response_queue: Option<String>,

    /// Spool directory used as the task transport
    #[arg(long, env = "STAMPEDE_SPOOL_DIR")]
    pub spool_dir: Option<PathBuf>,

    /// Run the single task in this file, then exit
    #[arg(long)]
    pub task_test_file: Option<PathBuf>,

    /// Prefix of the files test mode responses are written to
    #[arg(long)]
    pub response_test_file: Option<PathBuf>,

    /// Keep a copy of every dequeued task in this directory
    #[arg(long, env = "STAMPEDE_LOG_QUEUE_PATH")]
    pub log_queue_path: Option<PathBuf>,

    /// Heartbeat interval in milliseconds
    #[arg(long)]
    pub heartbeat_interval: Option<u64>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Contents of the settings file. Every field is optional here; required
/// values are checked once file and flags are merged.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SettingsFile {
    node_name: Option<String>,
    worker_name: Option<String>,
    script_root: Option<PathBuf>,
    workspace_root: Option<PathBuf>,
    task_queue: Option<String>,
    response_queue: Option<String>,
    spool_dir: Option<PathBuf>,
    task_test_file: Option<PathBuf>,
    response_test_file: Option<PathBuf>,
    log_queue_path: Option<PathBuf>,
    environment_log_file: Option<String>,
    task_details_log_file: Option<String>,
    heartbeat_interval: Option<u64>,
    git_user_name: Option<String>,
    git_user_email: Option<String>,
    #[serde(flatten)]
    task_defaults: TaskDefaults,
}

/// Where tasks come from and responses go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSettings {
    Spool(PathBuf),
    TestFiles { task: PathBuf, responses: PathBuf },
}

/// Validated worker settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub node_name: String,
    pub worker_name: String,
    pub script_root: PathBuf,
    pub workspace_root: PathBuf,
    pub task_queue: String,
    pub response_queue: String,
    pub transport: TransportSettings,
    pub log_queue_path: Option<PathBuf>,
    /// Empty disables the environment dump
    pub environment_log_file: String,
    /// Empty disables the task details dump
    pub task_details_log_file: String,
    /// Milliseconds
    pub heartbeat_interval: u64,
    pub git_user_name: Option<String>,
    pub git_user_email: Option<String>,
    pub task_defaults: TaskDefaults,
}

impl Settings {
    /// Load the settings file named by the command line, if any, and apply
    /// the command line on top of it
    pub fn load(cli: &Cli) -> Result<Self, SettingsError> {
        let file = match &cli.config {
            Some(path) => read_file(path)?,
            None => SettingsFile::default(),
        };
        Self::merge(file, cli)
    }

    /// Parse settings from TOML text, then apply the command line
    #[cfg(test)]
    pub fn from_toml(text: &str, cli: &Cli) -> Result<Self, SettingsError> {
        let file = toml::from_str(text).map_err(|source| SettingsError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::merge(file, cli)
    }

    fn merge(file: SettingsFile, cli: &Cli) -> Result<Self, SettingsError> {
        let node_name = cli
            .node_name
            .clone()
            .or(file.node_name)
            .ok_or(SettingsError::Missing("nodeName"))?;
        let script_root = cli
            .script_root
            .clone()
            .or(file.script_root)
            .ok_or(SettingsError::Missing("scriptRoot"))?;
        let workspace_root = cli
            .workspace_root
            .clone()
            .or(file.workspace_root)
            .ok_or(SettingsError::Missing("workspaceRoot"))?;

        let task_test_file = cli.task_test_file.clone().or(file.task_test_file);
        let response_test_file = cli.response_test_file.clone().or(file.response_test_file);
        let transport = match (task_test_file, response_test_file) {
            (Some(task), Some(responses)) => TransportSettings::TestFiles { task, responses },
            (Some(_), None) | (None, Some(_)) => return Err(SettingsError::IncompleteTestMode),
            (None, None) => TransportSettings::Spool(
                cli.spool_dir
                    .clone()
                    .or(file.spool_dir)
                    .ok_or(SettingsError::NoTransport)?,
            ),
        };

        Ok(Self {
            worker_name: cli
                .worker_name
                .clone()
                .or(file.worker_name)
                .unwrap_or_else(|| node_name.clone()),
            node_name,
            script_root,
            workspace_root,
            task_queue: cli
                .task_queue
                .clone()
                .or(file.task_queue)
                .unwrap_or_else(|| "tasks".to_string()),
            response_queue: cli
                .response_queue
                .clone()
                .or(file.response_queue)
                .unwrap_or_else(|| "response".to_string()),
            transport,
            log_queue_path: cli.log_queue_path.clone().or(file.log_queue_path),
            environment_log_file: file
                .environment_log_file
                .unwrap_or_else(|| "environment.log".to_string()),
            task_details_log_file: file
                .task_details_log_file
                .unwrap_or_else(|| "worker.log".to_string()),
            heartbeat_interval: cli
                .heartbeat_interval
                .or(file.heartbeat_interval)
                .unwrap_or(15_000),
            git_user_name: file.git_user_name,
            git_user_email: file.git_user_email,
            task_defaults: file.task_defaults,
        })
    }

    pub fn is_test_mode(&self) -> bool {
        matches!(self.transport, TransportSettings::TestFiles { .. })
    }
}

fn read_file(path: &Path) -> Result<SettingsFile, SettingsError> {
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
