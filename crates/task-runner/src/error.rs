//! Error types for task-runner

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur while running a task command
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Failed to spawn the task process
    #[error("Failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A process output log could not be opened
    #[error("Unable to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the task process failed
    #[error("Failed to wait for task process: {0}")]
    Wait(#[source] std::io::Error),

    /// A script task returned an error
    #[error("Script task failed: {0}")]
    Script(#[from] anyhow::Error),

    /// A script task panicked
    #[error("Script task panicked: {0}")]
    ScriptPanicked(String),
}

impl RunnerError {
    /// Create a SpawnFailed error
    pub fn spawn_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            command: command.into(),
            source,
        }
    }
}
