//! Error types for the core library

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors resolving a task's execution configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Task configuration has no task command")]
    MissingTaskCommand,
}

impl ConfigError {
    /// Error kind reported in task results
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingTaskCommand => "task-config-missing-task-command",
        }
    }
}
