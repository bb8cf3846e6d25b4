//! Error types for git-workdir operations

use std::path::PathBuf;

use stampede_core::GitCloneMode;
use thiserror::Error;

/// Result type alias for git command operations
pub type Result<T> = std::result::Result<T, GitError>;

/// Errors running a single git command
#[derive(Debug, Error)]
pub enum GitError {
    /// The git binary could not be started
    #[error("Failed to execute git: {message}")]
    Spawn {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Git ran and exited unsuccessfully
    #[error("{command} failed with exit code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// Failed to parse git output
    #[error("Failed to parse git output: {message}")]
    ParseError { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Combined stdout and stderr of a failed command, or the error text
    pub fn output(&self) -> String {
        match self {
            Self::CommandFailed { stdout, stderr, .. } => {
                let mut out = stdout.trim_end().to_string();
                if !out.is_empty() && !stderr.is_empty() {
                    out.push('\n');
                }
                out.push_str(stderr.trim_end());
                out
            }
            other => other.to_string(),
        }
    }
}

/// Terminal failures of working directory preparation
#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("Unable to create working directory {directory}: {source}")]
    Mkdir {
        directory: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No {} remote URL available for clone", mode.as_str())]
    MissingRemote { mode: GitCloneMode },

    #[error("Invalid clone URL: {message}")]
    InvalidRemote { message: String },

    #[error("Source control descriptor names no pull request, branch or release")]
    NoGitOperations,

    #[error("Clone of {url} into {directory} failed after {attempts} attempts: {message}")]
    Clone {
        directory: PathBuf,
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Checkout of {sha} failed: {message}")]
    Checkout { sha: String, message: String },

    #[error("Merge of {base} failed: {message}")]
    Merge { base: String, message: String },

    #[error("Unable to read last commit: {message}")]
    CommitLookup { message: String },
}

impl PrepareError {
    /// Error kind reported in task results
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mkdir { .. } => "mkdir-error",
            Self::MissingRemote { .. }
            | Self::InvalidRemote { .. }
            | Self::NoGitOperations
            | Self::Clone { .. }
            | Self::CommitLookup { .. } => "clone-error",
            Self::Checkout { .. } => "checkout-error",
            Self::Merge { .. } => "merge-error",
        }
    }
}
