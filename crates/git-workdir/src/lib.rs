//! Git working directory preparation
//!
//! This crate turns a task's source-control descriptor into a populated
//! working directory: it plans the git steps, clones with retry, checks out
//! and merges as required, and reports the commit it ended up on.

mod backend;
mod commands;
mod error;
mod operations;
mod workdir;

pub use backend::{CommitInfo, GitBackend, GitCli, GitIdentity};
pub use commands::{redact_url, GitCommand, GitOutput};
pub use error::{GitError, PrepareError, Result};
pub use operations::{plan, GitOperations};
pub use workdir::{
    remote_url, PreparedDirectory, WorkingDirectoryPreparer, WorkspaceLayout, CLONE_ERROR_LOG,
};
