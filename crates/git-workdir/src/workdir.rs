//! Working directory preparation
//!
//! Each task gets its own directory under the workspace root:
//!
//! ```text
//! <workspaceRoot>/
//!   <MM-DD-YYYY>/
//!     <owner>-<repository>/
//!       <buildKey>/
//!         <buildNumber>/
//!           <task.id>-<task.number>/
//! ```
//!
//! Preparation runs `Created -> Cloning -> (Retrying)* -> CheckingOut ->
//! Merging -> Ready`. Any failing step is terminal; only cloning is retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use stampede_core::{ExecutionPlan, GitCloneMode, Scm, Task};
use tracing::{info, warn};

use crate::backend::{GitBackend, GitCli};
use crate::commands::redact_url;
use crate::error::PrepareError;
use crate::operations::{self, GitOperations};

/// File written into the working directory when a clone attempt fails
pub const CLONE_ERROR_LOG: &str = "cloneerror.log";

/// A prepared working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDirectory {
    pub directory: PathBuf,
    /// Commit found in the tree when the task asked for the branch head
    pub sha: Option<String>,
    /// Subject line of that commit
    pub commit: Option<String>,
}

/// Deterministic directory layout under the workspace root
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for `task` on `day`
    pub fn task_dir(&self, task: &Task, day: NaiveDate) -> PathBuf {
        self.root
            .join(day.format("%m-%d-%Y").to_string())
            .join(format!("{}-{}", task.owner, task.repository))
            .join(&task.build_key)
            .join(task.build_number.to_string())
            .join(format!("{}-{}", task.task.id, task.task.number))
    }
}

/// Resolve the remote to clone from. `https` mode embeds the access token
/// as basic-auth userinfo.
pub fn remote_url(scm: &Scm, mode: GitCloneMode) -> Result<String, PrepareError> {
    match mode {
        GitCloneMode::Ssh => scm
            .ssh_url
            .clone()
            .filter(|url| !url.is_empty())
            .ok_or(PrepareError::MissingRemote { mode }),
        GitCloneMode::Https => {
            let clone_url = scm
                .clone_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .ok_or(PrepareError::MissingRemote { mode })?;
            let Some(token) = scm.access_token.as_deref().filter(|t| !t.is_empty()) else {
                return Ok(clone_url.to_string());
            };

            let mut url = url::Url::parse(clone_url).map_err(|e| PrepareError::InvalidRemote {
                message: format!("{}: {}", clone_url, e),
            })?;
            url.set_username("x-access-token")
                .and_then(|_| url.set_password(Some(token)))
                .map_err(|_| PrepareError::InvalidRemote {
                    message: format!("{} cannot carry credentials", clone_url),
                })?;
            Ok(url.to_string())
        }
        GitCloneMode::None => Err(PrepareError::MissingRemote { mode }),
    }
}

/// Creates task directories and materializes the task's revision in them
pub struct WorkingDirectoryPreparer {
    layout: WorkspaceLayout,
    git: Arc<dyn GitBackend>,
}

impl WorkingDirectoryPreparer {
    pub fn new(layout: WorkspaceLayout) -> Self {
        Self::with_backend(layout, Arc::new(GitCli::new()))
    }

    pub fn with_backend(layout: WorkspaceLayout, git: Arc<dyn GitBackend>) -> Self {
        Self { layout, git }
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    /// Prepare the task's directory for today
    pub async fn prepare(
        &self,
        task: &Task,
        plan: &ExecutionPlan,
    ) -> Result<PreparedDirectory, PrepareError> {
        let today = chrono::Local::now().date_naive();
        self.prepare_in(self.layout.task_dir(task, today), task, plan)
            .await
    }

    /// Prepare `directory` for the task
    pub async fn prepare_in(
        &self,
        directory: PathBuf,
        task: &Task,
        plan: &ExecutionPlan,
    ) -> Result<PreparedDirectory, PrepareError> {
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|source| PrepareError::Mkdir {
                directory: directory.clone(),
                source,
            })?;
        info!(task_id = %task.task_id, "Working directory: {:?}", directory);

        let mut prepared = PreparedDirectory {
            directory,
            sha: None,
            commit: None,
        };

        if plan.git_clone == GitCloneMode::None {
            info!("Skipping git clone, clone mode is none");
            return Ok(prepared);
        }

        let url = remote_url(&task.scm, plan.git_clone)?;
        let operations = operations::plan(&task.scm, plan.git_clone_depth, plan.git_merge)
            .ok_or(PrepareError::NoGitOperations)?;

        self.clone_with_retry(&url, &operations, plan, &prepared.directory)
            .await?;

        if operations.should_checkout {
            if let Some(sha) = &operations.sha {
                info!("Checking out {}", sha);
                self.git
                    .checkout(sha, &prepared.directory)
                    .await
                    .map_err(|e| PrepareError::Checkout {
                        sha: sha.clone(),
                        message: e.output(),
                    })?;
            }
        }

        if operations.merge {
            if let Some(base) = &operations.merge_base {
                info!("Merging {} into working tree", base);
                self.git
                    .merge(
                        &operations.clone,
                        base,
                        operations.depth,
                        &prepared.directory,
                    )
                    .await
                    .map_err(|e| PrepareError::Merge {
                        base: base.clone(),
                        message: e.output(),
                    })?;
            }
        }

        if operations.sha.is_none() {
            let commit = self
                .git
                .last_commit(&prepared.directory)
                .await
                .map_err(|e| PrepareError::CommitLookup {
                    message: e.output(),
                })?;
            info!("Resolved {} to {} ({})", operations.clone, commit.sha, commit.subject);
            prepared.sha = Some(commit.sha);
            prepared.commit = Some(commit.subject);
        }

        Ok(prepared)
    }

    /// Clone with up to `clone_retry_attempts` retries spaced by a fixed
    /// interval. The directory is emptied before every attempt; failed
    /// attempts are recorded in [`CLONE_ERROR_LOG`], which is kept even when
    /// a later attempt succeeds.
    async fn clone_with_retry(
        &self,
        url: &str,
        operations: &GitOperations,
        plan: &ExecutionPlan,
        directory: &Path,
    ) -> Result<(), PrepareError> {
        let attempts = plan.clone_retry_attempts.saturating_add(1);
        let mut error_log = String::new();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if let Err(e) = clear_directory(directory).await {
                warn!("Unable to clear {:?} before clone: {}", directory, e);
            }

            info!(
                "Cloning {} ({}) attempt {}/{}",
                redact_url(url),
                operations.clone,
                attempt,
                attempts
            );
            match self
                .git
                .clone_repo(
                    url,
                    &operations.clone,
                    operations.depth,
                    &plan.git_clone_options,
                    directory,
                )
                .await
            {
                Ok(()) => {
                    // The directory was emptied before this attempt
                    if !error_log.is_empty() {
                        write_error_log(directory, &error_log).await;
                    }
                    return Ok(());
                }
                Err(e) => {
                    last_error = redact(&e.output(), url);
                    warn!("Clone attempt {} failed: {}", attempt, last_error);

                    error_log.push_str(&format!("--- attempt {} ---\n{}\n", attempt, last_error));
                    write_error_log(directory, &error_log).await;

                    if attempt < attempts {
                        tokio::time::sleep(plan.clone_retry_interval).await;
                    }
                }
            }
        }

        Err(PrepareError::Clone {
            directory: directory.to_path_buf(),
            url: redact_url(url),
            attempts,
            message: last_error,
        })
    }
}

async fn write_error_log(directory: &Path, error_log: &str) {
    if let Err(e) = tokio::fs::write(directory.join(CLONE_ERROR_LOG), error_log).await {
        warn!("Unable to write {}: {}", CLONE_ERROR_LOG, e);
    }
}

fn redact(text: &str, url: &str) -> String {
    let redacted = redact_url(url);
    if redacted == url {
        text.to_string()
    } else {
        text.replace(url, &redacted)
    }
}

async fn clear_directory(directory: &Path) -> std::io::Result<()> {
    let mut entries = tokio::fs::read_dir(directory).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
    }
    Ok(())
}
