//! Git backend used by the working directory preparer

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::commands::GitCommand;
use crate::error::{GitError, Result};

/// Last commit of a working tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub subject: String,
}

/// Git operations needed to prepare a working directory
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Shallow, single-branch clone of `git_ref` into the (empty) `directory`
    async fn clone_repo(
        &self,
        url: &str,
        git_ref: &str,
        depth: u32,
        extra_options: &[String],
        directory: &Path,
    ) -> Result<()>;

    /// Force checkout of `sha`, discarding local changes
    async fn checkout(&self, sha: &str, directory: &Path) -> Result<()>;

    /// Fetch `base` from origin and merge it into the current tree, which
    /// was cloned from branch `head`
    async fn merge(&self, head: &str, base: &str, depth: u32, directory: &Path) -> Result<()>;

    /// Hash and subject of the current HEAD commit
    async fn last_commit(&self, directory: &Path) -> Result<CommitInfo>;
}

/// Deepen rounds tried before fetching the complete history
const MAX_DEEPEN_ROUNDS: u32 = 5;

async fn has_merge_base(remote_ref: &str, directory: &Path) -> Result<bool> {
    let output = GitCommand::new(directory)
        .args(["merge-base", "HEAD", remote_ref])
        .output()
        .await?;
    Ok(output.success)
}

/// Committer identity used for merge commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

/// [`GitBackend`] backed by the `git` command line
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    identity: Option<GitIdentity>,
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: GitIdentity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    fn identity_args(&self) -> Vec<String> {
        match &self.identity {
            Some(identity) => vec![
                "-c".to_string(),
                format!("user.name={}", identity.name),
                "-c".to_string(),
                format!("user.email={}", identity.email),
            ],
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl GitBackend for GitCli {
    async fn clone_repo(
        &self,
        url: &str,
        git_ref: &str,
        depth: u32,
        extra_options: &[String],
        directory: &Path,
    ) -> Result<()> {
        GitCommand::new(directory)
            .args(["clone", "--depth"])
            .arg(depth.max(1).to_string())
            .args(["--single-branch", "-b", git_ref])
            .args(extra_options)
            .args(["--", url, "."])
            .run_checked()
            .await?;
        Ok(())
    }

    async fn checkout(&self, sha: &str, directory: &Path) -> Result<()> {
        GitCommand::new(directory)
            .args(["checkout", "-f", sha, "--"])
            .run_checked()
            .await?;
        Ok(())
    }

    async fn merge(&self, head: &str, base: &str, depth: u32, directory: &Path) -> Result<()> {
        let depth = depth.max(1);
        let head_spec = format!("+refs/heads/{}:refs/remotes/origin/{}", head, head);
        let remote_ref = format!("refs/remotes/origin/{}", base);
        let base_spec = format!("+refs/heads/{}:{}", base, remote_ref);

        GitCommand::new(directory)
            .args(["fetch", "--no-tags", "--depth"])
            .arg(depth.to_string())
            .args(["origin", &base_spec])
            .run_checked()
            .await?;

        // Shallow histories of head and base may not reach their fork point
        let mut rounds = 0;
        while !has_merge_base(&remote_ref, directory).await? {
            if rounds == MAX_DEEPEN_ROUNDS {
                debug!("No merge base with {} after deepening, fetching full history", base);
                let unshallow = GitCommand::new(directory)
                    .args(["fetch", "--no-tags", "--unshallow", "origin", &head_spec, &base_spec])
                    .output()
                    .await?;
                if !unshallow.success {
                    debug!("Unshallow fetch failed: {}", unshallow.stderr.trim());
                }
                break;
            }
            rounds += 1;
            debug!("Deepening history by {} to find merge base with {}", depth, base);
            GitCommand::new(directory)
                .args(["fetch", "--no-tags"])
                .arg(format!("--deepen={}", depth))
                .args(["origin", &head_spec, &base_spec])
                .run_checked()
                .await?;
        }

        GitCommand::new(directory)
            .args(self.identity_args())
            .args(["merge", "--no-edit", &remote_ref])
            .run_checked()
            .await?;
        Ok(())
    }

    async fn last_commit(&self, directory: &Path) -> Result<CommitInfo> {
        let output = GitCommand::new(directory)
            .args(["log", "-1", "--format=%H%n%s"])
            .run_checked()
            .await?;

        let mut lines = output.lines();
        let sha = lines
            .next()
            .map(str::trim)
            .filter(|sha| !sha.is_empty())
            .ok_or_else(|| GitError::ParseError {
                message: format!("no commit in git log output: {:?}", output),
            })?
            .to_string();
        let subject = lines.next().unwrap_or_default().trim().to_string();

        Ok(CommitInfo { sha, subject })
    }
}
