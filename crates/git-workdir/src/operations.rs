//! Git operation planning
//!
//! Derives the clone / checkout / merge steps a task needs from its
//! source-control descriptor. Pure and recomputed per preparation.

use stampede_core::task::{Revision, Scm};

/// Git steps required to materialize a task's revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOperations {
    /// Branch or tag passed to `clone -b`
    pub clone: String,
    /// Commit to check out, `None` when the branch head is used as is
    pub sha: Option<String>,
    pub should_checkout: bool,
    pub depth: u32,
    pub merge: bool,
    /// Branch merged into the checkout when `merge` is set
    pub merge_base: Option<String>,
}

/// Plan the git steps for `scm`. `None` means the descriptor names no
/// revision and the task cannot be prepared.
pub fn plan(scm: &Scm, depth: u32, merge_enabled: bool) -> Option<GitOperations> {
    let operations = match scm.revision()? {
        Revision::PullRequest(pr) => GitOperations {
            clone: pr.head.git_ref.clone(),
            sha: Some(pr.head.sha.clone()),
            should_checkout: true,
            depth,
            merge: merge_enabled,
            merge_base: merge_enabled.then(|| pr.base.git_ref.clone()),
        },
        Revision::Branch(branch) if branch.is_latest() => GitOperations {
            clone: branch.name.clone(),
            sha: None,
            should_checkout: false,
            depth,
            merge: false,
            merge_base: None,
        },
        Revision::Branch(branch) => GitOperations {
            clone: branch.name.clone(),
            sha: Some(branch.sha.clone()),
            should_checkout: true,
            depth,
            merge: false,
            merge_base: None,
        },
        Revision::Release(release) => GitOperations {
            clone: release.tag.clone(),
            sha: Some(release.sha.clone()),
            should_checkout: true,
            depth,
            merge: false,
            merge_base: None,
        },
    };

    if operations.clone.is_empty() {
        return None;
    }
    Some(operations)
}
