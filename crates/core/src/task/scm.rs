//! Source-control descriptor carried by every task

use serde::{Deserialize, Serialize};

/// Sentinel branch sha meaning "whatever the branch head is at clone time"
pub const LATEST_SHA: &str = "latest";

/// One side (head or base) of a pull request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub sha: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub head: GitRef,
    pub base: GitRef,
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub sha: String,
    /// Subject line of the commit found at clone time when `sha` was "latest"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl Branch {
    pub fn is_latest(&self) -> bool {
        self.sha == LATEST_SHA
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub tag: String,
    pub sha: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub body: String,
}

/// Which revision source a descriptor names
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Revision<'a> {
    PullRequest(&'a PullRequest),
    Branch(&'a Branch),
    Release(&'a Release),
}

/// Source-control descriptor (`task.scm`).
///
/// On the wire this is an object with three nullable variant fields; a well
/// formed descriptor has exactly one of them set. Use [`Scm::revision`] to get
/// the variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
    #[serde(rename = "sshURL", default, skip_serializing_if = "Option::is_none")]
    pub ssh_url: Option<String>,
    #[serde(rename = "cloneURL", default, skip_serializing_if = "Option::is_none")]
    pub clone_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Scm {
    pub fn for_pull_request(pull_request: PullRequest) -> Self {
        Self {
            pull_request: Some(pull_request),
            ..Default::default()
        }
    }

    pub fn for_branch(name: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            branch: Some(Branch {
                name: name.into(),
                sha: sha.into(),
                commit: None,
            }),
            ..Default::default()
        }
    }

    pub fn for_release(release: Release) -> Self {
        Self {
            release: Some(release),
            ..Default::default()
        }
    }

    pub fn with_ssh_url(mut self, url: impl Into<String>) -> Self {
        self.ssh_url = Some(url.into());
        self
    }

    pub fn with_clone_url(mut self, url: impl Into<String>) -> Self {
        self.clone_url = Some(url.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// The revision variant, or `None` unless exactly one variant is set
    pub fn revision(&self) -> Option<Revision<'_>> {
        match (&self.pull_request, &self.branch, &self.release) {
            (Some(pr), None, None) => Some(Revision::PullRequest(pr)),
            (None, Some(branch), None) => Some(Revision::Branch(branch)),
            (None, None, Some(release)) => Some(Revision::Release(release)),
            _ => None,
        }
    }
}
