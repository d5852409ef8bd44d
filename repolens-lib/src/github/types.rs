//! Wire types for the subset of the GitHub REST API the crawler reads.

use crate::pipeline::{RepositoryRef, Visibility};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Owner {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub login: String,
}

/// A repository as returned by the listing and repository endpoints.
#[derive(Debug, Deserialize)]
pub struct Repository {
    pub name: String,
    pub owner: Owner,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub default_branch: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,

    /// Only present on the single-repository endpoint; `watchers_count` mirrors stars.
    pub subscribers_count: Option<u64>,
    #[serde(default)]
    pub watchers_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
    #[serde(default)]
    pub has_wiki: bool,
}

impl Repository {
    #[must_use]
    pub fn to_ref(&self) -> RepositoryRef {
        RepositoryRef {
            fork: self.fork,
            archived: self.archived,
            pushed_at: self.pushed_at,
            default_branch: self.default_branch.clone(),
            description: self.description.clone(),
            ..RepositoryRef::new(
                self.owner.login.clone(),
                self.name.clone(),
                if self.private { Visibility::Private } else { Visibility::Public },
                self.created_at,
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeEntryKind {
    Blob,
    Tree,
    Commit,
}

#[derive(Debug, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: TreeEntryKind,
    pub size: Option<u64>,
}

/// A recursive git tree listing.
#[derive(Debug, Deserialize)]
pub struct Tree {
    pub tree: Vec<TreeEntry>,

    /// Set when the tree was too large to list completely.
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
pub struct Signature {
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CommitDetails {
    pub author: Option<Signature>,
    pub committer: Option<Signature>,
}

#[derive(Debug, Deserialize)]
pub struct Commit {
    pub commit: CommitDetails,
}

impl Commit {
    /// When the commit landed, preferring the committer date.
    #[must_use]
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.commit
            .committer
            .as_ref()
            .and_then(|s| s.date)
            .or_else(|| self.commit.author.as_ref().and_then(|s| s.date))
    }
}

#[derive(Debug, Deserialize)]
pub struct RateLimitResource {
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
}

#[derive(Debug, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimitResource,
}

/// Body of `GET /rate_limit`.
#[derive(Debug, Deserialize)]
pub struct RateLimit {
    pub resources: RateLimitResources,
}
