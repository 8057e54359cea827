//! Logical GitHub query surface consumed by the CI resolver and the
//! direct-push auditor. Production code goes through [`crate::GhClient`];
//! tests substitute mock implementations with call counters.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checks::CheckRun;

/// One commit as returned by the commits listing API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Full commit SHA
    pub sha: String,

    /// Commit message
    #[serde(default)]
    pub message: String,

    /// Author login; absent for ghost/unmapped authors
    #[serde(default)]
    pub author: Option<String>,

    /// Author date
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

/// Read-only queries against a GitHub repository
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Merge-commit SHA for a PR, or `None` when the PR has none
    /// (not merged, or metadata unavailable)
    async fn merge_commit_sha(&self, repo: &str, pr_number: u64) -> Result<Option<String>>;

    /// All check runs reported for a commit
    async fn check_runs(&self, repo: &str, sha: &str) -> Result<Vec<CheckRun>>;

    /// Step names for one workflow job
    async fn job_steps(&self, repo: &str, job_id: u64) -> Result<Vec<String>>;

    /// Most recent commits on a branch, newest first
    async fn recent_commits(&self, repo: &str, branch: &str, limit: u32)
        -> Result<Vec<CommitInfo>>;

    /// Number of pull requests associated with a commit
    async fn commit_pr_count(&self, repo: &str, sha: &str) -> Result<u32>;
}
