//! # Direct-Push Audit
//!
//! Finds commits that landed on a branch without an associated pull
//! request. Each commit needs its own PR-association lookup, so the
//! checks run through a bounded worker pool; one failed lookup skips
//! that commit without aborting its siblings.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::api::{CommitInfo, GitHubApi};

/// Find commits pushed directly to `branch` without a PR
///
/// Checks the `limit` most recent commits, with at most `max_workers`
/// concurrent PR-association lookups (bounded by the commit count).
///
/// # Errors
/// Returns an error only when the commit listing itself fails;
/// per-commit lookup failures are logged and treated as "has a PR".
pub async fn find_direct_commits(
    api: &dyn GitHubApi,
    repo: &str,
    branch: &str,
    limit: u32,
    max_workers: usize,
) -> Result<Vec<CommitInfo>> {
    let commits = api
        .recent_commits(repo, branch, limit)
        .await
        .with_context(|| format!("listing commits on {repo}@{branch}"))?;

    if commits.is_empty() {
        return Ok(Vec::new());
    }

    let workers = max_workers.min(commits.len()).max(1);
    info!(
        repo,
        branch,
        commits = commits.len(),
        workers,
        "Auditing commits for PR association"
    );

    let flagged: Vec<Option<CommitInfo>> = stream::iter(commits.into_iter().map(|commit| {
        async move {
            match api.commit_pr_count(repo, &commit.sha).await {
                Ok(0) => Some(commit),
                Ok(_) => None,
                Err(err) => {
                    warn!(sha = %commit.sha, error = %err, "PR association lookup failed, skipping commit");
                    None
                }
            }
        }
    }))
    .buffer_unordered(workers)
    .collect()
    .await;

    let direct: Vec<CommitInfo> = flagged.into_iter().flatten().collect();
    info!(repo, branch, direct = direct.len(), "Direct-push audit complete");
    Ok(direct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::checks::CheckRun;

    struct MockCommits {
        commits: Vec<CommitInfo>,
        lookups: AtomicUsize,
    }

    impl MockCommits {
        fn new(shas: &[&str]) -> Self {
            Self {
                commits: shas
                    .iter()
                    .map(|sha| CommitInfo {
                        sha: (*sha).to_string(),
                        message: format!("commit {sha}"),
                        author: Some("dev".to_string()),
                        date: None,
                    })
                    .collect(),
                lookups: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GitHubApi for MockCommits {
        async fn merge_commit_sha(&self, _repo: &str, _pr: u64) -> Result<Option<String>> {
            Ok(None)
        }

        async fn check_runs(&self, _repo: &str, _sha: &str) -> Result<Vec<CheckRun>> {
            Ok(Vec::new())
        }

        async fn job_steps(&self, _repo: &str, _job_id: u64) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn recent_commits(
            &self,
            _repo: &str,
            _branch: &str,
            limit: u32,
        ) -> Result<Vec<CommitInfo>> {
            Ok(self.commits.iter().take(limit as usize).cloned().collect())
        }

        async fn commit_pr_count(&self, _repo: &str, sha: &str) -> Result<u32> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            match sha {
                "direct" => Ok(0),
                "broken" => bail!("lookup failed"),
                _ => Ok(1),
            }
        }
    }

    #[tokio::test]
    async fn test_flags_only_commits_without_prs() {
        let api = MockCommits::new(&["direct", "merged", "another"]);
        let direct = find_direct_commits(&api, "owner/repo", "main", 50, 5)
            .await
            .unwrap();

        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].sha, "direct");
        assert_eq!(api.lookups.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_lookup_failure_does_not_abort_siblings() {
        let api = MockCommits::new(&["broken", "direct"]);
        let direct = find_direct_commits(&api, "owner/repo", "main", 50, 2)
            .await
            .unwrap();

        // The failing commit is skipped, the other still audited.
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].sha, "direct");
    }

    #[tokio::test]
    async fn test_empty_branch_yields_empty_audit() {
        let api = MockCommits::new(&[]);
        let direct = find_direct_commits(&api, "owner/repo", "main", 50, 5)
            .await
            .unwrap();
        assert!(direct.is_empty());
    }

    #[tokio::test]
    async fn test_respects_commit_limit() {
        let api = MockCommits::new(&["direct", "merged", "another"]);
        let direct = find_direct_commits(&api, "owner/repo", "main", 1, 5)
            .await
            .unwrap();

        assert_eq!(direct.len(), 1);
        assert_eq!(api.lookups.load(Ordering::SeqCst), 1);
    }
}
