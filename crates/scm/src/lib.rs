//! # scm
//!
//! GitHub auditing built on the `gh` CLI: a rate-limit-aware client,
//! CI status resolution for merge commits (did build/test verification
//! run, and did it pass), and a direct-push auditor for commits that
//! bypassed pull requests.
//!
//! All remote state lives in GitHub and is queried through `gh`
//! subprocess calls; nothing is persisted or cached here. Callers on
//! latency-sensitive paths should apply their own outer timeout
//! budget: rate-limit backoff can legitimately wait minutes.

pub mod api;
pub mod audit;
pub mod checks;
pub mod client;

pub use api::{CommitInfo, GitHubApi};
pub use audit::find_direct_commits;
pub use checks::{
    parse_check_runs, CheckConclusion, CheckRun, CheckStatus, CiResolution, CiResolver, CiStatus,
    FailedCheck, BUILD_KEYWORDS, TEST_KEYWORDS,
};
pub use client::{GhClient, GhClientConfig, GhError};
