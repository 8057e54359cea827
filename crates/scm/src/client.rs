//! # GitHub CLI Client
//!
//! Wraps the `gh` CLI with rate-limit-aware retry. Rate limiting is
//! the only failure class retried here: it is signaled by error text
//! rather than a structured status, and most other remote errors are
//! not safe to retry blindly. Generic transient-failure retry belongs
//! to the [`exec`] layer underneath.
//!
//! ## Example
//!
//! ```no_run
//! use scm::GhClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = GhClient::new();
//! let output = client.run(&["repo", "list", "5dlabs", "--json", "name"]).await?;
//! let repos: serde_json::Value = serde_json::from_str(&output)?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use exec::{CommandExecutor, ErrorKind, ExecConfig, ExponentialBackoff, RetryStrategy};
use regex::Regex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::api::{CommitInfo, GitHubApi};
use crate::checks::{parse_check_runs, CheckRun};

/// Errors surfaced by [`GhClient`]
#[derive(Debug, Error)]
pub enum GhError {
    /// The gh binary is not installed
    #[error("{program} CLI not found. Install it from https://cli.github.com and run `gh auth login`")]
    CliNotFound {
        /// Configured program name
        program: String,
    },

    /// Rate-limit retries were exhausted
    #[error(
        "GitHub rate limit exceeded after {retries} retries (waited total: {}).\n   \
         Rate limits reset after 1 hour.\n   \
         Check remaining quota: gh api rate_limit\n   \
         Or reduce parallelism and try again",
        format_duration(.waited)
    )]
    RateLimitExhausted {
        /// Number of attempts made
        retries: u32,
        /// Total time spent sleeping between attempts
        waited: Duration,
        /// Last stderr observed
        stderr: String,
    },

    /// Any non-rate-limit command failure
    #[error("gh command failed: {stderr}")]
    CommandFailed {
        /// Captured stderr
        stderr: String,
    },
}

/// Configuration for [`GhClient`]
///
/// The rate-limit markers are configuration rather than hard-coded
/// literals: detection relies on substring matches against
/// human-readable CLI error text, which is brittle to upstream
/// wording changes.
#[derive(Debug, Clone)]
pub struct GhClientConfig {
    /// CLI program to invoke; substitutable for testing
    pub program: String,

    /// Maximum attempts against a rate-limited endpoint
    pub max_retries: u32,

    /// First backoff delay
    pub initial_delay: Duration,

    /// Backoff cap per attempt
    pub max_delay: Duration,

    /// Jitter fraction applied to each backoff delay
    pub jitter: f64,

    /// Substrings identifying a rate-limit error on stderr
    pub rate_limit_markers: Vec<String>,

    /// Substrings identifying a rate-limit error on stdout, checked
    /// only in the GraphQL query mode
    pub stdout_rate_limit_markers: Vec<String>,

    /// Wall-clock bound per gh invocation
    pub command_timeout: Duration,
}

impl Default for GhClientConfig {
    fn default() -> Self {
        Self {
            program: "gh".to_string(),
            max_retries: 25,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            jitter: 0.1,
            rate_limit_markers: vec!["rate limit".to_string()],
            stdout_rate_limit_markers: vec!["rate_limit".to_string()],
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// How one query path treats rate limits and failures
struct QueryMode {
    label: &'static str,
    /// Also sniff stdout for rate-limit markers (gh api graphql
    /// writes JSON errors to stdout on ambiguous exit codes)
    sniff_stdout: bool,
    /// Return stdout rather than an error on non-rate-limit failures
    /// (GraphQL puts partial results there even on nonzero exit)
    stdout_on_error: bool,
    /// Degrade to empty output on exhaustion so callers fall back to
    /// an alternate data source instead of propagating failure
    empty_on_exhaustion: bool,
}

impl QueryMode {
    fn command() -> Self {
        Self {
            label: "gh",
            sniff_stdout: false,
            stdout_on_error: false,
            empty_on_exhaustion: false,
        }
    }

    fn graphql() -> Self {
        Self {
            label: "GraphQL",
            sniff_stdout: true,
            stdout_on_error: true,
            empty_on_exhaustion: true,
        }
    }
}

/// GitHub CLI client with rate-limit backoff
#[derive(Debug, Clone)]
pub struct GhClient {
    config: GhClientConfig,
    executor: CommandExecutor,
    backoff: ExponentialBackoff,
}

impl Default for GhClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GhClient {
    /// Create a client with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(GhClientConfig::default())
    }

    /// Create a client with explicit configuration
    #[must_use]
    pub fn with_config(config: GhClientConfig) -> Self {
        let executor = CommandExecutor::new(ExecConfig {
            timeout: config.command_timeout,
            // Rate-limit retry is handled here, not in the executor
            max_retries: 0,
            ..ExecConfig::default()
        });
        let backoff = ExponentialBackoff::new(config.initial_delay, config.max_delay, config.jitter);
        Self {
            config,
            executor,
            backoff,
        }
    }

    /// The configured client policy
    #[must_use]
    pub fn config(&self) -> &GhClientConfig {
        &self.config
    }

    /// Run a gh command, retrying on rate limits with exponential
    /// backoff and jitter
    ///
    /// # Errors
    /// Returns [`GhError::CliNotFound`] when gh is missing,
    /// [`GhError::RateLimitExhausted`] when the retry ceiling is hit,
    /// and [`GhError::CommandFailed`] for any other failure (which is
    /// never retried).
    pub async fn run(&self, args: &[&str]) -> Result<String, GhError> {
        self.retry_with_backoff(args, &QueryMode::command()).await
    }

    /// Run a GraphQL query via `gh api graphql`
    ///
    /// Unlike [`run`](Self::run), this returns stdout even on
    /// non-zero exit codes (partial results land there) and degrades
    /// to an empty string on rate-limit exhaustion or a missing CLI,
    /// so callers skip fallback data sources instead of propagating
    /// failure.
    pub async fn run_graphql(&self, query: &str) -> String {
        let query_arg = format!("query={query}");
        let args = ["api", "graphql", "-f", query_arg.as_str()];
        match self.retry_with_backoff(&args, &QueryMode::graphql()).await {
            Ok(stdout) => stdout,
            Err(err) => {
                warn!(error = %err, "GraphQL query failed");
                String::new()
            }
        }
    }

    async fn retry_with_backoff(
        &self,
        args: &[&str],
        mode: &QueryMode,
    ) -> Result<String, GhError> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(self.config.program.as_str());
        argv.extend_from_slice(args);

        let mut total_wait = Duration::ZERO;

        for attempt in 0..self.config.max_retries {
            let result = self.executor.execute(&argv).await;

            if matches!(
                result.error.as_ref().map(|e| &e.kind),
                Some(ErrorKind::CommandNotFound)
            ) {
                if mode.stdout_on_error {
                    return Ok(String::new());
                }
                return Err(GhError::CliNotFound {
                    program: self.config.program.clone(),
                });
            }

            let stdout = result.stdout.trim().to_string();
            let stderr = result.stderr.trim().to_string();

            if result.return_code == 0 {
                return Ok(stdout);
            }

            let mut rate_limited = contains_any(&stderr, &self.config.rate_limit_markers);
            if mode.sniff_stdout {
                rate_limited = rate_limited
                    || contains_any(&stdout, &self.config.stdout_rate_limit_markers);
            }

            if rate_limited {
                if attempt + 1 < self.config.max_retries {
                    let wait = self.backoff.delay(attempt);
                    total_wait += wait;
                    warn!(
                        label = mode.label,
                        retry = attempt + 2,
                        max_retries = self.config.max_retries,
                        wait = %format_duration(&wait),
                        total_waited = %format_duration(&total_wait),
                        "Rate limit hit, backing off"
                    );
                    sleep(wait).await;
                    continue;
                }

                warn!(
                    label = mode.label,
                    retries = self.config.max_retries,
                    total_waited = %format_duration(&total_wait),
                    "Rate limit retries exhausted"
                );
                if mode.empty_on_exhaustion {
                    return Ok(String::new());
                }
                return Err(GhError::RateLimitExhausted {
                    retries: self.config.max_retries,
                    waited: total_wait,
                    stderr,
                });
            }

            // Non-rate-limit error: not safe to retry blindly
            debug!(label = mode.label, code = result.return_code, "gh command failed");
            if mode.stdout_on_error {
                return Ok(stdout);
            }
            return Err(GhError::CommandFailed { stderr });
        }

        Err(GhError::CommandFailed {
            stderr: "max retries exceeded".to_string(),
        })
    }

    /// Default branch of a repository, assuming `main` when it cannot
    /// be determined
    pub async fn default_branch(&self, repo: &str) -> String {
        let result = self
            .run(&["repo", "view", repo, "--json", "defaultBranchRef"])
            .await;

        match result {
            Ok(output) => serde_json::from_str::<serde_json::Value>(&output)
                .ok()
                .and_then(|v| {
                    v.pointer("/defaultBranchRef/name")
                        .and_then(|n| n.as_str())
                        .map(ToString::to_string)
                })
                .unwrap_or_else(|| "main".to_string()),
            Err(err) => {
                warn!(repo, error = %err, "Could not determine default branch, assuming 'main'");
                "main".to_string()
            }
        }
    }

    /// PR numbers for a repository, filtered by state
    ///
    /// `limit` of 0 means no limit.
    pub async fn list_prs(&self, repo: &str, state: &str, limit: u32) -> Vec<u64> {
        let limit_arg = limit.to_string();
        let mut args = vec![
            "pr", "list", "--repo", repo, "--state", state, "--json", "number",
        ];
        if limit > 0 {
            args.extend_from_slice(&["--limit", limit_arg.as_str()]);
        }

        let output = match self.run(&args).await {
            Ok(output) => output,
            Err(err) => {
                warn!(repo, error = %err, "Error listing PRs");
                return Vec::new();
            }
        };

        serde_json::from_str::<Vec<serde_json::Value>>(&output)
            .map(|prs| {
                prs.iter()
                    .filter_map(|pr| pr.get("number").and_then(serde_json::Value::as_u64))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Repository names under `owner` whose name matches `pattern`
    /// (anchored at the start), excluding any matching one of
    /// `exclude_patterns` (matched anywhere), sorted, capped at
    /// `max_matches` (0 = unlimited)
    pub async fn search_repos(
        &self,
        owner: &str,
        pattern: &str,
        max_matches: usize,
        exclude_patterns: &[&str],
    ) -> Vec<String> {
        let include = match Regex::new(&format!("^(?:{pattern})")) {
            Ok(re) => re,
            Err(err) => {
                warn!(pattern, error = %err, "Invalid repo search pattern");
                return Vec::new();
            }
        };

        let exclude = if exclude_patterns.is_empty() {
            None
        } else {
            let combined = exclude_patterns
                .iter()
                .map(|p| format!("(?:{p})"))
                .collect::<Vec<_>>()
                .join("|");
            match Regex::new(&combined) {
                Ok(re) => Some(re),
                Err(err) => {
                    warn!(error = %err, "Invalid exclude pattern combination");
                    None
                }
            }
        };

        // Fetch a generous batch, then filter locally.
        let fetch_limit = if max_matches == 0 {
            100_000
        } else {
            (max_matches * 10).max(1000)
        };
        let fetch_limit_arg = fetch_limit.to_string();

        let output = match self
            .run(&[
                "repo",
                "list",
                owner,
                "--limit",
                &fetch_limit_arg,
                "--json",
                "name",
            ])
            .await
        {
            Ok(output) => output,
            Err(err) => {
                warn!(owner, error = %err, "Error listing repositories");
                return Vec::new();
            }
        };

        let names: Vec<String> = serde_json::from_str::<Vec<serde_json::Value>>(&output)
            .map(|repos| {
                repos
                    .iter()
                    .filter_map(|r| r.get("name").and_then(|n| n.as_str()))
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut matching: Vec<String> = names
            .into_iter()
            .filter(|name| include.is_match(name))
            .filter(|name| exclude.as_ref().map_or(true, |re| !re.is_match(name)))
            .collect();

        matching.sort();
        if max_matches > 0 {
            matching.truncate(max_matches);
        }
        matching
    }

    /// PR metadata as raw JSON, or `None` when the fetch fails
    pub async fn pr_info(&self, repo: &str, pr_number: u64) -> Option<serde_json::Value> {
        let number = pr_number.to_string();
        let result = self
            .run(&[
                "pr",
                "view",
                &number,
                "--repo",
                repo,
                "--json",
                "number,author,title,state,url,mergeCommit",
            ])
            .await;

        match result {
            Ok(output) => serde_json::from_str(&output).ok(),
            Err(err) => {
                warn!(repo, pr = pr_number, error = %err, "Error fetching PR");
                None
            }
        }
    }
}

#[async_trait]
impl GitHubApi for GhClient {
    async fn merge_commit_sha(&self, repo: &str, pr_number: u64) -> Result<Option<String>> {
        let number = pr_number.to_string();
        let output = self
            .run(&["pr", "view", &number, "--repo", repo, "--json", "mergeCommit"])
            .await
            .with_context(|| format!("fetching merge commit for {repo}#{pr_number}"))?;

        let value: serde_json::Value =
            serde_json::from_str(&output).context("parsing PR merge-commit response")?;
        Ok(value
            .pointer("/mergeCommit/oid")
            .and_then(|v| v.as_str())
            .map(ToString::to_string))
    }

    async fn check_runs(&self, repo: &str, sha: &str) -> Result<Vec<CheckRun>> {
        let endpoint = format!("repos/{repo}/commits/{sha}/check-runs");
        let output = self
            .run(&[
                "api",
                &endpoint,
                "--jq",
                ".check_runs[] | {id, name, conclusion, status, html_url}",
            ])
            .await
            .with_context(|| format!("fetching check runs for {repo}@{sha}"))?;

        Ok(parse_check_runs(&output))
    }

    async fn job_steps(&self, repo: &str, job_id: u64) -> Result<Vec<String>> {
        let endpoint = format!("repos/{repo}/actions/jobs/{job_id}");
        let output = self
            .run(&["api", &endpoint, "--jq", ".steps[].name"])
            .await
            .with_context(|| format!("fetching steps for job {job_id} in {repo}"))?;

        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    async fn recent_commits(
        &self,
        repo: &str,
        branch: &str,
        limit: u32,
    ) -> Result<Vec<CommitInfo>> {
        let endpoint = format!("repos/{repo}/commits");
        let sha_param = format!("sha={branch}");
        let per_page = format!("per_page={limit}");
        let output = self
            .run(&[
                "api",
                &endpoint,
                "-f",
                &sha_param,
                "-f",
                &per_page,
                "--jq",
                ".[] | {sha: .sha, message: .commit.message, \
                 author: .author.login, date: .commit.author.date}",
            ])
            .await
            .with_context(|| format!("fetching commits on {repo}@{branch}"))?;

        // Newline-delimited JSON; malformed lines are skipped.
        Ok(output
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<CommitInfo>(line).ok())
            .collect())
    }

    async fn commit_pr_count(&self, repo: &str, sha: &str) -> Result<u32> {
        let endpoint = format!("repos/{repo}/commits/{sha}/pulls");
        let output = self
            .run(&["api", &endpoint, "--jq", "length"])
            .await
            .with_context(|| format!("fetching PR associations for {repo}@{sha}"))?;

        output
            .trim()
            .parse::<u32>()
            .with_context(|| format!("parsing PR count {output:?}"))
    }
}

fn contains_any(text: &str, markers: &[String]) -> bool {
    let lowered = text.to_lowercase();
    markers.iter().any(|m| lowered.contains(&m.to_lowercase()))
}

/// Human-readable duration: `XXmYYs` under an hour, `XhXXmYYs` above
pub(crate) fn format_duration(d: &Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{hours}h{mins:02}m{secs:02}s")
    } else {
        format!("{mins:02}m{secs:02}s")
    }
}
