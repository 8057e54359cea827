//! # CI Status Resolution
//!
//! Resolves whether build/test verification ran for a merge commit
//! and whether it passed, from the check runs GitHub reports for that
//! commit. Evidence of build and test activity is detected by keyword
//! matching against job names, falling back to step names for a
//! bounded number of jobs when job names are uninformative.
//!
//! ## Example
//!
//! ```no_run
//! use scm::{CiResolver, GhClient};
//!
//! # async fn example() {
//! let client = GhClient::new();
//! let resolver = CiResolver::new(&client, "5dlabs/cto");
//! let resolution = resolver.resolve_pr(2622).await;
//! println!("{}: build={}", resolution.status, resolution.has_build_evidence);
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::api::GitHubApi;

/// Job names (case-insensitive substrings) that indicate a build ran
pub const BUILD_KEYWORDS: &[&str] = &[
    "build",
    "compile",
    "make",
    "gradle",
    "maven",
    "cargo",
    "npm run build",
    "yarn build",
    "webpack",
    "tsc",
    "javac",
    "gcc",
    "cmake",
    "bazel",
];

/// Job names (case-insensitive substrings) that indicate tests ran
pub const TEST_KEYWORDS: &[&str] = &[
    "test",
    "spec",
    "jest",
    "pytest",
    "junit",
    "mocha",
    "karma",
    "cypress",
    "selenium",
    "unittest",
    "rspec",
    "minitest",
    "coverage",
    "e2e",
];

/// Step-name descent is capped to bound remote-call cost; job names
/// are descriptive enough in most pipelines.
const MAX_STEP_LOOKUPS: usize = 5;

/// Status of an individual check run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Check is queued but not started
    Queued,
    /// Check is currently running
    InProgress,
    /// Check completed
    Completed,
}

/// Conclusion of a completed check run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    /// Check passed
    Success,
    /// Check failed
    Failure,
    /// Check was cancelled
    Cancelled,
    /// Check timed out
    TimedOut,
    /// Action required from a maintainer
    ActionRequired,
    /// Neutral (informational)
    Neutral,
    /// Check was skipped
    Skipped,
    /// Stale check
    Stale,
    /// Startup failure
    StartupFailure,
}

impl CheckConclusion {
    /// Whether this conclusion counts as a CI failure
    ///
    /// Unrecognized or informational conclusions (neutral, skipped)
    /// are deliberately not failures.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::Failure | Self::Cancelled | Self::TimedOut | Self::ActionRequired
        )
    }
}

/// Parse a status string from either REST or GraphQL casing
#[must_use]
pub fn parse_status(s: &str) -> CheckStatus {
    match s {
        "QUEUED" | "queued" => CheckStatus::Queued,
        "IN_PROGRESS" | "in_progress" => CheckStatus::InProgress,
        // Default to completed for unknown values
        _ => CheckStatus::Completed,
    }
}

/// Parse a conclusion string from either REST or GraphQL casing
#[must_use]
pub fn parse_conclusion(s: &str) -> Option<CheckConclusion> {
    match s {
        "SUCCESS" | "success" => Some(CheckConclusion::Success),
        "FAILURE" | "failure" => Some(CheckConclusion::Failure),
        "CANCELLED" | "cancelled" => Some(CheckConclusion::Cancelled),
        "TIMED_OUT" | "timed_out" => Some(CheckConclusion::TimedOut),
        "ACTION_REQUIRED" | "action_required" => Some(CheckConclusion::ActionRequired),
        "NEUTRAL" | "neutral" => Some(CheckConclusion::Neutral),
        "SKIPPED" | "skipped" => Some(CheckConclusion::Skipped),
        "STALE" | "stale" => Some(CheckConclusion::Stale),
        "STARTUP_FAILURE" | "startup_failure" => Some(CheckConclusion::StartupFailure),
        _ => None,
    }
}

/// An individual check run reported for a commit
#[derive(Debug, Clone, Serialize)]
pub struct CheckRun {
    /// Job id, used for step lookup when present
    pub id: Option<u64>,

    /// Check name (e.g. "lint-rust", "build-and-test")
    pub name: String,

    /// Current status
    pub status: CheckStatus,

    /// Conclusion, present once completed
    pub conclusion: Option<CheckConclusion>,

    /// Details URL
    pub html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCheckRun {
    id: Option<u64>,
    name: Option<String>,
    status: Option<String>,
    conclusion: Option<String>,
    html_url: Option<String>,
}

/// Parse newline-delimited check-run JSON as emitted by
/// `gh api .../check-runs --jq`, skipping malformed lines
#[must_use]
pub fn parse_check_runs(output: &str) -> Vec<CheckRun> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<RawCheckRun>(line) {
            Ok(raw) => Some(CheckRun {
                id: raw.id,
                name: raw.name.unwrap_or_else(|| "unknown check".to_string()),
                status: raw.status.as_deref().map_or(CheckStatus::Completed, parse_status),
                conclusion: raw.conclusion.as_deref().and_then(parse_conclusion),
                html_url: raw.html_url,
            }),
            Err(err) => {
                debug!(error = %err, "Skipping malformed check-run line");
                None
            }
        })
        .collect()
}

/// Overall CI status for a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    /// All checks completed without failure
    Success,
    /// At least one check failed
    Failure,
    /// Checks are still running
    Pending,
    /// No check runs were reported at all
    NoCi,
    /// Status could not be determined
    Unknown,
}

impl fmt::Display for CiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Pending => "pending",
            Self::NoCi => "no_ci",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A failed check with its details URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCheck {
    /// Check name
    pub name: String,

    /// Details URL, when GitHub reported one
    pub url: Option<String>,
}

/// Resolved CI evidence for one commit
#[derive(Debug, Clone, Serialize)]
pub struct CiResolution {
    /// Overall status
    pub status: CiStatus,

    /// Checks that completed with a failing conclusion
    pub failed_checks: Vec<FailedCheck>,

    /// Names of all check runs observed
    pub check_names: Vec<String>,

    /// A job or step name matched a build keyword
    pub has_build_evidence: bool,

    /// A job or step name matched a test keyword
    pub has_test_evidence: bool,

    /// Where the build evidence was found ("job: …" or "step: …")
    pub build_evidence: Option<String>,

    /// Where the test evidence was found ("job: …" or "step: …")
    pub test_evidence: Option<String>,
}

impl CiResolution {
    fn with_status(status: CiStatus) -> Self {
        Self {
            status,
            failed_checks: Vec::new(),
            check_names: Vec::new(),
            has_build_evidence: false,
            has_test_evidence: false,
            build_evidence: None,
            test_evidence: None,
        }
    }
}

fn matches_keyword(name: &str, keywords: &[&str]) -> bool {
    let lowered = name.to_lowercase();
    keywords.iter().any(|k| lowered.contains(k))
}

/// Resolves CI status for commits in one repository
pub struct CiResolver<'a> {
    api: &'a dyn GitHubApi,
    repo: String,
}

impl<'a> CiResolver<'a> {
    /// Create a resolver for `repo` ("owner/name")
    pub fn new(api: &'a dyn GitHubApi, repo: impl Into<String>) -> Self {
        Self {
            api,
            repo: repo.into(),
        }
    }

    /// Resolve CI status for a PR's merge commit
    ///
    /// Infallible by design: an unavailable merge commit or a failed
    /// remote call resolves to [`CiStatus::Unknown`] rather than an
    /// error, since absent CI data is itself a meaningful signal.
    pub async fn resolve_pr(&self, pr_number: u64) -> CiResolution {
        let sha = match self.api.merge_commit_sha(&self.repo, pr_number).await {
            Ok(Some(sha)) => sha,
            Ok(None) => {
                debug!(repo = %self.repo, pr = pr_number, "PR has no merge commit");
                return CiResolution::with_status(CiStatus::Unknown);
            }
            Err(err) => {
                warn!(repo = %self.repo, pr = pr_number, error = %err, "Failed to fetch PR metadata");
                return CiResolution::with_status(CiStatus::Unknown);
            }
        };

        self.resolve_commit(&sha).await
    }

    /// Resolve CI status for a specific commit
    pub async fn resolve_commit(&self, sha: &str) -> CiResolution {
        let runs = match self.api.check_runs(&self.repo, sha).await {
            Ok(runs) => runs,
            Err(err) => {
                warn!(repo = %self.repo, sha, error = %err, "Failed to fetch check runs");
                return CiResolution::with_status(CiStatus::Unknown);
            }
        };

        // Zero check runs is a first-class negative signal, not an error.
        if runs.is_empty() {
            debug!(repo = %self.repo, sha, "No check runs reported");
            return CiResolution::with_status(CiStatus::NoCi);
        }

        let mut failed_checks = Vec::new();
        let mut check_names = Vec::new();
        let mut job_ids = Vec::new();
        let mut has_pending = false;
        let mut build_evidence: Option<String> = None;
        let mut test_evidence: Option<String> = None;

        for run in &runs {
            check_names.push(run.name.clone());
            if let Some(id) = run.id {
                job_ids.push(id);
            }

            if build_evidence.is_none() && matches_keyword(&run.name, BUILD_KEYWORDS) {
                build_evidence = Some(format!("job: {}", run.name));
            }
            if test_evidence.is_none() && matches_keyword(&run.name, TEST_KEYWORDS) {
                test_evidence = Some(format!("job: {}", run.name));
            }

            if run.status != CheckStatus::Completed {
                has_pending = true;
                continue;
            }

            if run.conclusion.is_some_and(CheckConclusion::is_failure) {
                failed_checks.push(FailedCheck {
                    name: run.name.clone(),
                    url: run.html_url.clone(),
                });
            }
        }

        // Job names missed build or test evidence: descend one level
        // into step names, capped at MAX_STEP_LOOKUPS jobs.
        if (build_evidence.is_none() || test_evidence.is_none()) && !job_ids.is_empty() {
            for job_id in job_ids.iter().take(MAX_STEP_LOOKUPS) {
                if build_evidence.is_some() && test_evidence.is_some() {
                    break;
                }

                let steps = match self.api.job_steps(&self.repo, *job_id).await {
                    Ok(steps) => steps,
                    Err(err) => {
                        debug!(repo = %self.repo, job_id, error = %err, "Step lookup failed");
                        continue;
                    }
                };

                for step in steps {
                    if build_evidence.is_none() && matches_keyword(&step, BUILD_KEYWORDS) {
                        build_evidence = Some(format!("step: {step}"));
                    }
                    if test_evidence.is_none() && matches_keyword(&step, TEST_KEYWORDS) {
                        test_evidence = Some(format!("step: {step}"));
                    }
                    if build_evidence.is_some() && test_evidence.is_some() {
                        break;
                    }
                }
            }
        }

        // A still-running pipeline outranks an already-failed sibling:
        // other jobs may not have reported yet.
        let status = if has_pending {
            CiStatus::Pending
        } else if !failed_checks.is_empty() {
            CiStatus::Failure
        } else {
            CiStatus::Success
        };

        info!(
            repo = %self.repo,
            sha,
            %status,
            checks = check_names.len(),
            failed = failed_checks.len(),
            build = build_evidence.is_some(),
            test = test_evidence.is_some(),
            "Resolved CI status"
        );

        CiResolution {
            status,
            failed_checks,
            check_names,
            has_build_evidence: build_evidence.is_some(),
            has_test_evidence: test_evidence.is_some(),
            build_evidence,
            test_evidence,
        }
    }
}
