//! # Command Output Classification
//!
//! Pattern and return-code based failure taxonomy for external command
//! output. Rules are evaluated in priority order: caller-registered
//! rules first, then the built-in categories, then return-code
//! heuristics. The first matching rule wins, which lets callers
//! override generic detection with domain-specific categories without
//! touching the built-in table.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Failure category assigned to a command outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Command completed without error
    Success,
    /// Interactive or web-based authentication required
    AuthRequired,
    /// TLS certificate verification failed
    TlsCertificate,
    /// Network connectivity issue
    Network,
    /// Permission denied or insufficient privileges
    Permission,
    /// Requested remote resource does not exist
    NotFound,
    /// The command binary is not installed or not on PATH
    CommandNotFound,
    /// Execution exceeded the configured timeout
    Timeout,
    /// Nonzero exit with no recognized pattern
    Generic,
    /// The process could not be spawned or waited on
    ExecutionError,
    /// Caller-defined category
    Custom(String),
}

/// Detailed classification of a command outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Failure category
    pub kind: ErrorKind,

    /// Whether the outcome is an error at all
    pub is_error: bool,

    /// Human-readable description
    pub message: String,

    /// Remediation hint for the operator
    pub suggestion: String,

    /// Whether a retry has a reasonable chance of success
    pub recoverable: bool,
}

impl ErrorInfo {
    /// Classification for a clean exit
    #[must_use]
    pub fn success() -> Self {
        Self {
            kind: ErrorKind::Success,
            is_error: false,
            message: "Command completed successfully".to_string(),
            suggestion: String::new(),
            recoverable: true,
        }
    }
}

/// A named set of case-insensitive patterns mapping to one category
#[derive(Debug, Clone)]
pub struct PatternRule {
    /// Rule name, for diagnostics
    pub name: String,

    patterns: Vec<Regex>,

    /// Category assigned when any pattern matches
    pub kind: ErrorKind,

    /// Message for the resulting [`ErrorInfo`]
    pub message: String,

    /// Suggestion for the resulting [`ErrorInfo`]
    pub suggestion: String,

    /// Whether matches are considered transient
    pub recoverable: bool,
}

impl PatternRule {
    /// Compile a rule from raw pattern strings
    ///
    /// # Errors
    /// Returns an error if any pattern is not a valid regex.
    pub fn new(
        name: impl Into<String>,
        patterns: &[&str],
        kind: ErrorKind,
        message: impl Into<String>,
        suggestion: impl Into<String>,
        recoverable: bool,
    ) -> Result<Self> {
        let name = name.into();
        let compiled = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("invalid pattern {p:?} in rule {name:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name,
            patterns: compiled,
            kind,
            message: message.into(),
            suggestion: suggestion.into(),
            recoverable,
        })
    }

    fn matches(&self, output: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(output))
    }

    fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind.clone(),
            is_error: true,
            message: self.message.clone(),
            suggestion: self.suggestion.clone(),
            recoverable: self.recoverable,
        }
    }
}

/// Ordered-rule classifier for command output
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    timeout: Duration,
    builtin: Vec<PatternRule>,
    custom: Vec<PatternRule>,
}

impl ErrorClassifier {
    /// Create a classifier with the built-in rule table
    ///
    /// `timeout` is only used to word timeout messages.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            builtin: builtin_rules(),
            custom: Vec::new(),
        }
    }

    /// Register a caller-defined rule, checked before the built-ins
    pub fn add_rule(&mut self, rule: PatternRule) {
        self.custom.push(rule);
    }

    /// Register a single-pattern rule
    ///
    /// # Errors
    /// Returns an error if the pattern is not a valid regex.
    pub fn add_simple_pattern(
        &mut self,
        pattern: &str,
        kind: ErrorKind,
        message: impl Into<String>,
        suggestion: impl Into<String>,
        recoverable: bool,
    ) -> Result<()> {
        let rule = PatternRule::new(
            format!("custom-{pattern}"),
            &[pattern],
            kind,
            message,
            suggestion,
            recoverable,
        )?;
        self.add_rule(rule);
        Ok(())
    }

    /// Classify command output and return code
    ///
    /// Precedence: custom rules, built-in rules, return-code
    /// heuristics (127, 124), then generic nonzero; a zero return code
    /// with no matching pattern is a success.
    #[must_use]
    pub fn classify(&self, output: &str, return_code: i32, command: &str) -> ErrorInfo {
        for rule in self.custom.iter().chain(self.builtin.iter()) {
            if rule.matches(output) {
                return rule.to_error_info();
            }
        }

        let lowered = output.to_lowercase();

        if return_code == 127 || lowered.contains("command not found") {
            let program = command.split_whitespace().next().unwrap_or("unknown");
            return ErrorInfo {
                kind: ErrorKind::CommandNotFound,
                is_error: true,
                message: format!("Command not found: {program}"),
                suggestion: "Ensure the required command is installed and on PATH".to_string(),
                recoverable: false,
            };
        }

        if return_code == 124 || lowered.contains("timed out") || lowered.contains("timeout") {
            return ErrorInfo {
                kind: ErrorKind::Timeout,
                is_error: true,
                message: format!("Command timed out after {} seconds", self.timeout.as_secs()),
                suggestion: "Try increasing the timeout or check for hanging processes"
                    .to_string(),
                recoverable: true,
            };
        }

        if return_code != 0 {
            return ErrorInfo {
                kind: ErrorKind::Generic,
                is_error: true,
                message: format!("Command failed with return code {return_code}"),
                suggestion: "Check the command output for details".to_string(),
                recoverable: true,
            };
        }

        ErrorInfo::success()
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

fn builtin_rules() -> Vec<PatternRule> {
    let rules = [
        (
            "auth-required",
            &[
                r"to sign in, use a web browser",
                r"authentication required",
                r"login required",
                r"gh auth login",
                r"interactive authentication is needed",
                r"enter the code .* to authenticate",
            ][..],
            ErrorKind::AuthRequired,
            "Authentication required",
            "Complete authentication (e.g. `gh auth login`) and retry",
            true,
        ),
        (
            "tls-cert",
            &[
                r"tls: failed to verify certificate",
                r"certificate verify failed",
                r"x509: certificate",
                r"certificate signed by unknown authority",
                r"certificate has expired",
                r"ssl certificate problem",
            ][..],
            ErrorKind::TlsCertificate,
            "TLS certificate verification failed",
            "Fix the certificate chain or contact your administrator",
            true,
        ),
        (
            "network",
            &[
                r"connection refused",
                r"network is unreachable",
                r"connection timed out",
                r"dial tcp.*timeout",
                r"no route to host",
                r"temporary failure in name resolution",
            ][..],
            ErrorKind::Network,
            "Network connectivity issue",
            "Check network connectivity and endpoint configuration",
            true,
        ),
        (
            "permission",
            &[
                r"forbidden",
                r"access denied",
                r"permission denied",
                r"rbac.*denied",
            ][..],
            ErrorKind::Permission,
            "Permission denied or insufficient permissions",
            "Contact your administrator to check permissions",
            false,
        ),
        (
            "resource-not-found",
            &[
                r"could not resolve to a repository",
                r"no records found",
                r"could not find.*resource",
                r"resource.*does not exist",
            ][..],
            ErrorKind::NotFound,
            "Remote resource not found",
            "Verify the resource name and that it exists in the target environment",
            false,
        ),
    ];

    rules
        .into_iter()
        .map(|(name, patterns, kind, message, suggestion, recoverable)| {
            PatternRule::new(name, patterns, kind, message, suggestion, recoverable)
                .expect("built-in patterns are valid")
        })
        .collect()
}
