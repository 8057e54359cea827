//! # Command Executor
//!
//! Runs external commands with a bounded timeout, retry budget, and
//! output classification. Expected failure classes never surface as
//! `Err` — every invocation produces an [`ExecutionResult`] describing
//! what happened, and callers branch on its fields.
//!
//! ## Example
//!
//! ```no_run
//! use exec::{CommandExecutor, ExecConfig};
//!
//! # async fn example() {
//! let executor = CommandExecutor::new(ExecConfig::default());
//! let result = executor.execute(&["git", "status", "--short"]).await;
//! if result.success {
//!     println!("{}", result.stdout);
//! }
//! # }
//! ```

use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::classify::{ErrorClassifier, ErrorInfo, ErrorKind};
use crate::retry::RetryStrategy;

/// Execution policy for a [`CommandExecutor`]
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Wall-clock bound per attempt
    pub timeout: Duration,

    /// Retry budget; the command runs at most `max_retries + 1` times
    pub max_retries: u32,

    /// Fixed delay between attempts when no strategy is configured
    pub retry_delay: Duration,

    /// Classify against stdout+stderr rather than stdout alone
    pub combine_streams: bool,

    /// Treat a classified error as failure even on a zero return code
    pub treat_nonzero_as_error: bool,

    /// Delay/continue policy; `None` falls back to `retry_delay`
    pub strategy: Option<Arc<dyn RetryStrategy>>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 0,
            retry_delay: Duration::from_secs(1),
            combine_streams: true,
            treat_nonzero_as_error: true,
            strategy: None,
        }
    }
}

/// Outcome of one logical command invocation (including retries)
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Whether the final attempt succeeded
    pub success: bool,

    /// Captured stdout of the final attempt
    pub stdout: String,

    /// Captured stderr of the final attempt
    pub stderr: String,

    /// Return code; 124 for timeout, 127 for command-not-found
    pub return_code: i32,

    /// The command line that was run
    pub command: String,

    /// Wall-clock time across all attempts
    pub duration: Duration,

    /// Number of attempts actually made
    pub attempts: u32,

    /// Classification of the final attempt
    pub error: Option<ErrorInfo>,
}

impl ExecutionResult {
    /// The output the classifier saw, per the stream-combining config
    fn classified_output(&self, combine_streams: bool) -> String {
        if combine_streams {
            format!("{}{}", self.stdout, self.stderr)
        } else {
            self.stdout.clone()
        }
    }
}

/// Resilient runner for external commands
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: ExecConfig,
    classifier: ErrorClassifier,
}

impl CommandExecutor {
    /// Create an executor with the default classifier
    #[must_use]
    pub fn new(config: ExecConfig) -> Self {
        let classifier = ErrorClassifier::new(config.timeout);
        Self { config, classifier }
    }

    /// Create an executor with a caller-extended classifier
    #[must_use]
    pub fn with_classifier(config: ExecConfig, classifier: ErrorClassifier) -> Self {
        Self { config, classifier }
    }

    /// The configured execution policy
    #[must_use]
    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Run a command, retrying per the configured policy
    ///
    /// `command[0]` is the program, the rest its arguments. Never
    /// fails: timeouts, missing binaries, and nonzero exits are all
    /// encoded in the returned [`ExecutionResult`].
    pub async fn execute<S: AsRef<str>>(&self, command: &[S]) -> ExecutionResult {
        self.execute_in(command, None, None).await
    }

    /// Run a command with extra environment variables and/or a
    /// working directory
    pub async fn execute_in<S: AsRef<str>>(
        &self,
        command: &[S],
        envs: Option<&HashMap<String, String>>,
        cwd: Option<&Path>,
    ) -> ExecutionResult {
        let argv: Vec<&str> = command.iter().map(AsRef::as_ref).collect();
        let cmd_display = argv.join(" ");
        let start = Instant::now();
        let mut last: Option<ExecutionResult> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = match &self.config.strategy {
                    Some(strategy) => strategy.delay(attempt - 1),
                    None => self.config.retry_delay,
                };
                debug!(
                    attempt,
                    max_retries = self.config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    command = %cmd_display,
                    "Retrying command"
                );
                sleep(delay).await;
            }

            let result = self
                .run_once(&argv, &cmd_display, attempt + 1, start, envs, cwd)
                .await;

            let recoverable = result.error.as_ref().map_or(true, |e| e.recoverable);
            let mut stop = result.success || !recoverable;

            if !stop {
                if let Some(strategy) = &self.config.strategy {
                    let output = result.classified_output(self.config.combine_streams);
                    if !strategy.should_retry(&output, result.return_code) {
                        debug!(command = %cmd_display, "Retry strategy declined further attempts");
                        stop = true;
                    }
                }
            }

            last = Some(result);
            if stop {
                break;
            }
        }

        last.unwrap_or_else(|| ExecutionResult {
            success: false,
            stdout: String::new(),
            stderr: "No execution attempted".to_string(),
            return_code: 1,
            command: cmd_display,
            duration: start.elapsed(),
            attempts: 0,
            error: Some(ErrorInfo {
                kind: ErrorKind::ExecutionError,
                is_error: true,
                message: "No execution attempted".to_string(),
                suggestion: String::new(),
                recoverable: false,
            }),
        })
    }

    async fn run_once(
        &self,
        argv: &[&str],
        cmd_display: &str,
        attempt: u32,
        start: Instant,
        envs: Option<&HashMap<String, String>>,
        cwd: Option<&Path>,
    ) -> ExecutionResult {
        let Some((program, args)) = argv.split_first() else {
            return self.synthesized(
                cmd_display,
                attempt,
                start,
                1,
                String::new(),
                "Empty command".to_string(),
                ErrorInfo {
                    kind: ErrorKind::ExecutionError,
                    is_error: true,
                    message: "Empty command".to_string(),
                    suggestion: "Provide a program name and arguments".to_string(),
                    recoverable: false,
                },
            );
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(envs) = envs {
            cmd.envs(envs);
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        match timeout(self.config.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let return_code = output.status.code().unwrap_or(-1);
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();

                let classified = if self.config.combine_streams {
                    format!("{stdout}{stderr}")
                } else {
                    stdout.clone()
                };
                let error = self.classifier.classify(&classified, return_code, cmd_display);
                let success = return_code == 0
                    && (!self.config.treat_nonzero_as_error || !error.is_error);

                debug!(
                    code = return_code,
                    success,
                    attempt,
                    command = %cmd_display,
                    "Command completed"
                );

                ExecutionResult {
                    success,
                    stdout,
                    stderr,
                    return_code,
                    command: cmd_display.to_string(),
                    duration: start.elapsed(),
                    attempts: attempt,
                    error: Some(error),
                }
            }
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(program = %program, "Command not found");
                self.synthesized(
                    cmd_display,
                    attempt,
                    start,
                    127,
                    String::new(),
                    format!("Command not found: {program}"),
                    ErrorInfo {
                        kind: ErrorKind::CommandNotFound,
                        is_error: true,
                        message: format!("Command not found: {program}"),
                        suggestion: "Ensure the required command is installed and on PATH"
                            .to_string(),
                        recoverable: false,
                    },
                )
            }
            Ok(Err(err)) => {
                warn!(command = %cmd_display, error = %err, "Command execution failed");
                self.synthesized(
                    cmd_display,
                    attempt,
                    start,
                    1,
                    String::new(),
                    format!("Execution error: {err}"),
                    ErrorInfo {
                        kind: ErrorKind::ExecutionError,
                        is_error: true,
                        message: format!("Command execution failed: {err}"),
                        suggestion: "Check command syntax and system resources".to_string(),
                        recoverable: true,
                    },
                )
            }
            Err(_elapsed) => {
                let secs = self.config.timeout.as_secs_f64();
                warn!(command = %cmd_display, timeout_secs = secs, "Command timed out");
                self.synthesized(
                    cmd_display,
                    attempt,
                    start,
                    124,
                    String::new(),
                    format!("Command timed out after {secs} seconds"),
                    ErrorInfo {
                        kind: ErrorKind::Timeout,
                        is_error: true,
                        message: format!("Command timed out after {secs} seconds"),
                        suggestion: "Try increasing the timeout or check for hanging processes"
                            .to_string(),
                        recoverable: true,
                    },
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn synthesized(
        &self,
        display: &str,
        attempt: u32,
        start: Instant,
        return_code: i32,
        stdout: String,
        stderr: String,
        error: ErrorInfo,
    ) -> ExecutionResult {
        ExecutionResult {
            success: false,
            stdout,
            stderr,
            return_code,
            command: display.to_string(),
            duration: start.elapsed(),
            attempts: attempt,
            error: Some(error),
        }
    }

    /// Whether `program` resolves on PATH
    pub async fn command_available(program: &str) -> bool {
        let probe = Command::new("which")
            .arg(program)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        matches!(
            timeout(Duration::from_secs(5), probe).await,
            Ok(Ok(status)) if status.success()
        )
    }

    /// First line of `program <version_arg>` output, if it succeeds
    pub async fn command_version(program: &str, version_arg: &str) -> Option<String> {
        let executor = CommandExecutor::new(ExecConfig {
            timeout: Duration::from_secs(10),
            ..ExecConfig::default()
        });
        let result = executor.execute(&[program, version_arg]).await;
        if result.success {
            result.stdout.lines().next().map(|l| l.trim().to_string())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_command_is_execution_error() {
        let executor = CommandExecutor::new(ExecConfig::default());
        let result = executor.execute::<&str>(&[]).await;
        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(
            result.error.as_ref().map(|e| e.kind.clone()),
            Some(ErrorKind::ExecutionError)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_command_invariant() {
        let executor = CommandExecutor::new(ExecConfig::default());
        let result = executor.execute(&["echo", "hello"]).await;
        assert!(result.success);
        assert_eq!(result.return_code, 0);
        assert_eq!(result.attempts, 1);
        assert!(result.stdout.contains("hello"));
        assert!(!result.error.as_ref().map_or(true, |e| e.is_error));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_passthrough() {
        let executor = CommandExecutor::new(ExecConfig::default());
        let mut envs = HashMap::new();
        envs.insert("EXEC_TEST_MARKER".to_string(), "marker-value".to_string());
        let result = executor
            .execute_in(
                &["sh", "-c", "printf '%s' \"$EXEC_TEST_MARKER\""],
                Some(&envs),
                None,
            )
            .await;
        assert!(result.success);
        assert_eq!(result.stdout, "marker-value");
    }
}
