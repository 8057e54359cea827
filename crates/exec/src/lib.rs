//! # exec
//!
//! Resilient external-command execution: bounded timeouts, retry
//! budgets with pluggable backoff strategies, and an ordered-rule
//! classifier that maps command output and return codes onto a small
//! failure taxonomy.
//!
//! Expected failures (nonzero exits, timeouts, missing binaries) are
//! values, not errors: [`CommandExecutor::execute`] always returns an
//! [`ExecutionResult`] and callers branch on its fields.

pub mod classify;
pub mod executor;
pub mod retry;

pub use classify::{ErrorClassifier, ErrorInfo, ErrorKind, PatternRule};
pub use executor::{CommandExecutor, ExecConfig, ExecutionResult};
pub use retry::{ConstantDelay, ExponentialBackoff, RetryStrategy};
