//! # Retry Strategies
//!
//! Pluggable delay/continue policies consulted between command
//! attempts. Strategies are stateless, so one instance can be shared
//! across concurrent executions behind an `Arc`.

use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Delay and continue policy for retrying failed commands
pub trait RetryStrategy: fmt::Debug + Send + Sync {
    /// Delay before the next attempt
    ///
    /// `attempt` is zero-based: 0 is the first retry after the initial
    /// failure.
    fn delay(&self, attempt: u32) -> Duration;

    /// Whether the failure captured in `output` / `return_code` is
    /// worth retrying
    fn should_retry(&self, output: &str, return_code: i32) -> bool;
}

/// Fixed delay between attempts, always willing to retry
#[derive(Debug, Clone)]
pub struct ConstantDelay {
    /// Delay applied before every retry
    pub delay: Duration,
}

impl ConstantDelay {
    /// Create a constant-delay strategy
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for ConstantDelay {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RetryStrategy for ConstantDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }

    fn should_retry(&self, _output: &str, _return_code: i32) -> bool {
        // Termination is left to the caller's retry budget
        true
    }
}

/// Exponential backoff with jitter and optional pattern gating
///
/// The delay grows as `initial_delay * 2^attempt`, capped at
/// `max_delay`, then perturbed by a uniform random value within
/// ±`jitter` of the base so concurrent callers do not retry in
/// lockstep. When `retry_patterns` is non-empty, retries are limited
/// to failures whose output matches one of the patterns
/// (case-insensitive substring).
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound on the computed delay, before jitter
    pub max_delay: Duration,

    /// Jitter fraction in `[0, 1]`; 0.1 means ±10%
    pub jitter: f64,

    /// Substrings gating retry; empty means retry on any failure
    pub retry_patterns: Vec<String>,
}

impl ExponentialBackoff {
    /// Create a backoff strategy with no pattern gating
    #[must_use]
    pub fn new(initial_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            jitter,
            retry_patterns: Vec::new(),
        }
    }

    /// Restrict retries to outputs matching any of `patterns`
    #[must_use]
    pub fn with_retry_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retry_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(300), 0.1)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = (self.initial_delay.as_secs_f64() * 2f64.powi(exponent))
            .min(self.max_delay.as_secs_f64());

        let secs = if self.jitter > 0.0 && base > 0.0 {
            let spread = base * self.jitter;
            let perturbed = base + rand::thread_rng().gen_range(-spread..=spread);
            perturbed.max(0.0)
        } else {
            base
        };

        Duration::from_secs_f64(secs)
    }

    fn should_retry(&self, output: &str, _return_code: i32) -> bool {
        if self.retry_patterns.is_empty() {
            return true;
        }

        let lowered = output.to_lowercase();
        self.retry_patterns
            .iter()
            .any(|p| lowered.contains(&p.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_delay_invariant_across_attempts() {
        let strategy = ConstantDelay::new(Duration::from_millis(250));
        for attempt in [0, 1, 5, 100] {
            assert_eq!(strategy.delay(attempt), Duration::from_millis(250));
        }
        assert!(strategy.should_retry("anything", 1));
    }

    #[test]
    fn test_backoff_without_jitter_is_exact() {
        let strategy =
            ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(300), 0.0);
        assert_eq!(strategy.delay(0), Duration::from_secs(2));
        assert_eq!(strategy.delay(1), Duration::from_secs(4));
        assert_eq!(strategy.delay(2), Duration::from_secs(8));
        assert_eq!(strategy.delay(6), Duration::from_secs(128));
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let strategy =
            ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(300), 0.0);
        assert_eq!(strategy.delay(8), Duration::from_secs(300));
        assert_eq!(strategy.delay(30), Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_huge_attempt_does_not_overflow() {
        let strategy =
            ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(300), 0.0);
        assert_eq!(strategy.delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let strategy =
            ExponentialBackoff::new(Duration::from_secs(4), Duration::from_secs(300), 0.25);
        let base = 4.0 * 4.0; // attempt 2
        for _ in 0..200 {
            let delay = strategy.delay(2).as_secs_f64();
            assert!(delay >= base * 0.75 - 1e-9);
            assert!(delay <= base * 1.25 + 1e-9);
        }
    }

    #[test]
    fn test_jitter_never_negative() {
        let strategy =
            ExponentialBackoff::new(Duration::from_millis(1), Duration::from_secs(300), 1.0);
        for attempt in 0..50 {
            // Full jitter can push the perturbed value to zero but
            // never below it.
            let _ = strategy.delay(attempt);
        }
    }

    #[test]
    fn test_empty_patterns_always_retry() {
        let strategy = ExponentialBackoff::default();
        assert!(strategy.should_retry("any failure at all", 1));
    }

    #[test]
    fn test_patterns_gate_retries() {
        let strategy = ExponentialBackoff::default()
            .with_retry_patterns(["rate limit", "429", "try again"]);
        assert!(strategy.should_retry("API Rate Limit exceeded", 1));
        assert!(strategy.should_retry("HTTP 429", 1));
        assert!(!strategy.should_retry("permission denied", 1));
    }
}
