//! Integration tests for the command executor, driven by stub shell
//! scripts so attempt counts and synthesized return codes are
//! observable from the outside.

#![cfg(unix)]

use exec::{CommandExecutor, ErrorKind, ExecConfig, ExponentialBackoff};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn invocation_count(counter: &Path) -> usize {
    fs::read_to_string(counter)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn persistent_failure_exhausts_retry_budget() {
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("count");
    let script = write_script(
        dir.path(),
        "always-fail.sh",
        &format!("echo run >> {}\necho boom >&2\nexit 1", counter.display()),
    );

    let executor = CommandExecutor::new(ExecConfig {
        max_retries: 3,
        retry_delay: Duration::from_millis(1),
        ..ExecConfig::default()
    });

    let result = executor.execute(&[script.to_str().unwrap()]).await;

    assert!(!result.success);
    assert_eq!(result.return_code, 1);
    assert_eq!(result.attempts, 4);
    assert_eq!(invocation_count(&counter), 4);
}

#[tokio::test]
async fn command_not_found_is_never_retried() {
    let executor = CommandExecutor::new(ExecConfig {
        max_retries: 5,
        retry_delay: Duration::from_millis(1),
        ..ExecConfig::default()
    });

    let result = executor
        .execute(&["/definitely/not/a/real/binary-xyz"])
        .await;

    assert!(!result.success);
    assert_eq!(result.return_code, 127);
    assert_eq!(result.attempts, 1);
    let error = result.error.expect("classification present");
    assert_eq!(error.kind, ErrorKind::CommandNotFound);
    assert!(!error.recoverable);
}

#[tokio::test]
async fn timeout_retries_then_surfaces_124() {
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("count");
    let script = write_script(
        dir.path(),
        "hang.sh",
        &format!("echo run >> {}\nsleep 5", counter.display()),
    );

    let executor = CommandExecutor::new(ExecConfig {
        timeout: Duration::from_millis(200),
        max_retries: 2,
        retry_delay: Duration::from_millis(1),
        ..ExecConfig::default()
    });

    let result = executor.execute(&[script.to_str().unwrap()]).await;

    assert!(!result.success);
    assert_eq!(result.return_code, 124);
    assert_eq!(result.attempts, 3);
    assert_eq!(invocation_count(&counter), 3);
    assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn strategy_pattern_veto_stops_after_first_attempt() {
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("count");
    let script = write_script(
        dir.path(),
        "fail-once.sh",
        &format!(
            "echo run >> {}\necho 'some unrelated failure' >&2\nexit 1",
            counter.display()
        ),
    );

    let strategy = ExponentialBackoff::new(
        Duration::from_millis(1),
        Duration::from_millis(10),
        0.0,
    )
    .with_retry_patterns(["rate limit"]);

    let executor = CommandExecutor::new(ExecConfig {
        max_retries: 4,
        strategy: Some(Arc::new(strategy)),
        ..ExecConfig::default()
    });

    let result = executor.execute(&[script.to_str().unwrap()]).await;

    assert!(!result.success);
    assert_eq!(result.attempts, 1);
    assert_eq!(invocation_count(&counter), 1);
}

#[tokio::test]
async fn failure_then_success_stops_at_success() {
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("count");
    // Fails until the third invocation.
    let script = write_script(
        dir.path(),
        "flaky.sh",
        &format!(
            "echo run >> {c}\nif [ $(wc -l < {c}) -lt 3 ]; then exit 1; fi\necho ok",
            c = counter.display()
        ),
    );

    let executor = CommandExecutor::new(ExecConfig {
        max_retries: 10,
        retry_delay: Duration::from_millis(1),
        ..ExecConfig::default()
    });

    let result = executor.execute(&[script.to_str().unwrap()]).await;

    assert!(result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(invocation_count(&counter), 3);
    assert!(result.stdout.contains("ok"));
}

#[tokio::test]
async fn permission_pattern_short_circuits_retries() {
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("count");
    let script = write_script(
        dir.path(),
        "denied.sh",
        &format!(
            "echo run >> {}\necho 'permission denied' >&2\nexit 1",
            counter.display()
        ),
    );

    let executor = CommandExecutor::new(ExecConfig {
        max_retries: 5,
        retry_delay: Duration::from_millis(1),
        ..ExecConfig::default()
    });

    let result = executor.execute(&[script.to_str().unwrap()]).await;

    assert!(!result.success);
    // Non-recoverable classification stops the loop immediately.
    assert_eq!(result.attempts, 1);
    assert_eq!(invocation_count(&counter), 1);
    assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::Permission));
}
