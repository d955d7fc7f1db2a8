//! End-to-end tests for the `claw-logrotate` binary.
//!
//! These tests verify:
//! 1. Lines piped to `write` land in the family directory
//! 2. `query` reads them back as JSON
//! 3. Invalid options exit with a failure status

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn claw_logrotate() -> Command {
    Command::cargo_bin("claw-logrotate").expect("binary is built")
}

// ============================================================================
// Write
// ============================================================================

#[test]
fn test_write_creates_log_file() {
    let dir = TempDir::new().expect("create temp dir");

    claw_logrotate()
        .args(["--format", "json", "write", "--filename", "app.log", "--date-pattern", ""])
        .arg("--dirname")
        .arg(dir.path())
        .write_stdin("first\nsecond\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"lines\": 2"));

    let content = std::fs::read_to_string(dir.path().join("app.log")).expect("read log");
    assert_eq!(content, "first\nsecond\n");
}

#[test]
fn test_write_rejects_invalid_max_files() {
    claw_logrotate()
        .args(["write", "--max-files", "many"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid retention"));
}

// ============================================================================
// Query
// ============================================================================

#[test]
fn test_write_then_query_round_trip() {
    let dir = TempDir::new().expect("create temp dir");
    let records = [
        r#"{"timestamp":"2029-01-01T01:00:00Z","level":"info","message":"boot"}"#,
        r#"{"timestamp":"2029-01-01T02:00:00Z","level":"error","message":"crash"}"#,
    ]
    .join("\n");

    claw_logrotate()
        .args(["write", "--filename", "svc-%DATE%.log", "--date-pattern", "YYYY"])
        .arg("--dirname")
        .arg(dir.path())
        .write_stdin(records)
        .assert()
        .success();

    claw_logrotate()
        .args([
            "--format",
            "json",
            "query",
            "--filename",
            "svc-%DATE%.log",
            "--date-pattern",
            "YYYY",
            "--from",
            "2029-01-01T00:00:00Z",
            "--until",
            "2029-01-01T12:00:00Z",
            "--level",
            "error",
            "--fields",
            "message",
        ])
        .arg("--dirname")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("crash").and(predicate::str::contains("boot").not()));
}

#[test]
fn test_query_rejects_inverted_window() {
    let dir = TempDir::new().expect("create temp dir");

    claw_logrotate()
        .args([
            "query",
            "--from",
            "2029-01-02T00:00:00Z",
            "--until",
            "2029-01-01T00:00:00Z",
        ])
        .arg("--dirname")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid argument"));
}
