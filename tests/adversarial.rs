//! Adversarial tests for proc_interact.
//!
//! These tests pass hostile argument values and executable paths through the
//! shell wrapper. Every value must reach the target program verbatim and
//! nothing may be interpreted by the shell.

use proc_interact::{ExecutionRequest, PosixEscaper, RequestError, Supervisor};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Script that prints each argument in brackets, one per line.
fn echo_args(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(
        &path,
        "#!/bin/sh\nfor a in \"$@\"; do printf '[%s]\\n' \"$a\"; done\n",
    )
    .unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

async fn run_with_args(path: &Path, args: &[&str]) -> String {
    let request = ExecutionRequest::new(path)
        .args(args.iter().copied())
        .escaper(PosixEscaper);
    let mut supervisor = Supervisor::new(request).unwrap();
    let result = supervisor.run().await.unwrap();
    result.combined_output().to_string()
}

fn bracketed(args: &[&str]) -> String {
    args.iter()
        .map(|a| format!("[{}]", a))
        .collect::<Vec<_>>()
        .join("\n")
}

// =============================================================================
// Argument Injection
// =============================================================================

#[tokio::test]
async fn test_command_separator_not_executed() {
    let dir = TempDir::new().unwrap();
    let path = echo_args(dir.path(), "args");
    let marker = dir.path().join("pwned");

    let payload = format!("x; touch {}", marker.display());
    let output = run_with_args(&path, &[payload.as_str()]).await;

    assert_eq!(output, bracketed(&[payload.as_str()]));
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_substitution_not_expanded() {
    let dir = TempDir::new().unwrap();
    let path = echo_args(dir.path(), "args");

    let args = ["$(echo pwned)", "`echo pwned`", "$HOME", "${PATH}"];
    let output = run_with_args(&path, &args).await;

    assert_eq!(output, bracketed(&args));
}

#[tokio::test]
async fn test_quotes_and_globs_preserved() {
    let dir = TempDir::new().unwrap();
    let path = echo_args(dir.path(), "args");

    let args = ["it's", "\"double\"", "*", "a b  c", "back\\slash", ""];
    let output = run_with_args(&path, &args).await;

    assert_eq!(output, bracketed(&args));
}

#[tokio::test]
async fn test_redirection_and_pipes_inert() {
    let dir = TempDir::new().unwrap();
    let path = echo_args(dir.path(), "args");
    let target = dir.path().join("clobbered");

    let redirect = format!("> {}", target.display());
    let args = [redirect.as_str(), "| cat", "&& true", "&"];
    let output = run_with_args(&path, &args).await;

    assert_eq!(output, bracketed(&args));
    assert!(!target.exists());
}

#[tokio::test]
async fn test_embedded_newline_stays_one_argument() {
    let dir = TempDir::new().unwrap();
    let path = echo_args(dir.path(), "args");

    let output = run_with_args(&path, &["first\nsecond"]).await;
    assert_eq!(output, "[first\nsecond]");
}

#[test]
fn test_nul_byte_rejected_before_spawn() {
    let dir = TempDir::new().unwrap();
    let path = echo_args(dir.path(), "args");

    let request = ExecutionRequest::new(&path)
        .arg("a\0b")
        .escaper(PosixEscaper);
    assert!(matches!(
        Supervisor::new(request),
        Err(RequestError::EscapeFailed { .. })
    ));
}

// =============================================================================
// Executable Path
// =============================================================================

#[tokio::test]
async fn test_hostile_executable_path() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("my tools; rm -rf $HOME");
    fs::create_dir(&nested).unwrap();
    let path = echo_args(&nested, "it's \"quoted\" $(x)");

    let output = run_with_args(&path, &["ok"]).await;
    assert_eq!(output, "[ok]");
}

#[tokio::test]
async fn test_dash_prefixed_executable_name() {
    let dir = TempDir::new().unwrap();
    let path = echo_args(dir.path(), "-c");

    let output = run_with_args(&path, &["ok"]).await;
    assert_eq!(output, "[ok]");
}

// =============================================================================
// Caller-Supplied Escaping
// =============================================================================

#[tokio::test]
async fn test_custom_escaper_is_trusted() {
    let dir = TempDir::new().unwrap();
    let path = echo_args(dir.path(), "args");

    // Joining without quoting lets the shell split words
    let naive = |args: &[String]| args.join(" ");
    let request = ExecutionRequest::new(&path).arg("big world").escaper(naive);
    let mut supervisor = Supervisor::new(request).unwrap();
    let result = supervisor.run().await.unwrap();

    assert_eq!(result.combined_output(), "[big]\n[world]");
}
