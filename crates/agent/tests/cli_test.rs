//! CLI Integration Tests
//!
//! These tests verify CLI command structure and help text. They do not
//! need a running coordinator.

use std::process::{Command, Output};

fn run_agent(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_peerstash-agent"))
        .args(args)
        .env_remove("PEERSTASH_COORDINATOR")
        .output()
        .expect("failed to run peerstash-agent")
}

fn command_help_works(args: &[&str]) -> bool {
    let mut full_args = args.to_vec();
    full_args.push("--help");
    run_agent(&full_args).status.success()
}

// ════════════════════════════════════════════════════════════════════════════
// HELP TEXT TESTS
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn test_cli_main_help() {
    let output = run_agent(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "CLI --help should succeed");
    assert!(stdout.contains("PeerStash Agent CLI"));
    assert!(stdout.contains("--coordinator"));
}

#[test]
fn test_cli_version() {
    assert!(run_agent(&["--version"]).status.success());
}

// ════════════════════════════════════════════════════════════════════════════
// COMMAND EXISTENCE TESTS
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn test_all_commands_exist() {
    for cmd in [
        "register", "offers", "reserve", "status", "requests", "approve", "reject", "wait",
        "send", "receive",
    ] {
        assert!(command_help_works(&[cmd]), "{cmd} command should exist");
    }
}

#[test]
fn test_unknown_command_fails() {
    let output = run_agent(&["teleport"]);
    assert!(!output.status.success());
}

#[test]
fn test_missing_arguments_fail() {
    assert!(!run_agent(&["reserve", "A"]).status.success());
    assert!(!run_agent(&["approve"]).status.success());
    // the owner identity is mandatory for decisions
    assert!(!run_agent(&["approve", "r1", "9000"]).status.success());
    assert!(!run_agent(&["reject", "r1"]).status.success());
}

#[test]
fn test_wait_help_mentions_backoff_flags() {
    let output = run_agent(&["wait", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--max-attempts"));
    assert!(stdout.contains("--initial-delay-ms"));
}

#[test]
fn test_unreachable_coordinator_reports_error() {
    // port 9 (discard) is closed on test hosts
    let output = run_agent(&["--coordinator", "http://127.0.0.1:9", "offers"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("network error"), "stderr: {stderr}");
}
