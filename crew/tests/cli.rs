//! CLI tests for `crew`.
//!
//! Spawns the crew binary against a temp `.crew/` and checks printed records
//! and exit codes.

use std::path::Path;
use std::process::{Command, Output};

use crew::exit_codes;
use crew::io::init::{InitOptions, init_crew};

fn crew(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_crew"))
        .current_dir(root)
        .args(args)
        .output()
        .expect("run crew")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("json stdout")
}

#[test]
fn task_lifecycle_via_cli() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    assert!(crew(root, &["init", "--team", "core"]).status.success());

    let created = crew(root, &["task", "create", "Setup", "--description", "scaffold"]);
    assert!(created.status.success());
    assert_eq!(stdout_json(&created)["id"], 1);
    crew(root, &["task", "create", "Build"]);
    let updated = crew(root, &["task", "update", "2", "--blocked-by", "1"]);
    assert_eq!(stdout_json(&updated)["blockedBy"], serde_json::json!([1]));

    let blocked = crew(root, &["task", "claim", "2", "--owner", "alice"]);
    assert_eq!(blocked.status.code(), Some(exit_codes::CONFLICT));

    let claimed = crew(root, &["task", "claim", "1", "--owner", "alice"]);
    assert_eq!(stdout_json(&claimed)["status"], "in_progress");

    let missing = crew(root, &["task", "get", "42"]);
    assert_eq!(missing.status.code(), Some(exit_codes::NOT_FOUND));
}

#[test]
fn inbox_read_clears_messages() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    init_crew(root, &InitOptions::default()).expect("init");

    let sent = crew(root, &["inbox", "send", "--from", "lead", "--to", "alice", "hi"]);
    assert!(sent.status.success());
    let peeked = crew(root, &["inbox", "peek", "alice"]);
    assert_eq!(stdout_json(&peeked).as_array().map(Vec::len), Some(1));
    let read = crew(root, &["inbox", "read", "alice"]);
    assert_eq!(stdout_json(&read)[0]["type"], "message");
    let again = crew(root, &["inbox", "read", "alice"]);
    assert_eq!(stdout_json(&again), serde_json::json!([]));

    let bad = crew(root, &["inbox", "send", "--from", "lead", "--to", "../etc", "x"]);
    assert_eq!(bad.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn duplicate_response_exits_with_conflict() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    init_crew(root, &InitOptions::default()).expect("init");

    let initiated = crew(root, &["request", "shutdown", "--from", "lead", "--to", "bob"]);
    let id = String::from_utf8(initiated.stdout).expect("utf8");
    let id = id.trim();

    let first = crew(root, &["request", "respond", id, "--reject"]);
    assert_eq!(stdout_json(&first)["status"], "rejected");
    let second = crew(root, &["request", "respond", id, "--approve"]);
    assert_eq!(second.status.code(), Some(exit_codes::CONFLICT));
}

#[test]
fn commands_require_initialized_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = crew(temp.path(), &["task", "list"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("crew init"));
}
