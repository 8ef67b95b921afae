//! Basic CLI E2E tests.
//!
//! Tests invoke the built `presence` binary against a throwaway data
//! directory and verify outputs.

use std::path::Path;
use std::process::Command;

/// Run a CLI command and return (exit code, stdout, stderr).
fn run_cli(data_dir: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_presence"))
        .args(args)
        .env("PRESENCE_DATA_DIR", data_dir)
        .env("PRESENCE_LOG", "warn")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

fn write_script(dir: &Path, text: &str) -> String {
    let path = dir.join("script.txt");
    std::fs::write(&path, text).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_config_get_default() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(dir.path(), &["config", "get", "tracker.absence_threshold_secs"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "3.0");
}

#[test]
fn test_config_set_persists() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, _) = run_cli(dir.path(), &["config", "set", "storage.on_write_failure", "retain"]);
    assert_eq!(code, 0);
    let (_, stdout, _) = run_cli(dir.path(), &["config", "get", "storage.on_write_failure"]);
    assert_eq!(stdout.trim(), "retain");

    let (code, stdout, _) = run_cli(dir.path(), &["config", "reset"]);
    assert_eq!(code, 0, "{stdout}");
    let (_, stdout, _) = run_cli(dir.path(), &["config", "get", "storage.on_write_failure"]);
    assert_eq!(stdout.trim(), "discard");
}

#[test]
fn test_config_get_unknown_key_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, stderr) = run_cli(dir.path(), &["config", "get", "tracker.no_such_field"]);
    assert_eq!(code, 1);
    assert!(stdout.is_empty(), "{stdout}");
    assert!(stderr.contains("Unknown configuration key: tracker.no_such_field"), "{stderr}");
}

#[test]
fn test_config_set_rejects_invalid_value() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(dir.path(), &["config", "set", "tracker.fast_interval_secs", "-1"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("fast_interval_secs"), "{stderr}");
}

#[test]
fn test_config_list_json() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(dir.path(), &["config", "list"]);
    assert_eq!(code, 0);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["tracker"]["slow_interval_secs"], 10.0);
}

#[test]
fn test_replay_then_stats() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "0 present\n20 absent\n");
    let (code, stdout, stderr) = run_cli(
        dir.path(),
        &["replay", &script, "--at", "2024-05-01 10:00:00", "--json"],
    );
    assert_eq!(code, 0, "{stderr}");
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["sessions_saved"], 1);

    let (code, stdout, _) = run_cli(
        dir.path(),
        &["stats", "range", "--from", "2024-05-01", "--to", "2024-05-01", "--json"],
    );
    assert_eq!(code, 0);
    let summary: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(summary["total_sessions"], 1);

    let (code, stdout, _) = run_cli(
        dir.path(),
        &["sessions", "export", "--from", "2024-05-01", "--to", "2024-05-01"],
    );
    assert_eq!(code, 0);
    let mut lines = stdout.lines();
    assert_eq!(lines.next(), Some("id,start_time,end_time,duration"));
    assert!(lines.next().unwrap().contains("2024-05-01 10:00:01"));
}

#[test]
fn test_stats_rejects_reversed_range() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(
        dir.path(),
        &["stats", "daily", "--from", "2024-05-03", "--to", "2024-05-01"],
    );
    assert_ne!(code, 0);
    assert!(stderr.contains("Invalid date range"), "{stderr}");
}

#[test]
fn test_replay_rejects_bad_script() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "0 present\n1 sometimes\n");
    let (code, _, stderr) = run_cli(dir.path(), &["replay", &script]);
    assert_ne!(code, 0);
    assert!(stderr.contains("line 2"), "{stderr}");
}

#[test]
fn test_configured_database_file_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, _) = run_cli(dir.path(), &["config", "set", "storage.database_file", "office.db"]);
    assert_eq!(code, 0);

    let script = write_script(dir.path(), "0 present\n20 absent\n");
    let (code, _, stderr) = run_cli(dir.path(), &["replay", &script, "--at", "2024-05-01 10:00:00"]);
    assert_eq!(code, 0, "{stderr}");
    assert!(dir.path().join("office.db").exists());
    assert!(!dir.path().join("presence.db").exists());
}
