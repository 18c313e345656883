//! Corruption recovery tests for the medimate binary.
//!
//! These tests verify the system can handle:
//! - Corrupted event log lines
//! - Partial writes at the end of the log
//! - Corrupted device records
//! - Missing files

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::io::Write as IoWrite;
use std::path::Path;
use tempfile::TempDir;

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("medimate"))
}

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

const VALID_EVENT: &str = r#"{"id":"00000000-0000-0000-0000-000000000001","deviceId":"ESP1","slot":0,"medicationName":"Aspirin","scheduledTime":"08:00","occurredAt":"2099-01-01T08:00:00Z","status":"confirmed","createdAt":"2099-01-01T08:00:00Z"}"#;

fn register(data_dir: &Path) {
    let cartridges = data_dir.join("cartridges.json");
    fs::write(&cartridges, r#"[{"slot": 0, "medicationName": "Aspirin"}]"#).unwrap();
    cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["register", "--device", "ESP1", "--patient", "Asha", "--cartridges"])
        .arg(&cartridges)
        .assert()
        .success();
}

fn list_events(data_dir: &Path) -> Vec<Value> {
    let output = cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["events", "--device", "ESP1"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice::<Vec<Value>>(&output).expect("events output is a JSON array")
}

#[test]
fn test_corrupted_event_lines_skipped() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();
    register(&data_dir);

    fs::create_dir_all(data_dir.join("events")).unwrap();
    fs::write(
        data_dir.join("events/ESP1.jsonl"),
        format!("{{ invalid json }}\n{}\n{{ more invalid }}\n", VALID_EVENT),
    )
    .unwrap();

    let events = list_events(&data_dir);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["medicationName"], "Aspirin");
}

#[test]
fn test_partial_last_line() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();
    register(&data_dir);

    // Simulate a crash in the middle of an append
    fs::create_dir_all(data_dir.join("events")).unwrap();
    let mut file = fs::File::create(data_dir.join("events/ESP1.jsonl")).unwrap();
    writeln!(file, "{}", VALID_EVENT).unwrap();
    write!(file, r#"{{"id":"00000000-0000-0000-0000-0000000"#).unwrap();
    drop(file);

    assert_eq!(list_events(&data_dir).len(), 1);

    // New appends still land on their own line and are readable
    cli()
        .arg("--data-dir")
        .arg(&data_dir)
        .args(["confirm", "--device", "ESP1", "--slot", "0"])
        .assert()
        .success();
    assert_eq!(list_events(&data_dir).len(), 2);
}

#[test]
fn test_report_over_corrupted_log() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();
    register(&data_dir);

    fs::create_dir_all(data_dir.join("events")).unwrap();
    fs::write(data_dir.join("events/ESP1.jsonl"), "not json at all\n").unwrap();

    cli()
        .arg("--data-dir")
        .arg(&data_dir)
        .args(["report", "--device", "ESP1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0.0%"));
}

#[test]
fn test_corrupted_device_record_is_an_error() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();
    register(&data_dir);

    fs::write(data_dir.join("devices/ESP1.json"), "{ invalid json }}}}").unwrap();

    // Not mistaken for an unknown device
    cli()
        .arg("--data-dir")
        .arg(&data_dir)
        .args(["show", "--device", "ESP1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("JSON error"));
}

#[test]
fn test_missing_event_log_is_empty() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();
    register(&data_dir);

    assert!(list_events(&data_dir).is_empty());
}
