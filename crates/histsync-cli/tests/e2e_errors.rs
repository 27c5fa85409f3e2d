//! Error contract: failures exit non-zero and carry a stable `E####` code.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

fn hsync(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("hsync"));
    cmd.arg("--store").arg(dir);
    cmd.env("HSYNC_LOG", "error");
    cmd
}

fn init_store(dir: &Path) {
    hsync(dir)
        .args(["init", "--author", "app", "--author", "widget"])
        .assert()
        .success();
}

/// Run a failing command with `--json` and return the `error` object.
fn json_error(dir: &Path, args: &[&str]) -> Value {
    let output = hsync(dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("hsync should not crash");
    assert!(!output.status.success(), "{args:?} unexpectedly succeeded");
    assert!(output.stdout.is_empty(), "errors must not write to stdout");
    let parsed: Value =
        serde_json::from_slice(&output.stderr).expect("stderr should be a JSON error object");
    parsed["error"].clone()
}

#[test]
fn commands_on_an_uninitialized_store_fail() {
    let dir = TempDir::new().expect("tempdir");
    for args in [
        vec!["status"],
        vec!["log"],
        vec!["sync", "--author", "app"],
        vec!["commit", "--author", "app", "--set", "x=1"],
        vec!["clean", "--before", "0"],
    ] {
        let error = json_error(dir.path(), &args);
        assert_eq!(error["error_code"], "E1001", "{args:?}");
        assert!(
            error["suggestion"]
                .as_str()
                .is_some_and(|s| s.contains("hsync init")),
            "{args:?}"
        );
    }
    assert!(!dir.path().join(".histsync").exists());
}

#[test]
fn unknown_author_cannot_commit_or_sync() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());

    let error = json_error(dir.path(), &["commit", "--author", "mallory", "--set", "x=1"]);
    assert_eq!(error["error_code"], "E2001");
    assert!(error["message"].as_str().is_some_and(|m| m.contains("mallory")));

    let error = json_error(dir.path(), &["sync", "--author", "mallory"]);
    assert_eq!(error["error_code"], "E2001");
}

#[test]
fn open_world_store_accepts_outside_authors() {
    let dir = TempDir::new().expect("tempdir");
    hsync(dir.path())
        .args(["init", "--author", "app", "--open-world"])
        .assert()
        .success();

    hsync(dir.path())
        .args(["commit", "--author", "plugin", "--set", "x=1"])
        .assert()
        .success();
    hsync(dir.path())
        .args(["sync", "--author", "app", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"fetched\": 1"));

    // Outside authors may write, but only roster members consume.
    let error = json_error(dir.path(), &["sync", "--author", "plugin"]);
    assert_eq!(error["error_code"], "E2001");
    let error = json_error(dir.path(), &["watch", "--author", "plugin", "--duration-secs", "1"]);
    assert_eq!(error["error_code"], "E2001");
}

#[test]
fn empty_commit_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());

    let error = json_error(dir.path(), &["commit", "--author", "app"]);
    assert_eq!(error["error_code"], "E2002");
}

#[test]
fn malformed_config_reports_parse_error() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());
    std::fs::write(
        dir.path().join(".histsync/histsync.toml"),
        "authors = [\"app\"\nfetch_policy = 3\n",
    )
    .expect("write config");

    let error = json_error(dir.path(), &["status"]);
    assert_eq!(error["error_code"], "E1002");
}

#[test]
fn corrupt_checkpoint_file_is_a_checkpoint_failure() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());
    std::fs::write(dir.path().join(".histsync/checkpoints.json"), "{not json").expect("write");

    let error = json_error(dir.path(), &["status"]);
    assert_eq!(error["error_code"], "E3003");
}

#[test]
fn text_errors_show_code_and_suggestion() {
    let dir = TempDir::new().expect("tempdir");
    hsync(dir.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error[E1001]"))
        .stderr(predicate::str::contains("suggestion:"));
}

#[test]
fn invalid_timestamp_is_a_usage_error() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());
    hsync(dir.path())
        .args(["clean", "--before", "yesterday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid timestamp"));
}
