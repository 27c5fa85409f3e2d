//! End-to-end workflow tests: init -> commit -> log -> sync -> status -> clean.
//!
//! Each test runs `hsync` as a subprocess against an isolated temp store.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Test Harness
// ---------------------------------------------------------------------------

/// Build a Command targeting the hsync binary, pointed at `dir`.
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

/// Run a command with `--json` and parse stdout.
fn json(dir: &Path, args: &[&str]) -> Value {
    let output = hsync(dir)
        .args(args)
        .arg("--json")
        .output()
        .expect("hsync should not crash");
    assert!(
        output.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("--json should produce valid JSON")
}

fn commit(dir: &Path, author: &str, set: &str) -> Value {
    json(dir, &["commit", "--author", author, "--set", set])
}

fn checkpoint_of(status: &Value, author: &str) -> Value {
    status["authors"]
        .as_array()
        .expect("authors array")
        .iter()
        .find(|entry| entry["author"] == author)
        .map(|entry| entry["checkpoint"].clone())
        .expect("author listed")
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_store() {
    let dir = TempDir::new().expect("tempdir");
    let report = json(dir.path(), &["init", "--author", "app", "--author", "widget"]);

    assert_eq!(report["authors"], serde_json::json!(["app", "widget"]));
    assert_eq!(report["fetch_policy"], "closed-world");
    assert_eq!(report["seeded"], serde_json::json!(["app", "widget"]));
    assert!(dir.path().join(".histsync/histsync.toml").exists());
    assert!(dir.path().join(".histsync/store.sqlite3").exists());

    let status = json(dir.path(), &["status"]);
    let app = checkpoint_of(&status, "app");
    assert!(app.is_i64());
    assert_eq!(checkpoint_of(&status, "widget"), app);
    assert_eq!(status["common_checkpoint"], app);
    assert_eq!(status["transactions"], 0);
}

#[test]
fn reinit_keeps_existing_checkpoints() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());
    let before = json(dir.path(), &["status"]);

    let report = json(
        dir.path(),
        &["init", "--author", "app", "--author", "widget", "--author", "cli", "--force"],
    );
    assert_eq!(report["seeded"], serde_json::json!(["cli"]));

    let after = json(dir.path(), &["status"]);
    assert_eq!(checkpoint_of(&after, "app"), checkpoint_of(&before, "app"));
    assert!(checkpoint_of(&after, "cli").as_i64() >= checkpoint_of(&before, "app").as_i64());
}

#[test]
fn init_twice_requires_force() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());

    hsync(dir.path())
        .args(["init", "--author", "app"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    hsync(dir.path())
        .args(["init", "--author", "app", "--force"])
        .assert()
        .success();
}

#[test]
fn init_rejects_duplicate_authors() {
    let dir = TempDir::new().expect("tempdir");
    hsync(dir.path())
        .args(["init", "--author", "app", "--author", "app", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E1003"));
}

// ---------------------------------------------------------------------------
// commit / log
// ---------------------------------------------------------------------------

#[test]
fn commit_then_log_by_author() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());

    let first = commit(dir.path(), "app", r#"note-1={"title":"draft"}"#);
    let second = commit(dir.path(), "widget", "note-2=42");
    assert!(second["seq"].as_i64() > first["seq"].as_i64());
    assert!(second["timestamp"].as_i64() > first["timestamp"].as_i64());

    let all = json(dir.path(), &["log"]);
    assert_eq!(all.as_array().map(Vec::len), Some(2));

    let widget = json(dir.path(), &["log", "--author", "widget"]);
    let rows = widget.as_array().expect("array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["author"], "widget");
    assert_eq!(rows[0]["changes"][0]["entity"], "note-2");
    assert_eq!(rows[0]["changes"][0]["op"]["value"], 42);

    let after = first["timestamp"].as_i64().expect("timestamp").to_string();
    let later = json(dir.path(), &["log", "--after", &after]);
    assert_eq!(later.as_array().map(Vec::len), Some(1));
}

#[test]
fn log_text_output_lists_changes() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());
    commit(dir.path(), "app", "a=1");
    hsync(dir.path())
        .args(["commit", "--author", "app", "--delete", "a"])
        .assert()
        .success();

    hsync(dir.path())
        .arg("log")
        .assert()
        .success()
        .stdout(predicate::str::contains("+a"))
        .stdout(predicate::str::contains("-a"));
}

// ---------------------------------------------------------------------------
// sync / status
// ---------------------------------------------------------------------------

#[test]
fn sync_merges_peer_transactions_and_advances_checkpoint() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());
    let tx = commit(dir.path(), "app", r#"doc={"v":1}"#);

    let round = json(dir.path(), &["sync", "--author", "widget", "--show-view"]);
    assert_eq!(round["author"], "widget");
    assert_eq!(round["fetched"], 1);
    assert_eq!(round["merged"]["applied"], 1);
    assert_eq!(round["checkpoint"], tx["timestamp"]);
    assert_eq!(round["deleted"], 0);
    assert_eq!(round["view"]["doc"]["v"], 1);

    let status = json(dir.path(), &["status"]);
    let app = checkpoint_of(&status, "app");
    assert_eq!(checkpoint_of(&status, "widget"), tx["timestamp"]);
    assert!(app.as_i64() < tx["timestamp"].as_i64());
    assert_eq!(status["common_checkpoint"], app);
    assert_eq!(status["transactions"], 1);

    // app has not merged anything newer, so the range is fetched again and
    // merging it is a no-op.
    let again = json(dir.path(), &["sync", "--author", "widget", "--show-view"]);
    assert_eq!(again["minimum"], app);
    assert_eq!(again["checkpoint"], tx["timestamp"]);
    assert_eq!(again["view"], round["view"]);
}

#[test]
fn sync_never_fetches_own_transactions() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());
    commit(dir.path(), "app", "mine=1");

    let round = json(dir.path(), &["sync", "--author", "app"]);
    assert_eq!(round["fetched"], 0);
    assert_eq!(round["checkpoint"], Value::Null);
    assert_eq!(round["entities"], 1);
}

#[test]
fn sync_compacts_entries_every_consumer_has_merged() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());
    commit(dir.path(), "app", "a=1");
    commit(dir.path(), "widget", "b=2");
    commit(dir.path(), "app", "c=3");

    // widget merges a and c; app merges b. The common checkpoint becomes
    // b's timestamp, so only a is old enough to go.
    json(dir.path(), &["sync", "--author", "widget"]);
    let round = json(dir.path(), &["sync", "--author", "app"]);
    assert_eq!(round["fetched"], 1);
    assert_eq!(round["deleted"], 1);

    let remaining = json(dir.path(), &["log"]);
    let entities: Vec<_> = remaining
        .as_array()
        .expect("array")
        .iter()
        .map(|tx| tx["changes"][0]["entity"].clone())
        .collect();
    assert_eq!(entities, ["b", "c"]);
}

#[test]
fn status_text_lists_each_author() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());

    hsync(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("app"))
        .stdout(predicate::str::contains("widget"))
        .stdout(predicate::str::contains("behind"))
        .stdout(predicate::str::contains("cutoff:"));
}

// ---------------------------------------------------------------------------
// clean / watch
// ---------------------------------------------------------------------------

#[test]
fn manual_clean_respects_the_cutoff() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());
    commit(dir.path(), "app", "a=1");
    let kept = commit(dir.path(), "app", "b=2");

    let cutoff = kept["timestamp"].as_i64().expect("timestamp").to_string();
    let report = json(dir.path(), &["clean", "--before", &cutoff]);
    assert_eq!(report["deleted"], 1);
    assert_eq!(report["remaining"], 1);
    assert_eq!(report["scope"], "all");

    let log = json(dir.path(), &["log"]);
    assert_eq!(log[0]["seq"], kept["seq"]);
}

#[test]
fn watch_merges_then_stops_after_duration() {
    let dir = TempDir::new().expect("tempdir");
    init_store(dir.path());
    let tx = commit(dir.path(), "app", "x=1");

    let report = json(
        dir.path(),
        &["watch", "--author", "widget", "--interval-ms", "20", "--duration-secs", "1"],
    );
    assert_eq!(report["checkpoint"], tx["timestamp"]);
    assert_eq!(report["entities"], 1);
}
