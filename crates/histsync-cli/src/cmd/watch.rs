//! `hsync watch`: keep an author's view in step until told to stop.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use clap::Args;
use histsync_core::checkpoint::CheckpointStore;
use histsync_core::model::Timestamp;
use histsync_core::notify::StoreWatcher;
use histsync_core::tracker::HistoryTracker;
use histsync_core::view::{MaterializedView, ViewContext};
use serde::Serialize;

use super::Workspace;
use crate::output::{OutputMode, pretty_kv, render};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Author whose view and checkpoint the rounds run for.
    #[arg(long)]
    pub author: String,

    /// How often to poll the store for new transactions, in milliseconds.
    #[arg(long, default_value_t = 250)]
    pub interval_ms: u64,

    /// Stop after this many seconds. Runs until killed when omitted.
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
struct WatchReport {
    author: String,
    checkpoint: Option<Timestamp>,
    entities: usize,
}

/// Execute `hsync watch`.
///
/// A round runs at startup, then once per detected log change. Failed rounds
/// are logged and do not end the watch.
///
/// # Errors
///
/// Returns an error if the store is not initialized, the tracker cannot be
/// built, or monitoring cannot start.
pub fn run_watch(args: &WatchArgs, output: OutputMode, root: &Path) -> Result<()> {
    let workspace = Workspace::open(root)?;
    let roster = workspace.roster()?;

    let store = workspace.store()?;
    let view = MaterializedView::load(&store).context("failed to load view")?;
    let context = ViewContext::spawn(format!("hsync-{}", args.author), view)?;
    let watcher = StoreWatcher::spawn(store, Duration::from_millis(args.interval_ms))
        .context("failed to start store watcher")?;
    let watcher = Arc::new(watcher);

    let tracker = HistoryTracker::builder(args.author.clone(), roster)
        .store_path(workspace.paths.store())
        .view(context)
        .notifications(watcher.clone())
        .config(&workspace.config)
        .build()?;

    if let Err(err) = tracker.process_now() {
        tracing::warn!(error = %err, "initial round failed");
    }
    tracker.start_monitoring()?;
    tracing::info!(author = %args.author, interval_ms = args.interval_ms, "watching");

    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        match deadline {
            Some(at) => {
                let left = at.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                thread::sleep(left.min(Duration::from_millis(100)));
            }
            None => thread::park(),
        }
    }
    tracker.stop_monitoring();

    let report = WatchReport {
        author: args.author.clone(),
        checkpoint: tracker
            .checkpoints()
            .get(&args.author)
            .context("failed to read checkpoint")?,
        entities: tracker.view().perform_and_wait(|view| view.len())?,
    };
    render(output, &report, |r, w| {
        writeln!(w, "Stopped watching for {}", r.author)?;
        let checkpoint = r
            .checkpoint
            .map_or_else(|| "never merged".to_string(), |ts| ts.to_string());
        pretty_kv(w, "checkpoint", checkpoint)?;
        pretty_kv(w, "entities", r.entities.to_string())
    })
}
