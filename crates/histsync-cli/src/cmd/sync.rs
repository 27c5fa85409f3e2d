//! `hsync sync`: run one processing round for an author.

use std::io::Write;
use std::path::Path;

use anyhow::{Context as _, Result};
use clap::Args;
use histsync_core::tracker::{HistoryTracker, RoundReport};
use histsync_core::view::{MaterializedView, ViewContext};
use serde::Serialize;
use serde_json::Value;

use super::Workspace;
use crate::output::{OutputMode, pretty_kv, render};

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Author whose view and checkpoint the round runs for.
    #[arg(long)]
    pub author: String,

    /// Include the author's resulting view in the output.
    #[arg(long)]
    pub show_view: bool,
}

#[derive(Debug, Serialize)]
struct SyncOutput {
    author: String,
    #[serde(flatten)]
    round: RoundReport,
    entities: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    view: Option<Value>,
}

/// Execute `hsync sync`.
///
/// The author's view is bootstrapped from the store, then one round fetches
/// peer transactions after the common checkpoint, merges them, advances the
/// author's checkpoint and compacts the log.
///
/// # Errors
///
/// Returns an error if the store is not initialized, the tracker cannot be
/// built for `--author`, or the round aborts.
pub fn run_sync(args: &SyncArgs, output: OutputMode, root: &Path) -> Result<()> {
    let workspace = Workspace::open(root)?;
    let roster = workspace.roster()?;

    let view = {
        let store = workspace.store()?;
        MaterializedView::load(&store).context("failed to load view")?
    };
    let context = ViewContext::spawn(format!("hsync-{}", args.author), view)?;

    let tracker = HistoryTracker::builder(args.author.clone(), roster)
        .store_path(workspace.paths.store())
        .view(context)
        .config(&workspace.config)
        .build()?;

    let round = tracker.process_now().context("sync round failed")?;
    let (entities, view) = tracker.view().perform_and_wait({
        let show = args.show_view;
        move |view| (view.len(), show.then(|| view.to_json()))
    })?;

    let result = SyncOutput {
        author: args.author.clone(),
        round,
        entities,
        view,
    };
    render(output, &result, |r, w| {
        writeln!(w, "Synced {}", r.author)?;
        pretty_kv(w, "after", r.round.minimum.to_string())?;
        pretty_kv(w, "fetched", r.round.fetched.to_string())?;
        if let Some(merged) = r.round.merged {
            pretty_kv(
                w,
                "merged",
                format!("{} applied, {} stale", merged.applied, merged.stale),
            )?;
        }
        if let Some(ref err) = r.round.merge_error {
            pretty_kv(w, "merge error", err)?;
        }
        let checkpoint = r
            .round
            .checkpoint
            .map_or_else(|| "unchanged".to_string(), |ts| ts.to_string());
        pretty_kv(w, "checkpoint", checkpoint)?;
        pretty_kv(w, "cutoff", r.round.cutoff.to_string())?;
        let deleted = r
            .round
            .deleted
            .map_or_else(|| "failed".to_string(), |n| n.to_string());
        pretty_kv(w, "compacted", deleted)?;
        pretty_kv(w, "entities", r.entities.to_string())?;
        if let Some(ref view) = r.view {
            writeln!(w)?;
            writeln!(w, "{}", serde_json::to_string_pretty(view).map_err(std::io::Error::other)?)?;
        }
        Ok(())
    })
}
