//! `hsync status`: checkpoints, the common checkpoint and retention cutoff.

use std::io::Write;
use std::path::Path;

use anyhow::{Context as _, Result};
use chrono::TimeDelta;
use clap::Args;
use histsync_core::checkpoint::CheckpointStore;
use histsync_core::model::Timestamp;
use histsync_core::tracker::retention_cutoff;
use serde::Serialize;

use super::Workspace;
use crate::output::{OutputMode, pretty_kv, render};

#[derive(Args, Debug)]
pub struct StatusArgs {}

#[derive(Debug, Serialize)]
struct AuthorStatus {
    author: String,
    checkpoint: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    store: String,
    fetch_policy: &'static str,
    now: Timestamp,
    authors: Vec<AuthorStatus>,
    /// Checkpoints recorded for names outside the roster.
    strangers: Vec<AuthorStatus>,
    common_checkpoint: Option<Timestamp>,
    retention_cutoff: Timestamp,
    transactions: usize,
    oldest: Option<Timestamp>,
    newest: Option<Timestamp>,
}

/// `3h12m` style lag between two instants.
fn format_lag(now: Timestamp, then: Timestamp) -> String {
    let lag = TimeDelta::microseconds(now.as_micros().saturating_sub(then.as_micros()));
    if lag < TimeDelta::zero() {
        return "ahead".to_string();
    }
    let (days, hours, minutes) = (lag.num_days(), lag.num_hours() % 24, lag.num_minutes() % 60);
    if days > 0 {
        format!("{days}d{hours}h")
    } else if hours > 0 {
        format!("{hours}h{minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        format!("{}s", lag.num_seconds())
    }
}

/// Execute `hsync status`.
///
/// # Errors
///
/// Returns an error if the store is not initialized or the checkpoint file
/// or log cannot be read.
pub fn run_status(_args: &StatusArgs, output: OutputMode, root: &Path) -> Result<()> {
    let workspace = Workspace::open(root)?;
    let roster = workspace.roster()?;
    let checkpoints = workspace.checkpoints();
    let store = workspace.store()?;

    let mut recorded = checkpoints.entries().context("failed to read checkpoints")?;
    let authors = roster
        .names()
        .iter()
        .map(|author| AuthorStatus {
            author: author.clone(),
            checkpoint: recorded.remove(author),
        })
        .collect();
    let strangers = recorded
        .into_iter()
        .map(|(author, ts)| AuthorStatus {
            author,
            checkpoint: Some(ts),
        })
        .collect();

    let common = checkpoints
        .minimum(roster.names())
        .context("failed to read checkpoints")?;
    let now = Timestamp::now();
    let bounds = store.timestamp_bounds().context("failed to read log")?;

    let report = StatusReport {
        store: workspace.paths.store().display().to_string(),
        fetch_policy: workspace.config.fetch_policy.as_str(),
        now,
        authors,
        strangers,
        common_checkpoint: common,
        retention_cutoff: retention_cutoff(now, workspace.config.max_transaction_age(), common),
        transactions: store.transaction_count().context("failed to read log")?,
        oldest: bounds.map(|(oldest, _)| oldest),
        newest: bounds.map(|(_, newest)| newest),
    };

    render(output, &report, |r, w| {
        pretty_kv(w, "store", &r.store)?;
        pretty_kv(w, "fetch", r.fetch_policy)?;
        pretty_kv(w, "log", format!("{} transactions", r.transactions))?;
        if let (Some(oldest), Some(newest)) = (r.oldest, r.newest) {
            pretty_kv(w, "span", format!("{oldest} .. {newest}"))?;
        }
        writeln!(w)?;
        writeln!(w, "Checkpoints")?;
        for entry in r.authors.iter().chain(&r.strangers) {
            match entry.checkpoint {
                Some(ts) => writeln!(
                    w,
                    "  {:<16} {ts}  ({} behind)",
                    entry.author,
                    format_lag(r.now, ts)
                )?,
                None => writeln!(w, "  {:<16} never merged", entry.author)?,
            }
        }
        writeln!(w)?;
        let common = r
            .common_checkpoint
            .map_or_else(|| "none".to_string(), |ts| ts.to_string());
        pretty_kv(w, "common", common)?;
        pretty_kv(w, "cutoff", r.retention_cutoff.to_string())
    })
}
