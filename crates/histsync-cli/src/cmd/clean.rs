use std::io::Write;
use std::path::Path;

use anyhow::{Context as _, Result};
use clap::Args;
use histsync_core::clean::{Cleaner, CleanupScope, DefaultCleaner};
use histsync_core::model::Timestamp;
use serde::Serialize;

use super::Workspace;
use crate::output::{OutputMode, render};

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Delete entries strictly before this instant (µs since epoch or RFC 3339).
    #[arg(long)]
    pub before: Timestamp,

    /// Keep entries written by authors outside the roster, whatever the
    /// configured cleanup scope.
    #[arg(long)]
    pub known_authors: bool,
}

#[derive(Debug, Serialize)]
struct CleanReport {
    cutoff: Timestamp,
    scope: CleanupScope,
    deleted: usize,
    remaining: usize,
}

/// Execute `hsync clean`: manual compaction, ignoring checkpoints.
///
/// # Errors
///
/// Returns an error if the store is not initialized or the log cannot be
/// written.
pub fn run_clean(args: &CleanArgs, output: OutputMode, root: &Path) -> Result<()> {
    let workspace = Workspace::open(root)?;
    let roster = workspace.roster()?;
    let store = workspace.store()?;

    let scope = if args.known_authors {
        CleanupScope::KnownAuthors
    } else {
        workspace.config.cleanup_scope
    };
    let deleted = DefaultCleaner
        .clean(&store, args.before, scope.resolve(&roster).as_deref())
        .context("compaction failed")?;
    let remaining = store.transaction_count().context("failed to read log")?;
    tracing::info!(cutoff = %args.before, deleted, remaining, "manual compaction");

    let report = CleanReport {
        cutoff: args.before,
        scope,
        deleted,
        remaining,
    };
    render(output, &report, |r, w| {
        writeln!(
            w,
            "Deleted {} transaction(s) before {}; {} remaining.",
            r.deleted, r.cutoff, r.remaining
        )
    })
}
