//! `hsync log`: inspect the retained transaction log.

use std::io::Write;
use std::path::Path;

use anyhow::{Context as _, Result};
use clap::Args;
use histsync_core::model::{ChangeOp, Timestamp, Transaction};
use histsync_core::store::AuthorFilter;

use super::Workspace;
use crate::output::{OutputMode, render};

#[derive(Args, Debug)]
pub struct LogArgs {
    /// Only transactions strictly after this instant (µs since epoch or RFC 3339).
    #[arg(long)]
    pub after: Option<Timestamp>,

    /// Only transactions by this author. Repeat for several.
    #[arg(long = "author")]
    pub authors: Vec<String>,

    /// Hide transactions by this author.
    #[arg(long, conflicts_with = "authors")]
    pub except: Option<String>,

    /// Maximum number of rows to show (newest are dropped).
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

impl LogArgs {
    fn filter(&self) -> AuthorFilter {
        if let Some(ref except) = self.except {
            return AuthorFilter::Except(except.clone());
        }
        if self.authors.is_empty() {
            AuthorFilter::Any
        } else {
            AuthorFilter::Among(self.authors.clone())
        }
    }
}

fn summarize(tx: &Transaction) -> String {
    tx.changes
        .iter()
        .map(|change| match change.op {
            ChangeOp::Upsert { .. } => format!("+{}", change.entity),
            ChangeOp::Delete => format!("-{}", change.entity),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Execute `hsync log`.
///
/// # Errors
///
/// Returns an error if the store is not initialized or the log cannot be read.
pub fn run_log(args: &LogArgs, output: OutputMode, root: &Path) -> Result<()> {
    let workspace = Workspace::open(root)?;
    let store = workspace.store()?;

    let mut transactions = store
        .query_after(args.after.unwrap_or(Timestamp::DISTANT_PAST), &args.filter())
        .context("failed to read transaction log")?;
    if let Some(limit) = args.limit {
        transactions.truncate(limit);
    }

    render(output, &transactions, |rows, w| {
        if rows.is_empty() {
            return writeln!(w, "No transactions.");
        }
        for tx in rows {
            writeln!(
                w,
                "{:>6}  {}  {:<12} {}",
                tx.seq,
                tx.timestamp,
                tx.author,
                summarize(tx)
            )?;
        }
        Ok(())
    })
}
