use std::io::Write;
use std::path::Path;

use anyhow::{Context as _, Result};
use clap::Args;
use histsync_core::error::SyncError;
use histsync_core::fetch::FetchPolicy;
use histsync_core::model::{Change, Transaction};
use serde_json::Value;

use super::Workspace;
use crate::output::{OutputMode, pretty_kv, render};

#[derive(Args, Debug)]
pub struct CommitArgs {
    /// Author committing the transaction.
    #[arg(long)]
    pub author: String,

    /// Upsert an entity: `id=<json>`. Values that are not valid JSON are
    /// stored as strings.
    #[arg(long = "set", value_name = "ID=VALUE")]
    pub sets: Vec<String>,

    /// Delete an entity by id.
    #[arg(long = "delete", value_name = "ID")]
    pub deletes: Vec<String>,
}

/// Parse one `id=<json>` assignment.
fn parse_assignment(raw: &str) -> Result<Change> {
    let (id, value) = raw
        .split_once('=')
        .with_context(|| format!("invalid --set '{raw}': expected ID=VALUE"))?;
    if id.is_empty() {
        anyhow::bail!("invalid --set '{raw}': entity id is empty");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok(Change::upsert(id, value))
}

/// Execute `hsync commit`: write one transaction to the shared log.
///
/// # Errors
///
/// Returns an error if the store is not initialized, the author is not in a
/// closed-world roster, no change was given, or the commit fails.
pub fn run_commit(args: &CommitArgs, output: OutputMode, root: &Path) -> Result<()> {
    let workspace = Workspace::open(root)?;
    let roster = workspace.roster()?;
    if workspace.config.fetch_policy == FetchPolicy::ClosedWorld && !roster.contains(&args.author)
    {
        return Err(SyncError::UnknownAuthor(args.author.clone()).into());
    }

    let mut changes = args
        .sets
        .iter()
        .map(|raw| parse_assignment(raw))
        .collect::<Result<Vec<_>>>()?;
    changes.extend(args.deletes.iter().map(Change::delete));

    let mut store = workspace.store()?;
    let tx = store
        .commit_now(&args.author, &changes)
        .context("commit failed")?;
    tracing::debug!(seq = tx.seq, author = %tx.author, changes = tx.changes.len(), "committed");

    render(output, &tx, |tx: &Transaction, w| {
        writeln!(w, "Committed transaction {}", tx.seq)?;
        pretty_kv(w, "author", &tx.author)?;
        pretty_kv(w, "timestamp", tx.timestamp.to_string())?;
        pretty_kv(w, "changes", tx.changes.len().to_string())
    })
}
