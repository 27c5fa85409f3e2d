use std::io::Write;
use std::path::Path;

use anyhow::{Context as _, Result};
use clap::Args;
use histsync_core::checkpoint::{CheckpointStore, FileCheckpointStore};
use histsync_core::config::{StorePaths, SyncConfig};
use histsync_core::fetch::FetchPolicy;
use histsync_core::model::Timestamp;
use histsync_core::store::Store;
use serde::Serialize;

use crate::output::{OutputMode, pretty_kv, render};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Author allowed to write to the store. Repeat for each author.
    #[arg(long = "author", required = true)]
    pub authors: Vec<String>,

    /// Accept transactions from authors outside the roster.
    #[arg(long)]
    pub open_world: bool,

    /// Overwrite an existing `histsync.toml`. The log is kept.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct InitReport {
    root: String,
    config: String,
    store: String,
    authors: Vec<String>,
    fetch_policy: &'static str,
    /// Authors whose checkpoint was started at the init instant.
    seeded: Vec<String>,
}

/// Execute `hsync init`. Creates:
///
/// ```text
/// .histsync/
///   histsync.toml    (roster and policies)
///   store.sqlite3    (objects + transaction log)
/// ```
///
/// Every roster author without a checkpoint gets one at the current instant,
/// so compaction never runs ahead of an author that has not synced yet.
/// Their views start from the store's objects.
///
/// # Errors
///
/// Returns an error if the store is already initialized and `--force` is not
/// set, if the roster is invalid, or if any filesystem operation fails.
pub fn run_init(args: &InitArgs, output: OutputMode, root: &Path) -> Result<()> {
    let paths = StorePaths::new(root);
    if paths.is_initialized() && !args.force {
        anyhow::bail!(
            "{} already exists. Use `hsync init --force` to rewrite the config.",
            paths.config().display()
        );
    }

    let mut config = SyncConfig::with_authors(args.authors.iter().cloned());
    if args.open_world {
        config.fetch_policy = FetchPolicy::OpenWorld;
    }
    let roster = config.roster()?;

    std::fs::create_dir_all(paths.dir())
        .with_context(|| format!("Failed to create {}", paths.dir().display()))?;
    config.save(&paths.config())?;
    Store::open(&paths.store()).context("Failed to create store")?;

    let checkpoints = FileCheckpointStore::new(&paths.dir(), config.checkpoint_namespace.clone())
        .with_timeout(config.lock_timeout());
    let now = Timestamp::now();
    let mut seeded = Vec::new();
    for author in roster.names() {
        if checkpoints.get(author)?.is_none() {
            checkpoints.set(author, Some(now))?;
            seeded.push(author.clone());
        }
    }
    tracing::info!(
        authors = roster.len(),
        seeded = seeded.len(),
        root = %root.display(),
        "initialized store"
    );

    let report = InitReport {
        root: root.display().to_string(),
        config: paths.config().display().to_string(),
        store: paths.store().display().to_string(),
        authors: roster.names().to_vec(),
        fetch_policy: config.fetch_policy.as_str(),
        seeded,
    };
    render(output, &report, |r, w| {
        writeln!(w, "Initialized histsync store in {}", r.root)?;
        pretty_kv(w, "authors", r.authors.join(", "))?;
        pretty_kv(w, "fetch", r.fetch_policy)?;
        writeln!(w)?;
        let first = r.authors.first().map_or("<author>", String::as_str);
        writeln!(w, "Next: hsync commit --author {first} --set id=<json>")
    })
}
