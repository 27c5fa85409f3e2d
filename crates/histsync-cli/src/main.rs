#![forbid(unsafe_code)]

mod cmd;
mod output;

use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use output::{CliError, OutputMode, render_error};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "hsync: inspect and drive a histsync store",
    long_about = None
)]
struct Cli {
    /// Log at debug level. `HSYNC_LOG` still takes precedence.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding `.histsync/`.
    #[arg(long, global = true, default_value = ".")]
    store: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    const fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Text
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Initialize a store",
        long_about = "Create .histsync/ with the author roster and an empty transaction log.",
        after_help = "EXAMPLES:\n    # Two authors sharing one store\n    hsync init --author app --author widget"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        about = "Commit one transaction",
        long_about = "Apply upserts and deletes to the shared objects and append one transaction to the log.",
        after_help = "EXAMPLES:\n    hsync commit --author app --set note-1='{\"title\":\"draft\"}' --delete note-0"
    )]
    Commit(cmd::commit::CommitArgs),

    #[command(
        about = "List logged transactions",
        after_help = "EXAMPLES:\n    # Everything written by widget\n    hsync log --author widget\n\n    # Everything after an instant\n    hsync log --after 2024-01-01T00:00:00Z --json"
    )]
    Log(cmd::log::LogArgs),

    #[command(
        about = "Run one sync round for an author",
        long_about = "Fetch peers' transactions after the common checkpoint, merge them into the author's view, advance its checkpoint and compact the log."
    )]
    Sync(cmd::sync::SyncArgs),

    #[command(about = "Sync an author whenever the log changes")]
    Watch(cmd::watch::WatchArgs),

    #[command(about = "Show checkpoints, the common checkpoint and the retention cutoff")]
    Status(cmd::status::StatusArgs),

    #[command(
        about = "Compact the log manually",
        after_help = "EXAMPLES:\n    hsync clean --before 2024-01-01T00:00:00Z"
    )]
    Clean(cmd::clean::CleanArgs),
}

fn default_directives(verbose: bool) -> &'static str {
    if verbose || env::var("DEBUG").is_ok() {
        "histsync=debug,hsync=debug,info"
    } else {
        "histsync=info,hsync=info,warn"
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("HSYNC_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    let format = env::var("HSYNC_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let output = cli.output_mode();
    let root = cli.store.as_path();
    match cli.command {
        Commands::Init(ref args) => cmd::init::run_init(args, output, root),
        Commands::Commit(ref args) => cmd::commit::run_commit(args, output, root),
        Commands::Log(ref args) => cmd::log::run_log(args, output, root),
        Commands::Sync(ref args) => cmd::sync::run_sync(args, output, root),
        Commands::Watch(ref args) => cmd::watch::run_watch(args, output, root),
        Commands::Status(ref args) => cmd::status::run_status(args, output, root),
        Commands::Clean(ref args) => cmd::clean::run_clean(args, output, root),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            if render_error(cli.output_mode(), &CliError::from(&err)).is_err() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn json_flag_sets_output_mode() {
        let cli = Cli::parse_from(["hsync", "--json", "status"]);
        assert_eq!(cli.output_mode(), OutputMode::Json);
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["hsync", "status", "--json", "--store", "/tmp/s"]);
        assert!(cli.json);
        assert_eq!(cli.store, Path::new("/tmp/s"));
    }

    #[test]
    fn store_defaults_to_current_directory() {
        let cli = Cli::parse_from(["hsync", "status"]);
        assert_eq!(cli.store, Path::new("."));
        assert_eq!(cli.output_mode(), OutputMode::Text);
    }

    #[test]
    fn verbose_switches_default_filter_to_debug() {
        let cli = Cli::parse_from(["hsync", "status", "-v"]);
        assert!(cli.verbose);
        assert!(default_directives(true).starts_with("histsync=debug"));
        assert!(!Cli::parse_from(["hsync", "status"]).verbose);
    }

    #[test]
    fn init_requires_an_author() {
        assert!(Cli::try_parse_from(["hsync", "init"]).is_err());
        let cli = Cli::parse_from(["hsync", "init", "--author", "a", "--author", "b"]);
        match cli.command {
            Commands::Init(args) => assert_eq!(args.authors, ["a", "b"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn timestamps_accept_micros_and_rfc3339() {
        let cli = Cli::parse_from(["hsync", "clean", "--before", "1700000000000000"]);
        let Commands::Clean(args) = cli.command else {
            panic!("expected clean");
        };
        assert_eq!(args.before.as_micros(), 1_700_000_000_000_000);

        let cli = Cli::parse_from(["hsync", "log", "--after", "2023-11-14T22:13:20Z"]);
        let Commands::Log(args) = cli.command else {
            panic!("expected log");
        };
        assert_eq!(args.after.map(|ts| ts.as_micros()), Some(1_700_000_000_000_000));
    }

    #[test]
    fn commit_collects_repeated_changes() {
        let cli = Cli::parse_from([
            "hsync", "commit", "--author", "a", "--set", "x=1", "--set", "y=2", "--delete", "z",
        ]);
        let Commands::Commit(args) = cli.command else {
            panic!("expected commit");
        };
        assert_eq!(args.sets, ["x=1", "y=2"]);
        assert_eq!(args.deletes, ["z"]);
    }
}
