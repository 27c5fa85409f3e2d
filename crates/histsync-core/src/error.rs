use std::fmt;
use std::io;

use crate::checkpoint::CheckpointError;
use crate::store::StoreError;

/// Machine-readable error codes for operator- and agent-friendly decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    InvalidRoster,
    UnknownAuthor,
    EmptyTransaction,
    LogUnavailable,
    MergeFailed,
    CheckpointStoreFailure,
    CorruptLogEntry,
    LockContention,
    ViewContextClosed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::InvalidRoster => "E1003",
            Self::UnknownAuthor => "E2001",
            Self::EmptyTransaction => "E2002",
            Self::LogUnavailable => "E3001",
            Self::MergeFailed => "E3002",
            Self::CheckpointStoreFailure => "E3003",
            Self::CorruptLogEntry => "E3004",
            Self::LockContention => "E5002",
            Self::ViewContextClosed => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Store not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidRoster => "Invalid author roster",
            Self::UnknownAuthor => "Author is not in the roster",
            Self::EmptyTransaction => "Empty transaction",
            Self::LogUnavailable => "Transaction log unavailable",
            Self::MergeFailed => "Merge into view failed",
            Self::CheckpointStoreFailure => "Checkpoint store failure",
            Self::CorruptLogEntry => "Corrupt transaction log entry",
            Self::LockContention => "Lock contention",
            Self::ViewContextClosed => "View context closed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `hsync init` to create the store."),
            Self::ConfigParseError => Some("Fix syntax in .histsync/histsync.toml and retry."),
            Self::InvalidRoster => Some("List each author exactly once with a non-empty name."),
            Self::UnknownAuthor => Some("Add the author to `authors` in histsync.toml."),
            Self::EmptyTransaction => Some("Pass at least one --set or --delete."),
            Self::LogUnavailable => Some("Transient; the next change notification retries."),
            Self::MergeFailed => Some("Inspect the failing transaction; later rounds keep advancing."),
            Self::CheckpointStoreFailure => {
                Some("Check permissions on the checkpoint file and retry.")
            }
            Self::CorruptLogEntry => Some("Compact past the corrupt entry with `hsync clean`."),
            Self::LockContention => Some("Retry after the other process releases its lock."),
            Self::ViewContextClosed => Some("Recreate the view context before syncing again."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

/// Failure categories of the synchronization engine.
///
/// Inside a processing round every variant is caught and logged at the
/// tracker boundary; none of them stop the listening task.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Fetch or cleanup could not reach the log. Retryable.
    #[error("transaction log unavailable: {0}")]
    LogUnavailable(#[source] StoreError),

    /// Applying one or more changesets to the materialized view failed.
    #[error("merge failed for {failed} of {total} transactions (first: {first})")]
    MergeFailed {
        failed: usize,
        total: usize,
        first: String,
    },

    /// The durable checkpoint store could not be read or written.
    #[error("checkpoint store failure: {0}")]
    CheckpointStoreFailure(#[from] CheckpointError),

    #[error("author '{0}' is not in the roster")]
    UnknownAuthor(String),

    #[error("tracker is missing its {0}")]
    MissingComponent(&'static str),

    #[error("failed to spawn monitor thread: {0}")]
    Spawn(#[source] io::Error),
}

impl SyncError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::LogUnavailable(_) => ErrorCode::LogUnavailable,
            Self::MergeFailed { .. } => ErrorCode::MergeFailed,
            Self::CheckpointStoreFailure(_) => ErrorCode::CheckpointStoreFailure,
            Self::UnknownAuthor(_) => ErrorCode::UnknownAuthor,
            Self::MissingComponent(_) | Self::Spawn(_) => ErrorCode::InternalUnexpected,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// Whether the next notification can be expected to succeed where this
    /// one failed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LogUnavailable(_) | Self::CheckpointStoreFailure(_)
        )
    }
}
