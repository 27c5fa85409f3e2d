//! Log compaction.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::model::{Roster, Timestamp};
use crate::store::Store;

/// Deletes log entries strictly older than a cutoff.
pub trait Cleaner: Send + Sync {
    /// Delete entries with `timestamp < cutoff`, restricted to authors in
    /// `scope` when given. Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LogUnavailable`] if the log cannot be written.
    fn clean(
        &self,
        log: &Store,
        cutoff: Timestamp,
        scope: Option<&[String]>,
    ) -> Result<usize, SyncError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCleaner;

impl Cleaner for DefaultCleaner {
    fn clean(
        &self,
        log: &Store,
        cutoff: Timestamp,
        scope: Option<&[String]>,
    ) -> Result<usize, SyncError> {
        let deleted = log
            .delete_before(cutoff, scope)
            .map_err(SyncError::LogUnavailable)?;
        tracing::debug!(
            cutoff = %cutoff,
            scoped = scope.is_some(),
            deleted,
            "compacted transaction log"
        );
        Ok(deleted)
    }
}

/// Which authors' entries compaction may delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupScope {
    /// Every entry older than the cutoff.
    #[default]
    All,
    /// Only entries written by roster members; strangers' entries are kept.
    KnownAuthors,
}

impl CleanupScope {
    #[must_use]
    pub fn resolve(self, roster: &Roster) -> Option<Vec<String>> {
        match self {
            Self::All => None,
            Self::KnownAuthors => Some(roster.names().to_vec()),
        }
    }
}
