//! One processing round: fetch → merge → checkpoint → compact.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, warn};

use super::TrackerShared;
use crate::error::SyncError;
use crate::merge::{MergeFailurePolicy, MergeReport};
use crate::model::Timestamp;
use crate::store::Store;

/// What a round did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    /// Lower bound the fetch started after.
    pub minimum: Timestamp,
    /// Transactions fetched from peers.
    pub fetched: usize,
    /// Merge totals; `None` when nothing was fetched or the merge failed.
    pub merged: Option<MergeReport>,
    /// Why the merge failed, if it did.
    pub merge_error: Option<String>,
    /// The current author's checkpoint after this round, if it moved.
    pub checkpoint: Option<Timestamp>,
    /// Compaction cutoff: entries strictly before it were eligible.
    pub cutoff: Timestamp,
    /// Entries compacted; `None` when cleanup failed.
    pub deleted: Option<usize>,
}

/// `max(now - max_age, common)`: bounded by age even when a consumer lags.
#[must_use]
pub fn retention_cutoff(now: Timestamp, max_age: Duration, common: Option<Timestamp>) -> Timestamp {
    let age_floor = now.saturating_sub(max_age);
    common.map_or(age_floor, |common| common.max(age_floor))
}

impl TrackerShared {
    pub(super) fn run_round(&self) -> Result<RoundReport, SyncError> {
        let _entered = self.span.enter();
        let mut worker = self.worker.lock();

        if worker.is_none() {
            let opened = Store::open(&self.store_path).map_err(|err| {
                error!(error = %err, path = %self.store_path.display(), "cannot open worker store");
                SyncError::LogUnavailable(err)
            })?;
            *worker = Some(opened);
        }
        let Some(log) = worker.as_ref() else {
            return Err(SyncError::MissingComponent("worker store"));
        };

        let authors = self.roster.names();

        let minimum = self
            .checkpoints
            .minimum(authors)
            .map_err(|err| {
                error!(error = %err, "cannot read checkpoints; round aborted");
                SyncError::from(err)
            })?
            .unwrap_or(Timestamp::DISTANT_PAST);

        let transactions = self.fetcher.fetch(log, minimum).map_err(|err| {
            error!(error = %err, after = %minimum, "fetch failed; round aborted");
            err
        })?;

        let mut merged = None;
        let mut merge_error = None;
        if !transactions.is_empty() {
            match self.merger.merge(&self.view, &transactions) {
                Ok(report) => merged = Some(report),
                Err(err) => {
                    error!(error = %err, fetched = transactions.len(), "merge failed");
                    merge_error = Some(err.to_string());
                }
            }
        }

        let mut checkpoint = None;
        if let Some(last) = transactions.last() {
            if merge_error.is_some() && self.settings.merge_failure == MergeFailurePolicy::Hold {
                warn!(held_at = %minimum, "merge failed; checkpoint held");
            } else {
                let advanced = self
                    .checkpoints
                    .advance(&self.current_author, last.timestamp)
                    .map_err(|err| {
                        error!(error = %err, "cannot write checkpoint; round aborted");
                        SyncError::from(err)
                    })?;
                checkpoint = Some(advanced);
            }
        }

        let common = self.checkpoints.minimum(authors).map_err(|err| {
            error!(error = %err, "cannot read checkpoints; cleanup skipped");
            SyncError::from(err)
        })?;
        let cutoff = retention_cutoff(self.clock.now(), self.settings.max_transaction_age, common);

        let scope = self.settings.cleanup_scope.resolve(&self.roster);
        let deleted = match self.cleaner.clean(log, cutoff, scope.as_deref()) {
            Ok(count) => Some(count),
            Err(err) => {
                warn!(error = %err, cutoff = %cutoff, "cleanup failed");
                None
            }
        };

        // A roster-scoped cleanup leaves outside authors' older entries
        // fetchable, so their tombstones must stay.
        if deleted.is_some() && scope.is_none() {
            match self.view.perform_and_wait(move |v| v.prune_tombstones(cutoff)) {
                Ok(pruned) if pruned > 0 => debug!(pruned, cutoff = %cutoff, "tombstones pruned"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "cannot prune tombstones"),
            }
        }

        debug!(
            minimum = %minimum,
            fetched = transactions.len(),
            merged = merged.map_or(0, |m| m.applied),
            merge_failed = merge_error.is_some(),
            cutoff = %cutoff,
            deleted = deleted.unwrap_or(0),
            "round complete"
        );

        Ok(RoundReport {
            minimum,
            fetched: transactions.len(),
            merged,
            merge_error,
            checkpoint,
            cutoff,
            deleted,
        })
    }
}
