//! Merge strategies: applying fetched transactions to a consumer's view.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::model::Transaction;
use crate::view::{ViewContext, ViewError};

/// Totals for one merged batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Transactions applied without error.
    pub applied: usize,
    /// Changes skipped because the view already held a newer version.
    pub stale: usize,
}

/// Applies an ascending batch of transactions to a view.
pub trait Merger: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SyncError::MergeFailed`] if any transaction could not be
    /// applied.
    fn merge(
        &self,
        view: &ViewContext,
        transactions: &[Transaction],
    ) -> Result<MergeReport, SyncError>;
}

/// Applies each transaction on the view's context, one at a time, in the
/// order given.
///
/// Transactions are independent: a failure is recorded and the rest of the
/// batch is still applied, and nothing already applied is rolled back.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMerger;

impl Merger for DefaultMerger {
    fn merge(
        &self,
        view: &ViewContext,
        transactions: &[Transaction],
    ) -> Result<MergeReport, SyncError> {
        let mut report = MergeReport::default();
        let mut failed = 0usize;
        let mut first_failure: Option<String> = None;

        for tx in transactions {
            let owned = tx.clone();
            let result = match view.perform_and_wait(move |v| v.apply_transaction(&owned)) {
                Ok(applied) => applied,
                Err(err) => Err(ViewError::from(err)),
            };

            match result {
                Ok(outcome) => {
                    report.applied += 1;
                    report.stale += outcome.stale;
                }
                Err(err) => {
                    tracing::warn!(
                        seq = tx.seq,
                        author = %tx.author,
                        error = %err,
                        "failed to apply transaction"
                    );
                    failed += 1;
                    first_failure.get_or_insert_with(|| format!("seq {}: {err}", tx.seq));
                }
            }
        }

        tracing::debug!(
            view = view.name(),
            applied = report.applied,
            stale = report.stale,
            failed,
            "merge complete"
        );

        match first_failure {
            None => Ok(report),
            Some(first) => Err(SyncError::MergeFailed {
                failed,
                total: transactions.len(),
                first,
            }),
        }
    }
}

/// What a round does with its checkpoint when the merge reports failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeFailurePolicy {
    /// Advance anyway so one bad transaction cannot stall the log.
    #[default]
    Advance,
    /// Leave the checkpoint where it was; the next round re-fetches the
    /// whole range.
    Hold,
}
