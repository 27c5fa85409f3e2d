//! A consumer's local projection of the shared objects.
//!
//! Every entry remembers the [`Version`] of the transaction that produced
//! it and deletes leave a tombstone version behind. A change is applied only
//! when its transaction is at least as new as what the view already holds,
//! so re-applying a batch is a no-op and the later transaction for an entity
//! always wins, whatever order overlapping rounds deliver them in.

pub mod context;

use std::collections::BTreeMap;

use crate::error::ErrorCode;
use crate::model::{ChangeOp, EntityId, Timestamp, Transaction, Version};
use crate::store::{AuthorFilter, Store, StoreError};

pub use context::{ContextError, ViewContext};

/// Errors applying changes to, or loading, a view.
#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("transaction {seq} names an entity with an empty id")]
    EmptyEntityId { seq: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl ViewError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::EmptyEntityId { .. } => ErrorCode::CorruptLogEntry,
            Self::Store(err) => err.code(),
            Self::Context(err) => err.code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEntry {
    pub value: serde_json::Value,
    pub version: Version,
}

/// Result of applying one transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Changes written into the view.
    pub applied: usize,
    /// Changes skipped because the view already held a newer version.
    pub stale: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializedView {
    entries: BTreeMap<EntityId, ViewEntry>,
    tombstones: BTreeMap<EntityId, Version>,
}

impl MaterializedView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bootstrap a view from the objects currently in `store`.
    ///
    /// The retained log is replayed on top so deletes still in the log leave
    /// tombstones, and a peer's older upsert fetched later cannot resurrect
    /// the entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the objects or the log cannot be read, or a
    /// logged transaction is invalid.
    pub fn load(store: &Store) -> Result<Self, ViewError> {
        let entries = store
            .load_objects()?
            .into_iter()
            .map(|object| {
                (
                    object.entity,
                    ViewEntry {
                        value: object.value,
                        version: object.version,
                    },
                )
            })
            .collect();
        let mut view = Self {
            entries,
            tombstones: BTreeMap::new(),
        };
        for tx in store.query_after(Timestamp::DISTANT_PAST, &AuthorFilter::Any)? {
            view.apply_transaction(&tx)?;
        }
        Ok(view)
    }

    #[must_use]
    pub fn get(&self, entity: &str) -> Option<&serde_json::Value> {
        self.entries.get(entity).map(|entry| &entry.value)
    }

    #[must_use]
    pub fn entry(&self, entity: &str) -> Option<&ViewEntry> {
        self.entries.get(entity)
    }

    /// Version that last touched `entity`, including deletes.
    #[must_use]
    pub fn version_of(&self, entity: &str) -> Option<Version> {
        self.entries
            .get(entity)
            .map(|entry| entry.version)
            .or_else(|| self.tombstones.get(entity).copied())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &ViewEntry)> {
        self.entries.iter()
    }

    /// Apply one transaction's changeset.
    ///
    /// The whole changeset is validated before anything is written, so a
    /// rejected transaction leaves the view untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ViewError::EmptyEntityId`] if any change has an empty id.
    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<ApplyOutcome, ViewError> {
        if tx.changes.iter().any(|c| c.entity.as_str().is_empty()) {
            return Err(ViewError::EmptyEntityId { seq: tx.seq });
        }

        let version = tx.version();
        let mut outcome = ApplyOutcome::default();
        for change in &tx.changes {
            // Equal versions come from the same transaction and re-apply to
            // the same state.
            if self
                .version_of(change.entity.as_str())
                .is_some_and(|current| current > version)
            {
                outcome.stale += 1;
                continue;
            }

            match &change.op {
                ChangeOp::Upsert { value } => {
                    self.tombstones.remove(change.entity.as_str());
                    self.entries.insert(
                        change.entity.clone(),
                        ViewEntry {
                            value: value.clone(),
                            version,
                        },
                    );
                }
                ChangeOp::Delete => {
                    self.entries.remove(change.entity.as_str());
                    self.tombstones.insert(change.entity.clone(), version);
                }
            }
            outcome.applied += 1;
        }
        Ok(outcome)
    }

    /// Drop tombstones for deletes strictly older than `cutoff`.
    ///
    /// Only valid once the log holds nothing older than `cutoff`: no fetch
    /// can then deliver a change the tombstone would have to block.
    pub fn prune_tombstones(&mut self, cutoff: Timestamp) -> usize {
        let before = self.tombstones.len();
        self.tombstones.retain(|_, version| version.timestamp >= cutoff);
        before - self.tombstones.len()
    }

    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Entity values keyed by id, for display.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(id, entry)| (id.to_string(), entry.value.clone()))
                .collect(),
        )
    }
}
