//! Shared SQLite store: the objects every consumer projects, plus the
//! append-only transaction log recorded on every commit.
//!
//! Runtime defaults follow the usual multi-connection setup:
//! - `journal_mode = WAL` so fetchers read while another consumer commits
//! - `busy_timeout = 5s` to ride out short write contention
//!
//! Commit timestamps are assigned as `max(now, last + 1µs)` from a value
//! kept in `store_meta`, so the log's timestamps are strictly increasing
//! even across clock steps and even after compaction empties the log.

pub mod log;
pub mod schema;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior, params};

use crate::error::ErrorCode;
use crate::model::{Change, ChangeOp, EntityId, Timestamp, Transaction, Version};

pub use log::AuthorFilter;

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised by the shared store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create store directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("transaction {seq} has an unreadable changeset: {source}")]
    CorruptChangeset {
        seq: i64,
        source: serde_json::Error,
    },

    #[error("object {entity} has an unreadable value: {source}")]
    CorruptValue {
        entity: String,
        source: serde_json::Error,
    },

    #[error("refusing to commit an empty transaction for author '{0}'")]
    EmptyTransaction(String),

    #[error("failed to encode changeset: {0}")]
    Encode(#[source] serde_json::Error),
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Sqlite(_) | Self::CreateDir { .. } => ErrorCode::LogUnavailable,
            Self::CorruptChangeset { .. } | Self::CorruptValue { .. } => {
                ErrorCode::CorruptLogEntry
            }
            Self::EmptyTransaction(_) => ErrorCode::EmptyTransaction,
            Self::Encode(_) => ErrorCode::InternalUnexpected,
        }
    }
}

/// One row of the shared objects table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub entity: EntityId,
    pub value: serde_json::Value,
    /// Version of the transaction that last wrote this object.
    pub version: Version,
}

/// A connection to the shared store.
///
/// Each consumer, and each tracker's worker context, holds its own
/// `Store`; they coordinate only through SQLite.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
    path: PathBuf,
}

impl Store {
    /// Open (or create) the store at `path`, apply runtime pragmas and
    /// migrate the schema to the latest version.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or opening,
    /// configuring or migrating the database fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut conn = Connection::open(path)?;
        configure_connection(&conn)?;
        schema::migrate(&mut conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open a private in-memory store. Other connections cannot see it.
    ///
    /// # Errors
    ///
    /// Returns an error if migrating the schema fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    /// Open another independent connection to the same store file.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn reopen(&self) -> Result<Self, StoreError> {
        Self::open(&self.path)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Commit `changes` on behalf of `author` using the system clock.
    ///
    /// # Errors
    ///
    /// See [`Store::commit`].
    pub fn commit_now(&mut self, author: &str, changes: &[Change]) -> Result<Transaction, StoreError> {
        self.commit(author, changes, Timestamp::now())
    }

    /// Apply `changes` to the objects table and append one transaction to
    /// the log, atomically.
    ///
    /// The recorded timestamp is `max(now, last_timestamp + 1µs)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptyTransaction`] when `changes` is empty, or
    /// an error if encoding or the SQLite transaction fails.
    pub fn commit(
        &mut self,
        author: &str,
        changes: &[Change],
        now: Timestamp,
    ) -> Result<Transaction, StoreError> {
        if changes.is_empty() {
            return Err(StoreError::EmptyTransaction(author.to_string()));
        }
        let encoded = serde_json::to_string(changes).map_err(StoreError::Encode)?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let last_us: i64 = tx.query_row(
            "SELECT last_timestamp_us FROM store_meta WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        let timestamp = now.max(Timestamp::from_micros(last_us).next());

        tx.execute(
            "INSERT INTO transactions (author, timestamp_us, changes) VALUES (?1, ?2, ?3)",
            params![author, timestamp.as_micros(), encoded],
        )?;
        let seq = tx.last_insert_rowid();

        for change in changes {
            match &change.op {
                ChangeOp::Upsert { value } => {
                    let value = serde_json::to_string(value).map_err(StoreError::Encode)?;
                    tx.execute(
                        "INSERT INTO objects (entity_id, value, updated_at_us, updated_seq)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(entity_id) DO UPDATE SET
                             value = excluded.value,
                             updated_at_us = excluded.updated_at_us,
                             updated_seq = excluded.updated_seq",
                        params![change.entity.as_str(), value, timestamp.as_micros(), seq],
                    )?;
                }
                ChangeOp::Delete => {
                    tx.execute(
                        "DELETE FROM objects WHERE entity_id = ?1",
                        params![change.entity.as_str()],
                    )?;
                }
            }
        }

        tx.execute(
            "UPDATE store_meta SET last_timestamp_us = ?1 WHERE id = 1",
            params![timestamp.as_micros()],
        )?;
        tx.commit()?;

        tracing::debug!(
            author,
            seq,
            timestamp = %timestamp,
            changes = changes.len(),
            "committed transaction"
        );

        Ok(Transaction {
            seq,
            author: author.to_string(),
            timestamp,
            changes: changes.to_vec(),
        })
    }

    /// Load every object currently in the store, ordered by entity id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored value is unreadable.
    pub fn load_objects(&self) -> Result<Vec<StoredObject>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, value, updated_at_us, updated_seq FROM objects ORDER BY entity_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut objects = Vec::new();
        for row in rows {
            let (entity, raw, updated_at_us, updated_seq) = row?;
            let value = serde_json::from_str(&raw).map_err(|source| StoreError::CorruptValue {
                entity: entity.clone(),
                source,
            })?;
            objects.push(StoredObject {
                entity: EntityId::new(entity),
                value,
                version: Version {
                    timestamp: Timestamp::from_micros(updated_at_us),
                    seq: updated_seq,
                },
            });
        }
        Ok(objects)
    }

    pub(crate) const fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}
