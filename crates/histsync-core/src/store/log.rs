//! Log queries: range fetch, compaction and high-water mark.

use rusqlite::{OptionalExtension, params, params_from_iter, types::Value};

use super::{Store, StoreError};
use crate::model::{Change, Timestamp, Transaction};

/// Which authors a log query admits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorFilter {
    /// Every author.
    Any,
    /// Only the listed authors. An empty list admits nothing.
    Among(Vec<String>),
    /// Every author except this one.
    Except(String),
}

impl Store {
    /// Transactions with `timestamp > after` admitted by `filter`, ascending
    /// by timestamp (ties broken by sequence).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a changeset is unreadable.
    pub fn query_after(
        &self,
        after: Timestamp,
        filter: &AuthorFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut sql = String::from(
            "SELECT seq, author, timestamp_us, changes FROM transactions WHERE timestamp_us > ?1",
        );
        let mut values = vec![Value::Integer(after.as_micros())];

        match filter {
            AuthorFilter::Any => {}
            AuthorFilter::Among(authors) => {
                if authors.is_empty() {
                    return Ok(Vec::new());
                }
                sql.push_str(" AND author IN (");
                sql.push_str(&placeholders(2, authors.len()));
                sql.push(')');
                values.extend(authors.iter().cloned().map(Value::Text));
            }
            AuthorFilter::Except(author) => {
                sql.push_str(" AND author != ?2");
                values.push(Value::Text(author.clone()));
            }
        }
        sql.push_str(" ORDER BY timestamp_us ASC, seq ASC");

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut transactions = Vec::new();
        for row in rows {
            let (seq, author, timestamp_us, raw) = row?;
            let changes: Vec<Change> = serde_json::from_str(&raw)
                .map_err(|source| StoreError::CorruptChangeset { seq, source })?;
            transactions.push(Transaction {
                seq,
                author,
                timestamp: Timestamp::from_micros(timestamp_us),
                changes,
            });
        }
        Ok(transactions)
    }

    /// Delete log entries with `timestamp < cutoff`, optionally only those
    /// written by an author in `scope`. Entries exactly at `cutoff` remain.
    ///
    /// Returns the number of deleted entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_before(
        &self,
        cutoff: Timestamp,
        scope: Option<&[String]>,
    ) -> Result<usize, StoreError> {
        let deleted = match scope {
            None => self.conn().execute(
                "DELETE FROM transactions WHERE timestamp_us < ?1",
                params![cutoff.as_micros()],
            )?,
            Some([]) => 0,
            Some(authors) => {
                let sql = format!(
                    "DELETE FROM transactions WHERE timestamp_us < ?1 AND author IN ({})",
                    placeholders(2, authors.len())
                );
                let mut values = vec![Value::Integer(cutoff.as_micros())];
                values.extend(authors.iter().cloned().map(Value::Text));
                self.conn().execute(&sql, params_from_iter(values.iter()))?
            }
        };
        Ok(deleted)
    }

    /// Number of entries currently in the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn transaction_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Highest sequence number ever assigned, or 0 for a fresh store.
    ///
    /// Unlike `MAX(seq)` this never goes down when compaction removes the
    /// newest entries, so it is a reliable "log changed" signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn high_water_mark(&self) -> Result<i64, StoreError> {
        let seq: Option<i64> = self
            .conn()
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = 'transactions'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seq.unwrap_or(0))
    }

    /// Timestamps of the oldest and newest entries still in the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn timestamp_bounds(&self) -> Result<Option<(Timestamp, Timestamp)>, StoreError> {
        let bounds: (Option<i64>, Option<i64>) = self.conn().query_row(
            "SELECT MIN(timestamp_us), MAX(timestamp_us) FROM transactions",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(match bounds {
            (Some(min), Some(max)) => {
                Some((Timestamp::from_micros(min), Timestamp::from_micros(max)))
            }
            _ => None,
        })
    }

    /// Timestamp of the newest entry still in the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn latest_timestamp(&self) -> Result<Option<Timestamp>, StoreError> {
        Ok(self.timestamp_bounds()?.map(|(_, latest)| latest))
    }
}

fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::AuthorFilter;
    use crate::model::{Change, Timestamp};
    use crate::store::Store;
    use serde_json::json;

    fn seeded() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = Store::open(&dir.path().join("store.sqlite3")).expect("open");
        for (author, ts) in [("a", 10), ("b", 20), ("c", 30), ("b", 40)] {
            store
                .commit(
                    author,
                    &[Change::upsert(format!("{author}-{ts}"), json!(ts))],
                    Timestamp::from_micros(ts),
                )
                .expect("commit");
        }
        (dir, store)
    }

    fn stamps(txs: &[crate::model::Transaction]) -> Vec<i64> {
        txs.iter().map(|t| t.timestamp.as_micros()).collect()
    }

    #[test]
    fn query_after_is_strict_and_ordered() {
        let (_dir, store) = seeded();
        let all = store
            .query_after(Timestamp::DISTANT_PAST, &AuthorFilter::Any)
            .expect("query");
        assert_eq!(stamps(&all), vec![10, 20, 30, 40]);

        let after = store
            .query_after(Timestamp::from_micros(20), &AuthorFilter::Any)
            .expect("query");
        assert_eq!(stamps(&after), vec![30, 40]);
    }

    #[test]
    fn query_filters_by_author() {
        let (_dir, store) = seeded();
        let among = store
            .query_after(
                Timestamp::DISTANT_PAST,
                &AuthorFilter::Among(vec!["b".into(), "c".into()]),
            )
            .expect("query");
        assert_eq!(stamps(&among), vec![20, 30, 40]);

        let except = store
            .query_after(Timestamp::DISTANT_PAST, &AuthorFilter::Except("b".into()))
            .expect("query");
        assert_eq!(stamps(&except), vec![10, 30]);

        let nobody = store
            .query_after(Timestamp::DISTANT_PAST, &AuthorFilter::Among(vec![]))
            .expect("query");
        assert!(nobody.is_empty());
    }

    #[test]
    fn delete_before_keeps_cutoff_entry() {
        let (_dir, store) = seeded();
        let deleted = store
            .delete_before(Timestamp::from_micros(30), None)
            .expect("delete");
        assert_eq!(deleted, 2);

        let left = store
            .query_after(Timestamp::DISTANT_PAST, &AuthorFilter::Any)
            .expect("query");
        assert_eq!(stamps(&left), vec![30, 40]);
    }

    #[test]
    fn delete_before_respects_scope() {
        let (_dir, store) = seeded();
        let scope = vec!["b".to_string()];
        let deleted = store
            .delete_before(Timestamp::from_micros(100), Some(&scope))
            .expect("delete");
        assert_eq!(deleted, 2);
        assert_eq!(store.transaction_count().expect("count"), 2);

        let none = store
            .delete_before(Timestamp::from_micros(100), Some(&[]))
            .expect("delete");
        assert_eq!(none, 0);
    }

    #[test]
    fn high_water_mark_survives_compaction() {
        let (_dir, store) = seeded();
        assert_eq!(store.high_water_mark().expect("hwm"), 4);
        store
            .delete_before(Timestamp::from_micros(1_000), None)
            .expect("delete");
        assert_eq!(store.transaction_count().expect("count"), 0);
        assert_eq!(store.high_water_mark().expect("hwm"), 4);
        assert_eq!(store.timestamp_bounds().expect("bounds"), None);
        assert_eq!(store.latest_timestamp().expect("latest"), None);
    }

    #[test]
    fn fresh_store_has_zero_high_water_mark() {
        let store = Store::open_in_memory().expect("open");
        assert_eq!(store.high_water_mark().expect("hwm"), 0);
    }
}
