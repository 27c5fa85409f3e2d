//! Schema and migrations for the shared store.

use rusqlite::{Connection, types::Type};

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 1;

/// Objects (the shared data) plus the append-only transaction log.
///
/// `transactions.seq` uses `AUTOINCREMENT` so sequence numbers are never
/// reused after compaction deletes the tail of the log.
pub const MIGRATION_V1_SQL: &str = "
CREATE TABLE IF NOT EXISTS store_meta (
    id                INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version    INTEGER NOT NULL DEFAULT 0,
    last_timestamp_us INTEGER NOT NULL DEFAULT 0
);
INSERT OR IGNORE INTO store_meta (id) VALUES (1);

CREATE TABLE IF NOT EXISTS objects (
    entity_id     TEXT PRIMARY KEY,
    value         TEXT NOT NULL,
    updated_at_us INTEGER NOT NULL,
    updated_seq   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    author       TEXT NOT NULL,
    timestamp_us INTEGER NOT NULL,
    changes      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_timestamp
    ON transactions (timestamp_us);
CREATE INDEX IF NOT EXISTS idx_transactions_author_timestamp
    ON transactions (author, timestamp_us);
";

pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_transactions_timestamp",
    "idx_transactions_author_timestamp",
];

const MIGRATIONS: &[(u32, &str)] = &[(1, MIGRATION_V1_SQL)];

/// Read `PRAGMA user_version` and convert it to a Rust `u32`.
///
/// # Errors
///
/// Returns an error if querying SQLite fails or the version value cannot be
/// represented as `u32`.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Apply all pending migrations in ascending order.
///
/// Each migration only runs when its version is above `user_version`, and
/// the DDL uses `IF NOT EXISTS`, so running this repeatedly is harmless.
///
/// # Errors
///
/// Returns an error if any migration fails.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.execute(
            "UPDATE store_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(*version)],
        )?;
        tx.commit()?;
        current = *version;
    }

    Ok(current)
}
