//! Per-author checkpoints: "this author has merged everything up to here".
//!
//! Two backings are provided:
//! - [`MemoryCheckpointStore`] for a single process (tests, previews)
//! - [`FileCheckpointStore`], a JSON document shared by every process that
//!   points at the same directory, guarded by an advisory file lock
//!
//! The file holds one object per namespace, each mapping author to
//! timestamp, so unrelated applications can share one checkpoint file
//! without colliding.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::ErrorCode;
use crate::lock::{CheckpointReadLock, CheckpointWriteLock, DEFAULT_LOCK_TIMEOUT, LockError};
use crate::model::Timestamp;

pub const CHECKPOINT_FILE_NAME: &str = "checkpoints.json";
pub const CHECKPOINT_LOCK_NAME: &str = "checkpoints.lock";
pub const DEFAULT_NAMESPACE: &str = "histsync";

/// Errors raised by checkpoint stores.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("checkpoint file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("checkpoint file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("checkpoint backend failure: {0}")]
    Backend(String),
}

impl CheckpointError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Lock(err) => err.code(),
            Self::Io { .. } | Self::Corrupt { .. } | Self::Backend(_) => {
                ErrorCode::CheckpointStoreFailure
            }
        }
    }
}

/// Durable mapping from author name to last merged timestamp.
pub trait CheckpointStore: Send + Sync {
    /// Last recorded checkpoint for `author`, or `None` if it never merged.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing cannot be read.
    fn get(&self, author: &str) -> Result<Option<Timestamp>, CheckpointError>;

    /// Record `timestamp` for `author`, or clear it when `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing cannot be written.
    fn set(&self, author: &str, timestamp: Option<Timestamp>) -> Result<(), CheckpointError>;

    /// Move `author`'s checkpoint forward to `timestamp`, never backwards.
    /// Returns the checkpoint now stored.
    ///
    /// The default is a plain get-then-set; backings shared between threads
    /// or processes override it to run under one lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing cannot be read or written.
    fn advance(&self, author: &str, timestamp: Timestamp) -> Result<Timestamp, CheckpointError> {
        let next = self
            .get(author)?
            .map_or(timestamp, |current| current.max(timestamp));
        self.set(author, Some(next))?;
        Ok(next)
    }

    /// Earliest checkpoint among `authors`.
    ///
    /// Authors that never checkpointed are left out of the minimum; the
    /// result is `None` only when none of them has a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing cannot be read.
    fn minimum(&self, authors: &[String]) -> Result<Option<Timestamp>, CheckpointError> {
        let mut min: Option<Timestamp> = None;
        for author in authors {
            if let Some(ts) = self.get(author)? {
                min = Some(min.map_or(ts, |m| m.min(ts)));
            }
        }
        Ok(min)
    }
}

fn minimum_of(entries: impl Iterator<Item = Option<Timestamp>>) -> Option<Timestamp> {
    entries.flatten().min()
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// In-process checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<BTreeMap<String, Timestamp>>,
}

impl MemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every recorded checkpoint.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Timestamp> {
        self.entries.lock().clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get(&self, author: &str) -> Result<Option<Timestamp>, CheckpointError> {
        Ok(self.entries.lock().get(author).copied())
    }

    fn set(&self, author: &str, timestamp: Option<Timestamp>) -> Result<(), CheckpointError> {
        let mut entries = self.entries.lock();
        match timestamp {
            Some(ts) => {
                entries.insert(author.to_string(), ts);
            }
            None => {
                entries.remove(author);
            }
        }
        Ok(())
    }

    fn advance(&self, author: &str, timestamp: Timestamp) -> Result<Timestamp, CheckpointError> {
        let mut entries = self.entries.lock();
        let slot = entries.entry(author.to_string()).or_insert(timestamp);
        *slot = (*slot).max(timestamp);
        Ok(*slot)
    }

    fn minimum(&self, authors: &[String]) -> Result<Option<Timestamp>, CheckpointError> {
        let entries = self.entries.lock();
        Ok(minimum_of(
            authors.iter().map(|a| entries.get(a.as_str()).copied()),
        ))
    }
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

type Namespace = BTreeMap<String, Timestamp>;
type Document = BTreeMap<String, Namespace>;

/// Checkpoints persisted as a JSON object in `checkpoints.json`, keyed by
/// namespace and then by author.
///
/// ```text
/// { "histsync": { "app": 1700000000000000, "widget": 1700000000000001 } }
/// ```
///
/// Reads take a shared lock on `checkpoints.lock`; every read-modify-write
/// takes the exclusive lock and replaces the document via temp file and
/// rename, so concurrent processes never observe a torn write.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
    lock_path: PathBuf,
    namespace: String,
    lock_timeout: Duration,
}

impl FileCheckpointStore {
    /// Store checkpoints for `namespace` under `dir`.
    pub fn new(dir: &Path, namespace: impl Into<String>) -> Self {
        Self {
            path: dir.join(CHECKPOINT_FILE_NAME),
            lock_path: dir.join(CHECKPOINT_LOCK_NAME),
            namespace: namespace.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Every checkpoint recorded under this namespace, keyed by author.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be locked or read.
    pub fn entries(&self) -> Result<BTreeMap<String, Timestamp>, CheckpointError> {
        let _lock = CheckpointReadLock::acquire(&self.lock_path, self.lock_timeout)?;
        Ok(self.read_namespace()?)
    }

    fn read_namespace(&self) -> Result<Namespace, CheckpointError> {
        Ok(self
            .read_document()?
            .remove(&self.namespace)
            .unwrap_or_default())
    }

    fn read_document(&self) -> Result<Document, CheckpointError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        // An empty file is a torn write, not an empty document.
        serde_json::from_str(&raw).map_err(|source| CheckpointError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write_document(&self, document: &Document) -> Result<(), CheckpointError> {
        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };
        let encoded = serde_json::to_string_pretty(document)
            .map_err(|err| CheckpointError::Backend(err.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(encoded.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }

    fn update<T>(&self, apply: impl FnOnce(&mut Namespace) -> T) -> Result<T, CheckpointError> {
        let _lock = CheckpointWriteLock::acquire(&self.lock_path, self.lock_timeout)?;
        let mut document = self.read_document()?;
        let namespace = document.entry(self.namespace.clone()).or_default();
        let out = apply(namespace);
        if namespace.is_empty() {
            document.remove(&self.namespace);
        }
        self.write_document(&document)?;
        Ok(out)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn get(&self, author: &str) -> Result<Option<Timestamp>, CheckpointError> {
        let _lock = CheckpointReadLock::acquire(&self.lock_path, self.lock_timeout)?;
        Ok(self.read_namespace()?.get(author).copied())
    }

    fn set(&self, author: &str, timestamp: Option<Timestamp>) -> Result<(), CheckpointError> {
        self.update(|entries| match timestamp {
            Some(ts) => {
                entries.insert(author.to_string(), ts);
            }
            None => {
                entries.remove(author);
            }
        })?;
        tracing::trace!(author, ?timestamp, "checkpoint written");
        Ok(())
    }

    fn advance(&self, author: &str, timestamp: Timestamp) -> Result<Timestamp, CheckpointError> {
        self.update(|entries| {
            let slot = entries.entry(author.to_string()).or_insert(timestamp);
            *slot = (*slot).max(timestamp);
            *slot
        })
    }

    fn minimum(&self, authors: &[String]) -> Result<Option<Timestamp>, CheckpointError> {
        let _lock = CheckpointReadLock::acquire(&self.lock_path, self.lock_timeout)?;
        let entries = self.read_namespace()?;
        Ok(minimum_of(
            authors.iter().map(|a| entries.get(a.as_str()).copied()),
        ))
    }
}
