use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checkpoint::DEFAULT_NAMESPACE;
use crate::clean::CleanupScope;
use crate::error::ErrorCode;
use crate::fetch::FetchPolicy;
use crate::merge::MergeFailurePolicy;
use crate::model::{Roster, RosterError};

pub const HISTSYNC_DIR: &str = ".histsync";
pub const CONFIG_FILE_NAME: &str = "histsync.toml";
pub const STORE_FILE_NAME: &str = "store.sqlite3";

/// Well-known locations under a store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `.histsync/`: store, config and checkpoint files.
    #[must_use]
    pub fn dir(&self) -> PathBuf {
        self.root.join(HISTSYNC_DIR)
    }

    #[must_use]
    pub fn config(&self) -> PathBuf {
        self.dir().join(CONFIG_FILE_NAME)
    }

    #[must_use]
    pub fn store(&self) -> PathBuf {
        self.dir().join(STORE_FILE_NAME)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.config().exists()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to encode config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid authors: {0}")]
    Roster(#[from] RosterError),
}

impl ConfigError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Read { .. } | Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::Roster(_) => ErrorCode::InvalidRoster,
            Self::Write { .. } | Self::Serialize(_) => ErrorCode::InternalUnexpected,
        }
    }
}

/// Settings shared by every consumer of one store (`histsync.toml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// The closed roster of known authors.
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default = "default_max_transaction_age_secs")]
    pub max_transaction_age_secs: u64,
    #[serde(default)]
    pub fetch_policy: FetchPolicy,
    #[serde(default)]
    pub merge_failure: MergeFailurePolicy,
    #[serde(default)]
    pub cleanup_scope: CleanupScope,
    #[serde(default = "default_checkpoint_namespace")]
    pub checkpoint_namespace: String,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            authors: Vec::new(),
            max_transaction_age_secs: default_max_transaction_age_secs(),
            fetch_policy: FetchPolicy::default(),
            merge_failure: MergeFailurePolicy::default(),
            cleanup_scope: CleanupScope::default(),
            checkpoint_namespace: default_checkpoint_namespace(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

const fn default_max_transaction_age_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_checkpoint_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

const fn default_lock_timeout_ms() -> u64 {
    5_000
}

impl SyncConfig {
    /// Default settings for `authors`.
    pub fn with_authors<I, S>(authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            authors: authors.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Load from `path`; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// # Errors
    ///
    /// Returns an error if encoding or writing the file fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        std::fs::write(path, content).map_err(write_err)
    }

    /// The validated author roster.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Roster`] if `authors` is empty, has an empty
    /// name or repeats one.
    pub fn roster(&self) -> Result<Roster, ConfigError> {
        Ok(Roster::new(self.authors.iter().cloned())?)
    }

    #[must_use]
    pub const fn max_transaction_age(&self) -> Duration {
        Duration::from_secs(self.max_transaction_age_secs)
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
