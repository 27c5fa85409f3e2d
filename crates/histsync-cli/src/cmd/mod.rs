pub mod clean;
pub mod commit;
pub mod init;
pub mod log;
pub mod status;
pub mod sync;
pub mod watch;

use std::path::Path;

use anyhow::Context as _;
use histsync_core::checkpoint::FileCheckpointStore;
use histsync_core::config::{StorePaths, SyncConfig};
use histsync_core::error::ErrorCode;
use histsync_core::model::Roster;
use histsync_core::store::Store;

use crate::output::CodedError;

/// An initialized store root and its loaded config.
pub struct Workspace {
    pub paths: StorePaths,
    pub config: SyncConfig,
}

impl Workspace {
    /// # Errors
    ///
    /// Fails with `NotInitialized` when `root` has no `.histsync/histsync.toml`,
    /// or when the config cannot be parsed.
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let paths = StorePaths::new(root);
        if !paths.is_initialized() {
            return Err(CodedError::new(
                ErrorCode::NotInitialized,
                format!("no histsync store at {}", paths.dir().display()),
            )
            .into());
        }
        let config = SyncConfig::load(&paths.config()).context("failed to load config")?;
        Ok(Self { paths, config })
    }

    pub fn roster(&self) -> anyhow::Result<Roster> {
        Ok(self.config.roster()?)
    }

    pub fn store(&self) -> anyhow::Result<Store> {
        let path = self.paths.store();
        Store::open(&path).with_context(|| format!("failed to open store {}", path.display()))
    }

    pub fn checkpoints(&self) -> FileCheckpointStore {
        FileCheckpointStore::new(&self.paths.dir(), self.config.checkpoint_namespace.clone())
            .with_timeout(self.config.lock_timeout())
    }
}
