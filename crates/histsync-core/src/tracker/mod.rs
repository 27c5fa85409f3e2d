//! The history tracker: one consumer's synchronization actor.
//!
//! A tracker listens to "log changed" notifications on a dedicated thread
//! and runs one round per notification, strictly one at a time:
//!
//! 1. minimum checkpoint across the roster (absent authors left out)
//! 2. fetch peers' transactions strictly after it
//! 3. merge them into the consumer's view
//! 4. advance the consumer's own checkpoint to the last fetched timestamp
//! 5. compute the retention cutoff `max(now - max_age, common)`
//! 6. compact the log before the cutoff
//!
//! Every failure is logged inside the round; none stops the listener.

pub mod round;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, select};
use parking_lot::Mutex;

use crate::checkpoint::{CheckpointStore, DEFAULT_NAMESPACE, FileCheckpointStore};
use crate::clean::{Cleaner, CleanupScope, DefaultCleaner};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::fetch::{FetchPolicy, Fetcher};
use crate::lock::DEFAULT_LOCK_TIMEOUT;
use crate::merge::{DefaultMerger, MergeFailurePolicy, Merger};
use crate::model::Roster;
use crate::notify::{LogChanged, NotificationSource};
use crate::store::Store;
use crate::view::ViewContext;

pub use round::{RoundReport, retention_cutoff};

/// Default upper bound on how long a log entry is kept: 7 days.
pub const DEFAULT_MAX_TRANSACTION_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
struct RoundSettings {
    max_transaction_age: Duration,
    merge_failure: MergeFailurePolicy,
    cleanup_scope: CleanupScope,
}

/// State shared between the tracker handle and its monitor thread.
struct TrackerShared {
    current_author: String,
    roster: Roster,
    fetcher: Box<dyn Fetcher>,
    merger: Box<dyn Merger>,
    cleaner: Box<dyn Cleaner>,
    checkpoints: Arc<dyn CheckpointStore>,
    view: ViewContext,
    store_path: PathBuf,
    clock: Arc<dyn Clock>,
    settings: RoundSettings,
    /// Worker connection for fetch and cleanup. Holding this lock is what
    /// serializes rounds.
    worker: Mutex<Option<Store>>,
    span: tracing::Span,
}

struct Monitor {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Keeps one consumer's view in step with its peers' writes.
pub struct HistoryTracker {
    shared: Arc<TrackerShared>,
    notifications: Option<Arc<dyn NotificationSource>>,
    monitor: Mutex<Option<Monitor>>,
}

impl fmt::Debug for HistoryTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryTracker")
            .field("current_author", &self.shared.current_author)
            .field("roster", &self.shared.roster)
            .field("store_path", &self.shared.store_path)
            .field("monitoring", &self.is_monitoring())
            .finish_non_exhaustive()
    }
}

impl HistoryTracker {
    /// Start configuring a tracker for `current_author`.
    pub fn builder(current_author: impl Into<String>, roster: Roster) -> TrackerBuilder {
        TrackerBuilder::new(current_author.into(), roster)
    }

    #[must_use]
    pub fn current_author(&self) -> &str {
        &self.shared.current_author
    }

    #[must_use]
    pub fn roster(&self) -> &Roster {
        &self.shared.roster
    }

    #[must_use]
    pub fn view(&self) -> &ViewContext {
        &self.shared.view
    }

    #[must_use]
    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.shared.checkpoints
    }

    /// Begin running a round for every notification. Calling this while
    /// already monitoring does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if no notification source was configured or the
    /// monitor thread cannot be spawned.
    pub fn start_monitoring(&self) -> Result<(), SyncError> {
        let mut monitor = self.monitor.lock();
        if let Some(running) = monitor.as_ref() {
            if !running.handle.is_finished() {
                return Ok(());
            }
        }
        if let Some(finished) = monitor.take() {
            let _ = finished.handle.join();
        }

        let source = self
            .notifications
            .as_ref()
            .ok_or(SyncError::MissingComponent("notification source"))?;
        let notifications = source.subscribe();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);

        let handle = thread::Builder::new()
            .name(format!("histsync-tracker-{}", self.shared.current_author))
            .spawn(move || monitor_loop(&shared, &notifications, &stop_rx))
            .map_err(SyncError::Spawn)?;

        *monitor = Some(Monitor {
            stop: stop_tx,
            handle,
        });
        tracing::info!(author = %self.shared.current_author, "monitoring started");
        Ok(())
    }

    /// Stop listening. A round already in progress finishes first; no new
    /// round starts afterwards.
    pub fn stop_monitoring(&self) {
        let Some(monitor) = self.monitor.lock().take() else {
            return;
        };
        drop(monitor.stop);
        if monitor.handle.thread().id() != thread::current().id() {
            let _ = monitor.handle.join();
        }
        tracing::info!(author = %self.shared.current_author, "monitoring stopped");
    }

    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|m| !m.handle.is_finished())
    }

    /// Run one round now, serialized with any background round.
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the round: the log or the checkpoint
    /// store was unavailable. Merge and cleanup failures do not abort the
    /// round and are reported in the [`RoundReport`].
    pub fn process_now(&self) -> Result<RoundReport, SyncError> {
        self.shared.run_round()
    }
}

impl Drop for HistoryTracker {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

fn stop_requested(stop: &Receiver<()>) -> bool {
    matches!(stop.try_recv(), Ok(()) | Err(TryRecvError::Disconnected))
}

fn monitor_loop(shared: &TrackerShared, notifications: &Receiver<LogChanged>, stop: &Receiver<()>) {
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(notifications) -> event => {
                if event.is_err() {
                    tracing::debug!(author = %shared.current_author, "notification source closed");
                    break;
                }
                // A burst of notifications needs only one round.
                while notifications.try_recv().is_ok() {}
                if stop_requested(stop) {
                    break;
                }
                // Failures were logged inside the round.
                let _ = shared.run_round();
            }
        }
    }
}

/// Configures and builds a [`HistoryTracker`].
pub struct TrackerBuilder {
    current_author: String,
    roster: Roster,
    store_path: Option<PathBuf>,
    view: Option<ViewContext>,
    notifications: Option<Arc<dyn NotificationSource>>,
    fetcher: Option<Box<dyn Fetcher>>,
    merger: Option<Box<dyn Merger>>,
    cleaner: Option<Box<dyn Cleaner>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    clock: Option<Arc<dyn Clock>>,
    fetch_policy: FetchPolicy,
    max_transaction_age: Duration,
    merge_failure: MergeFailurePolicy,
    cleanup_scope: CleanupScope,
    checkpoint_namespace: String,
    lock_timeout: Duration,
}

impl TrackerBuilder {
    fn new(current_author: String, roster: Roster) -> Self {
        Self {
            current_author,
            roster,
            store_path: None,
            view: None,
            notifications: None,
            fetcher: None,
            merger: None,
            cleaner: None,
            checkpoints: None,
            clock: None,
            fetch_policy: FetchPolicy::default(),
            max_transaction_age: DEFAULT_MAX_TRANSACTION_AGE,
            merge_failure: MergeFailurePolicy::default(),
            cleanup_scope: CleanupScope::default(),
            checkpoint_namespace: DEFAULT_NAMESPACE.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Path of the shared store; the tracker opens its own worker
    /// connection to it.
    #[must_use]
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Context owning the consumer's materialized view.
    #[must_use]
    pub fn view(mut self, view: ViewContext) -> Self {
        self.view = Some(view);
        self
    }

    #[must_use]
    pub fn notifications(mut self, source: Arc<dyn NotificationSource>) -> Self {
        self.notifications = Some(source);
        self
    }

    #[must_use]
    pub fn fetcher(mut self, fetcher: Box<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn merger(mut self, merger: Box<dyn Merger>) -> Self {
        self.merger = Some(merger);
        self
    }

    #[must_use]
    pub fn cleaner(mut self, cleaner: Box<dyn Cleaner>) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    #[must_use]
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub const fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    #[must_use]
    pub const fn max_transaction_age(mut self, age: Duration) -> Self {
        self.max_transaction_age = age;
        self
    }

    #[must_use]
    pub const fn merge_failure(mut self, policy: MergeFailurePolicy) -> Self {
        self.merge_failure = policy;
        self
    }

    #[must_use]
    pub const fn cleanup_scope(mut self, scope: CleanupScope) -> Self {
        self.cleanup_scope = scope;
        self
    }

    /// Apply the policies and limits from a loaded config.
    #[must_use]
    pub fn config(mut self, config: &SyncConfig) -> Self {
        self.fetch_policy = config.fetch_policy;
        self.max_transaction_age = config.max_transaction_age();
        self.merge_failure = config.merge_failure;
        self.cleanup_scope = config.cleanup_scope;
        self.checkpoint_namespace.clone_from(&config.checkpoint_namespace);
        self.lock_timeout = config.lock_timeout();
        self
    }

    /// # Errors
    ///
    /// Returns [`SyncError::MissingComponent`] without a store path or view,
    /// and [`SyncError::UnknownAuthor`] when the tracker's author is not in
    /// the roster. Open world widens whose transactions are fetched, never
    /// who may consume them.
    pub fn build(self) -> Result<HistoryTracker, SyncError> {
        let store_path = self
            .store_path
            .ok_or(SyncError::MissingComponent("store path"))?;
        let view = self.view.ok_or(SyncError::MissingComponent("view context"))?;

        if !self.roster.contains(&self.current_author) {
            return Err(SyncError::UnknownAuthor(self.current_author));
        }

        let fetcher = self
            .fetcher
            .unwrap_or_else(|| self.fetch_policy.fetcher(&self.current_author, &self.roster));
        let checkpoints = self.checkpoints.unwrap_or_else(|| {
            let dir = store_path.parent().map(PathBuf::from).unwrap_or_default();
            Arc::new(
                FileCheckpointStore::new(&dir, self.checkpoint_namespace.clone())
                    .with_timeout(self.lock_timeout),
            )
        });

        let span = tracing::info_span!("history_tracker", author = %self.current_author);

        Ok(HistoryTracker {
            shared: Arc::new(TrackerShared {
                fetcher,
                merger: self.merger.unwrap_or_else(|| Box::new(DefaultMerger)),
                cleaner: self.cleaner.unwrap_or_else(|| Box::new(DefaultCleaner)),
                checkpoints,
                view,
                store_path,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                settings: RoundSettings {
                    max_transaction_age: self.max_transaction_age,
                    merge_failure: self.merge_failure,
                    cleanup_scope: self.cleanup_scope,
                },
                worker: Mutex::new(None),
                span,
                current_author: self.current_author,
                roster: self.roster,
            }),
            notifications: self.notifications,
            monitor: Mutex::new(None),
        })
    }
}
