//! Single-threaded execution context owning one [`MaterializedView`].
//!
//! All access to the view goes through closures queued onto the context's
//! own thread, so writes from the merger and from the consumer never
//! interleave.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use super::{MaterializedView, ViewError};
use crate::error::ErrorCode;
use crate::model::{Change, Timestamp, Transaction};
use crate::store::Store;

type Job = Box<dyn FnOnce(&mut MaterializedView) + Send>;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to spawn view context thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("view context '{name}' is closed")]
    Closed { name: String },

    #[error("view context '{name}' dropped the job before replying")]
    Aborted { name: String },

    #[error("view context '{name}' cannot wait on itself")]
    Reentrant { name: String },
}

impl ContextError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Closed { .. } | Self::Aborted { .. } => ErrorCode::ViewContextClosed,
            Self::Spawn(_) | Self::Reentrant { .. } => ErrorCode::InternalUnexpected,
        }
    }
}

struct ContextInner {
    name: String,
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        // Closing the queue lets the thread drain what is left and exit.
        drop(self.sender.take());
        if thread::current().id() == self.thread_id {
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Handle to a view running on its own thread. Clones share the thread,
/// which exits once the last clone is dropped.
#[derive(Clone)]
pub struct ViewContext {
    inner: Arc<ContextInner>,
}

impl std::fmt::Debug for ViewContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewContext")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl ViewContext {
    /// Move `view` onto a new thread named `view-<name>`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Spawn`] if the thread cannot be started.
    pub fn spawn(name: impl Into<String>, view: MaterializedView) -> Result<Self, ContextError> {
        let name = name.into();
        let (sender, receiver) = unbounded::<Job>();
        let handle = thread::Builder::new()
            .name(format!("view-{name}"))
            .spawn(move || run(&receiver, view))
            .map_err(ContextError::Spawn)?;
        let thread_id = handle.thread().id();

        Ok(Self {
            inner: Arc::new(ContextInner {
                name,
                sender: Some(sender),
                handle: Some(handle),
                thread_id,
            }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run `job` on the context thread and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Reentrant`] when called from the context's own
    /// thread, and [`ContextError::Aborted`] if the job panicked.
    pub fn perform_and_wait<R, F>(&self, job: F) -> Result<R, ContextError>
    where
        R: Send + 'static,
        F: FnOnce(&mut MaterializedView) -> R + Send + 'static,
    {
        if thread::current().id() == self.inner.thread_id {
            return Err(ContextError::Reentrant {
                name: self.inner.name.clone(),
            });
        }

        let (reply_tx, reply_rx) = bounded(1);
        self.submit(Box::new(move |view| {
            let _ = reply_tx.send(job(view));
        }))?;
        reply_rx.recv().map_err(|_| ContextError::Aborted {
            name: self.inner.name.clone(),
        })
    }

    /// Queue `job` on the context thread without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Closed`] if the thread has exited.
    pub fn perform<F>(&self, job: F) -> Result<(), ContextError>
    where
        F: FnOnce(&mut MaterializedView) + Send + 'static,
    {
        self.submit(Box::new(job))
    }

    /// Copy of the view as of every job queued before this call.
    ///
    /// # Errors
    ///
    /// See [`ViewContext::perform_and_wait`].
    pub fn snapshot(&self) -> Result<MaterializedView, ContextError> {
        self.perform_and_wait(|view| view.clone())
    }

    /// Commit `changes` to the shared store as `author` and record the
    /// resulting versions in this view.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the commit or the context is
    /// closed.
    pub fn commit(
        &self,
        store: &mut Store,
        author: &str,
        changes: Vec<Change>,
    ) -> Result<Transaction, ViewError> {
        self.commit_at(store, author, changes, Timestamp::now())
    }

    /// [`ViewContext::commit`] with an explicit commit time.
    ///
    /// # Errors
    ///
    /// See [`ViewContext::commit`].
    pub fn commit_at(
        &self,
        store: &mut Store,
        author: &str,
        changes: Vec<Change>,
        now: Timestamp,
    ) -> Result<Transaction, ViewError> {
        let tx = store.commit(author, &changes, now)?;
        let recorded = tx.clone();
        self.perform_and_wait(move |view| view.apply_transaction(&recorded))??;
        Ok(tx)
    }

    fn submit(&self, job: Job) -> Result<(), ContextError> {
        let closed = || ContextError::Closed {
            name: self.inner.name.clone(),
        };
        self.inner
            .sender
            .as_ref()
            .ok_or_else(closed)?
            .send(job)
            .map_err(|_| closed())
    }
}

fn run(jobs: &Receiver<Job>, mut view: MaterializedView) {
    while let Ok(job) = jobs.recv() {
        if panic::catch_unwind(AssertUnwindSafe(|| job(&mut view))).is_err() {
            tracing::error!("view job panicked; context keeps running");
        }
    }
    tracing::trace!("view context exiting");
}
