//! "The log changed" notification sources.
//!
//! Notifications carry no payload; receivers always re-derive what changed
//! from the log. Delivery is at-least-once and bursts may be coalesced by
//! the receiver.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;

use crate::store::Store;

/// Signal that the shared log has (probably) changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogChanged;

/// Something a tracker can listen to for [`LogChanged`] events.
pub trait NotificationSource: Send + Sync {
    /// A fresh receiver. Each call yields an independent subscription.
    fn subscribe(&self) -> Receiver<LogChanged>;
}

/// In-process broadcast of [`LogChanged`].
#[derive(Debug, Clone, Default)]
pub struct ChangeHub {
    subscribers: Arc<Mutex<Vec<Sender<LogChanged>>>>,
}

impl ChangeHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every subscriber. Subscribers whose receiver is gone are pruned.
    /// Returns the number still subscribed.
    pub fn notify(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(LogChanged).is_ok());
        subscribers.len()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl NotificationSource for ChangeHub {
    fn subscribe(&self) -> Receiver<LogChanged> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }
}

/// Polls a store's high-water mark and publishes into a [`ChangeHub`]
/// whenever it moves. This picks up commits from other processes.
#[derive(Debug)]
pub struct StoreWatcher {
    hub: ChangeHub,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StoreWatcher {
    /// Start polling `store` every `interval`.
    ///
    /// # Errors
    ///
    /// Returns an error if the polling thread cannot be spawned.
    pub fn spawn(store: Store, interval: Duration) -> io::Result<Self> {
        let hub = ChangeHub::new();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let publish = hub.clone();
        let handle = thread::Builder::new()
            .name("histsync-store-watcher".to_string())
            .spawn(move || watch(&store, &publish, &stop_rx, interval))?;

        Ok(Self {
            hub,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    #[must_use]
    pub const fn hub(&self) -> &ChangeHub {
        &self.hub
    }

    /// Stop polling and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl NotificationSource for StoreWatcher {
    fn subscribe(&self) -> Receiver<LogChanged> {
        self.hub.subscribe()
    }
}

impl Drop for StoreWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn watch(store: &Store, hub: &ChangeHub, stop: &Receiver<()>, interval: Duration) {
    let mut last = match store.high_water_mark() {
        Ok(mark) => mark,
        Err(err) => {
            tracing::warn!(error = %err, "store watcher could not read initial high-water mark");
            0
        }
    };

    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        match store.high_water_mark() {
            Ok(mark) if mark != last => {
                last = mark;
                let subscribers = hub.notify();
                tracing::trace!(mark, subscribers, "log changed");
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "store watcher poll failed"),
        }
    }
}
