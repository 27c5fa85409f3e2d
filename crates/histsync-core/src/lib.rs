//! histsync-core library.
//!
//! Several independent consumers share one append-only transaction log.
//! Each consumer runs a [`tracker::HistoryTracker`] that, whenever the log
//! changes, fetches the transactions written by its peers, merges them into
//! its own materialized view, advances its checkpoint and compacts log
//! entries that no known consumer still needs.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums per module; each maps to an
//!   [`error::ErrorCode`].
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod checkpoint;
pub mod clean;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod lock;
pub mod merge;
pub mod model;
pub mod notify;
pub mod store;
pub mod tracker;
pub mod view;
