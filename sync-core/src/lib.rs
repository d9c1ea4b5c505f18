//! # sync-core
//!
//! Pure logic for overlay router synchronization (no I/O, instant tests).
//!
//! This crate implements the ordering, lifecycle and pacing rules the router
//! relies on, without any network or disk I/O:
//! - [`event_log`] - strictly ordered event log with optional replay window
//! - [`lifecycle`] - per-token network-session state machine
//! - [`tracker`] - "which sync is in progress" marker
//! - [`backoff`] - lookup backoff and reconciliation jitter
//!
//! The I/O (control channels, timers, persistence) lives in `sync-router`,
//! which drives these types.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod event_log;
pub mod lifecycle;
pub mod tracker;

pub use backoff::{jittered_interval, LookupBackoff};
pub use event_log::{EventLog, EventLogError, RetainingEventLog, Sequenced, TrackingEventLog};
pub use lifecycle::NetworkSessionState;
pub use tracker::SyncTracker;
