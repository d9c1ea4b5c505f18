//! # sync-router
//!
//! Router-side state synchronization for an overlay network.
//!
//! This crate keeps a router's view of controller-owned state current:
//! - Applies ordered data-state events to the router data model
//! - Maintains the trusted key snapshot used to verify client certificates
//!   and bearer tokens
//! - Tracks API sessions, network sessions and the channels bound to them
//! - Reconciles tracked network sessions with the controller on every
//!   heartbeat
//!
//! ## Architecture
//!
//! ```text
//!   controller ──events──► Synchronizer ──► RouterDataModel (+ EventLog)
//!        ▲                     │                  │
//!        │ heartbeat /         │                  └─► TrustStore
//!        │ validate sessions   ├─► SessionRegistry (API sessions)
//!        └─────────────────────┴─► NetworkSessions (tokens + tombstones)
//! ```
//!
//! ## Background tasks
//!
//! - model save loop ([`persist`])
//! - tombstone sweeper ([`cleanup`])
//! - heartbeat and reconciliation ([`heartbeat`])
//!
//! All of them stop when [`Synchronizer::shutdown`] is called.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod cleanup;
pub mod config;
pub mod dump;
pub mod error;
pub mod heartbeat;
pub mod http;
pub mod listeners;
pub mod model;
pub mod network;
pub mod persist;
pub mod registry;
pub mod synchronizer;
pub mod trust;

pub use channel::Channel;
pub use config::Config;
pub use error::{RouterError, RouterResult};
pub use heartbeat::{HeartbeatOperation, HeartbeatRunner, Operation};
pub use listeners::{ListenerBus, ListenerHandle};
pub use model::{ModelCell, ModelSnapshot, RouterDataModel};
pub use network::NetworkSessions;
pub use registry::{ApiSession, ApiSessionEvent, SessionRegistry};
pub use synchronizer::{CatchUp, RouterMetrics, Synchronizer};
pub use trust::{TrustSnapshot, TrustStore};
