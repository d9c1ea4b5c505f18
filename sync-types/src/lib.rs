//! # sync-types
//!
//! Data-state and control-plane types shared by the overlay synchronization
//! crates.
//!
//! This crate provides:
//! - [`EventIndex`], [`ChannelId`] - Ordering and identity types
//! - [`DataEvent`], [`PublicKey`], [`Entity`] - Data-state model changes
//! - [`ApiSessionRecord`], [`AccessClaims`] - Session records and token claims
//! - [`ControlMessage`] - Router to controller messages
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod claims;
mod data;
mod error;
mod ids;
mod messages;
mod session;

pub use claims::{AccessClaims, Audience, TOKEN_TYPE_ACCESS};
pub use data::{ChangeAction, DataEvent, Entity, KeyFormat, KeyUsage, ModelChange, PublicKey};
pub use error::SyncError;
pub use ids::{ChannelId, EventIndex};
pub use messages::{ControlMessage, Heartbeat, ValidateSessionsRequest};
pub use session::{certificate_fingerprint, is_bearer_token, ApiSessionRecord, JWT_TOKEN_PREFIX};
