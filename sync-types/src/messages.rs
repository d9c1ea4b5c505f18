//! Router to controller control-plane messages.

use serde::{Deserialize, Serialize};

use crate::{EventIndex, SyncError};

/// Messages the router sends on its control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Liveness signal with the router's current data-state position.
    Heartbeat(Heartbeat),
    /// Ask the controller to confirm that network sessions are still valid.
    ValidateSessions(ValidateSessionsRequest),
}

impl ControlMessage {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        rmp_serde::from_slice(bytes).map_err(SyncError::Deserialization)
    }
}

/// Liveness signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Unix timestamp (seconds) when the heartbeat was produced.
    pub timestamp: u64,
    /// Last applied data-state index, if any.
    pub current_index: Option<EventIndex>,
}

/// A chunk of network-session tokens to re-validate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateSessionsRequest {
    /// Tokens of sessions the router is still tracking.
    pub session_tokens: Vec<String>,
}
