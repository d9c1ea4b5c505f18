//! API session records pushed by the controller.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Prefix shared by every compact-serialized JWT (`{"` base64url-encoded).
pub const JWT_TOKEN_PREFIX: &str = "eyJ";

/// Whether a session token is a self-contained bearer token rather than an
/// opaque controller-issued token.
pub fn is_bearer_token(token: &str) -> bool {
    token.starts_with(JWT_TOKEN_PREFIX)
}

/// Lowercase hex SHA-256 fingerprint of a DER certificate.
pub fn certificate_fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// An API session as tracked by the controller.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSessionRecord {
    /// Session id. Ids sort in creation order.
    pub id: String,
    /// Bearer token identifying the session on the data plane.
    pub token: String,
    /// Fingerprints of the certificates the session was authenticated with.
    pub cert_fingerprints: Vec<String>,
}

impl ApiSessionRecord {
    /// Create a record.
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
            cert_fingerprints: Vec::new(),
        }
    }

    /// Add a certificate fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.cert_fingerprints.push(fingerprint.into());
        self
    }
}

impl fmt::Debug for ApiSessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.token.get(..8).unwrap_or(&self.token);
        f.debug_struct("ApiSessionRecord")
            .field("id", &self.id)
            .field("token", &format!("{shown}..."))
            .field("cert_fingerprints", &self.cert_fingerprints)
            .finish()
    }
}
