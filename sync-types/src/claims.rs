//! Claims carried by signed access tokens.

use serde::{Deserialize, Serialize};

/// Token type value for access tokens.
pub const TOKEN_TYPE_ACCESS: &str = "access";

/// The `aud` claim, which may be a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// A single audience.
    One(String),
    /// Several audiences.
    Many(Vec<String>),
}

impl Audience {
    /// Whether the claim names `audience`.
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::One(a) => a == audience,
            Audience::Many(all) => all.iter().any(|a| a == audience),
        }
    }
}

impl Default for Audience {
    fn default() -> Self {
        Audience::Many(Vec::new())
    }
}

/// Claims of an access token issued by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (identity id).
    pub sub: String,
    /// Intended audience.
    #[serde(default)]
    pub aud: Audience,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
    /// Issued-at, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Token id.
    #[serde(default)]
    pub jti: String,
    /// Token type (`"access"` for API session tokens).
    #[serde(rename = "z_t", default)]
    pub token_type: String,
    /// API session the token was issued for.
    #[serde(rename = "z_asid", default)]
    pub api_session_id: String,
    /// Fingerprints of certificates bound to the session.
    #[serde(rename = "z_cfs", default)]
    pub cert_fingerprints: Vec<String>,
}

impl AccessClaims {
    /// Whether the token names `audience`.
    pub fn has_audience(&self, audience: &str) -> bool {
        self.aud.contains(audience)
    }

    /// Whether this is an access token.
    pub fn is_access(&self) -> bool {
        self.token_type == TOKEN_TYPE_ACCESS
    }
}
