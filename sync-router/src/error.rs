//! Error types for sync-router.

use std::path::PathBuf;

/// Main error type for sync-router operations.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Trust verification error.
    #[error("trust error: {0}")]
    Trust(#[from] TrustError),

    /// Session registry error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Channel error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Event ordering error.
    #[error("event log error: {0}")]
    EventLog(#[from] sync_core::EventLogError),

    /// The data model was replaced while an event was being applied; the
    /// event landed in the discarded model.
    #[error("data model replaced during apply")]
    ModelReplaced,

    /// Data model persistence error.
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Heartbeat error.
    #[error("heartbeat error: {0}")]
    Heartbeat(#[from] HeartbeatError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Certificate and token verification errors.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// The snapshot holds no key usable for client certificate validation.
    #[error("no trusted issuers for client certificate validation")]
    NoTrustedIssuers,

    /// A certificate could not be parsed.
    #[error("certificate parse failed: {0}")]
    CertificateParse(String),

    /// Chain verification failed.
    #[error("certificate rejected: {0}")]
    CertificateRejected(#[from] rustls::Error),

    /// The verifier could not be built from the trust snapshot.
    #[error("verifier construction failed: {0}")]
    Verifier(String),

    /// The token header carries no key id.
    #[error("token has no key id")]
    MissingKeyId,

    /// No key matches the token's key id with token-validation usage.
    #[error("key not found: {kid}")]
    KeyNotFound {
        /// The key id the token declared.
        kid: String,
    },

    /// The key material cannot be used for signature verification.
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),

    /// Signature or claim validation failed.
    #[error("token rejected: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

/// Session registry errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No API session is known for the token.
    #[error("api session not found")]
    NotFound,

    /// The channel has no bound API session.
    #[error("channel {0} has no bound api session")]
    ChannelNotBound(sync_types::ChannelId),

    /// The replacement session carries no token claims.
    #[error("api session has no token claims")]
    MissingClaims,

    /// The replacement token is not an access token.
    #[error("invalid token type: expected {expected}, got {got}")]
    InvalidTokenType {
        /// Required token type.
        expected: String,
        /// Token type found in the claims.
        got: String,
    },

    /// The replacement token names a different subject.
    #[error("subject mismatch: current {current}, new {new}")]
    SubjectMismatch {
        /// Subject of the bound session.
        current: String,
        /// Subject of the replacement.
        new: String,
    },

    /// The replacement token names a different API session.
    #[error("api session id mismatch: current {current}, new {new}")]
    ApiSessionIdMismatch {
        /// Session id of the bound session.
        current: String,
        /// Session id of the replacement.
        new: String,
    },
}

/// Transport channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel is closed.
    #[error("channel closed")]
    Closed,

    /// Sending failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The message could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] sync_types::SyncError),
}

/// Data model persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Reading or writing the model file failed.
    #[error("model file {path}: {source}")]
    Io {
        /// The model file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The model could not be encoded.
    #[error("model encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// The model file could not be decoded.
    #[error("model decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Heartbeat runner errors.
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    /// The base interval is outside the permitted range.
    #[error("heartbeat interval {0:?} outside [1s, 24h]")]
    IntervalOutOfBounds(std::time::Duration),

    /// An operation interval is outside the permitted range.
    #[error("operation {name} interval {interval:?} outside [1s, 24h]")]
    OperationOutOfBounds {
        /// Operation name.
        name: String,
        /// The rejected interval.
        interval: std::time::Duration,
    },

    /// The runner was already started.
    #[error("heartbeat runner already started")]
    AlreadyStarted,
}

/// Result type alias for router operations.
pub type RouterResult<T> = std::result::Result<T, RouterError>;

/// Result type alias for trust operations.
pub type TrustResult<T> = std::result::Result<T, TrustError>;

/// Result type alias for session operations.
pub type SessionResult<T> = std::result::Result<T, SessionError>;
