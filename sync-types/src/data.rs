//! Data-state model changes streamed from the controller.
//!
//! The controller publishes every mutation of the router data model as a
//! [`DataEvent`] with a strictly increasing index. Entity payloads (identities,
//! services, policies) are opaque here; only public keys are interpreted,
//! because they feed certificate and token verification.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::EventIndex;

/// Encoding of a trusted public key's `data` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyFormat {
    /// A DER-encoded X.509 certificate.
    X509CertDer,
    /// A DER-encoded SubjectPublicKeyInfo.
    PkixPublicKey,
}

/// What a trusted public key may be used to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyUsage {
    /// Issuer of client certificates presented to the router.
    ClientX509CertValidation,
    /// Signer of bearer tokens.
    JwtValidation,
}

/// A trusted public key published by the controller.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    /// Key identifier (matches the `kid` header of signed tokens).
    pub kid: String,
    /// Encoded key material, interpreted according to `format`.
    pub data: Vec<u8>,
    /// Encoding of `data`.
    pub format: KeyFormat,
    /// Permitted usages.
    pub usages: Vec<KeyUsage>,
}

impl PublicKey {
    /// Whether this key is authorized for the given usage.
    pub fn allows(&self, usage: KeyUsage) -> bool {
        self.usages.contains(&usage)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("kid", &self.kid)
            .field("format", &self.format)
            .field("usages", &self.usages)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// An opaque model entity (identity, service, policy, posture check...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity kind, e.g. `"identity"` or `"service"`.
    pub kind: String,
    /// Entity id, unique within its kind.
    pub id: String,
    /// Opaque encoded entity body.
    pub data: Vec<u8>,
}

/// The kind of mutation a [`DataEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAction {
    /// The subject did not exist before.
    Create,
    /// The subject replaces an existing value.
    Update,
    /// The subject is removed.
    Delete,
}

/// The subject of a [`DataEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelChange {
    /// A trusted public key.
    PublicKey(PublicKey),
    /// Any other model entity.
    Entity(Entity),
}

/// A single ordered data-state event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataEvent {
    /// Position in the controller's event stream.
    pub index: EventIndex,
    /// Mutation kind.
    pub action: ChangeAction,
    /// Mutated subject.
    pub change: ModelChange,
}

impl DataEvent {
    /// Create an event.
    pub fn new(index: u64, action: ChangeAction, change: ModelChange) -> Self {
        Self {
            index: EventIndex::new(index),
            action,
            change,
        }
    }

    /// Whether applying this event changes the trusted key set.
    pub fn touches_trust(&self) -> bool {
        matches!(self.change, ModelChange::PublicKey(_))
    }
}
