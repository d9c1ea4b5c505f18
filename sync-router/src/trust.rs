//! Trust store: client certificate and signed token verification.
//!
//! The controller pushes a full set of trusted public keys. Each set is
//! installed as an immutable [`TrustSnapshot`] behind an atomic pointer, so
//! verifications already in flight keep the snapshot they started with
//! while a new one is swapped in.
//!
//! Parsed key material (trust anchors and token decoding keys) is cached per
//! key id inside the snapshot and dropped with it.

use crate::error::{TrustError, TrustResult};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use jsonwebtoken::{DecodingKey, Validation};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, TrustAnchor, UnixTime};
use rustls::server::danger::ClientCertVerifier;
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::sync::Arc;
use std::time::Duration;
use sync_types::{AccessClaims, KeyFormat, KeyUsage, PublicKey};
use x509_parser::prelude::{FromDer, SubjectPublicKeyInfo};

const OID_RSA: &str = "1.2.840.113549.1.1.1";
const OID_EC: &str = "1.2.840.10045.2.1";
const OID_ED25519: &str = "1.3.101.112";

/// An immutable set of trusted keys plus the material parsed from them.
#[derive(Default)]
pub struct TrustSnapshot {
    keys: Vec<PublicKey>,
    anchors: DashMap<String, TrustAnchor<'static>>,
    decoding_keys: DashMap<String, DecodingKey>,
}

impl std::fmt::Debug for TrustSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustSnapshot")
            .field("keys", &self.keys)
            .field("cached_anchors", &self.anchors.len())
            .field("cached_decoding_keys", &self.decoding_keys.len())
            .finish()
    }
}

impl TrustSnapshot {
    /// Create a snapshot over `keys`.
    pub fn new(keys: Vec<PublicKey>) -> Self {
        Self {
            keys,
            anchors: DashMap::new(),
            decoding_keys: DashMap::new(),
        }
    }

    /// The trusted keys.
    pub fn keys(&self) -> &[PublicKey] {
        &self.keys
    }

    /// Number of trusted keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the snapshot trusts nothing.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn anchor(&self, key: &PublicKey) -> TrustResult<TrustAnchor<'static>> {
        if let Some(anchor) = self.anchors.get(&key.kid) {
            return Ok(anchor.clone());
        }

        // Certificate validation keys are always certificates, whatever
        // format they are tagged with.
        let mut single = RootCertStore::empty();
        single
            .add(CertificateDer::from(key.data.clone()))
            .map_err(|e| TrustError::CertificateParse(e.to_string()))?;
        let anchor = single
            .roots
            .pop()
            .ok_or_else(|| TrustError::CertificateParse("empty certificate".into()))?;

        self.anchors.insert(key.kid.clone(), anchor.clone());
        Ok(anchor)
    }

    fn decoding_key(&self, key: &PublicKey) -> TrustResult<DecodingKey> {
        if let Some(decoding) = self.decoding_keys.get(&key.kid) {
            return Ok(decoding.clone());
        }

        let decoding = match key.format {
            KeyFormat::X509CertDer => {
                let (_, cert) = x509_parser::parse_x509_certificate(&key.data)
                    .map_err(|e| TrustError::CertificateParse(e.to_string()))?;
                decoding_key_from_spki(cert.public_key())?
            }
            KeyFormat::PkixPublicKey => {
                let (_, spki) = SubjectPublicKeyInfo::from_der(&key.data)
                    .map_err(|e| TrustError::UnsupportedKey(e.to_string()))?;
                decoding_key_from_spki(&spki)?
            }
        };

        self.decoding_keys.insert(key.kid.clone(), decoding.clone());
        Ok(decoding)
    }
}

fn decoding_key_from_spki(spki: &SubjectPublicKeyInfo<'_>) -> TrustResult<DecodingKey> {
    let algorithm = spki.algorithm.algorithm.to_id_string();
    let raw: &[u8] = &spki.subject_public_key.data;

    match algorithm.as_str() {
        OID_RSA => Ok(DecodingKey::from_rsa_der(raw)),
        OID_EC => Ok(DecodingKey::from_ec_der(raw)),
        OID_ED25519 => Ok(DecodingKey::from_ed_der(raw)),
        other => Err(TrustError::UnsupportedKey(format!(
            "unsupported public key algorithm {other}"
        ))),
    }
}

/// Holds the current trust snapshot and verifies against it.
pub struct TrustStore {
    current: ArcSwap<TrustSnapshot>,
    provider: Arc<CryptoProvider>,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("keys", &self.current.load().len())
            .finish_non_exhaustive()
    }
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustStore {
    /// Create a store that trusts nothing.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(TrustSnapshot::default()),
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    /// Replace the trusted key set.
    pub fn install(&self, keys: Vec<PublicKey>) {
        tracing::debug!("Installing trust snapshot with {} keys", keys.len());
        self.current.store(Arc::new(TrustSnapshot::new(keys)));
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<TrustSnapshot> {
        self.current.load_full()
    }

    /// Verify a DER client certificate against every key trusted for client
    /// certificate validation.
    ///
    /// The certificate's own not-before time is used as the verification
    /// clock, so a freshly issued certificate is accepted despite clock skew.
    pub fn verify_client_certificate(&self, der: &[u8]) -> TrustResult<()> {
        let snapshot = self.snapshot();

        let mut roots = RootCertStore::empty();
        for key in snapshot
            .keys()
            .iter()
            .filter(|k| k.allows(KeyUsage::ClientX509CertValidation))
        {
            match snapshot.anchor(key) {
                Ok(anchor) => roots.roots.push(anchor),
                Err(e) => {
                    tracing::error!("Could not parse certificate data for kid {}: {}", key.kid, e);
                }
            }
        }

        if roots.is_empty() {
            return Err(TrustError::NoTrustedIssuers);
        }

        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| TrustError::CertificateParse(e.to_string()))?;
        let not_before = cert.validity().not_before.timestamp();
        let now = UnixTime::since_unix_epoch(Duration::from_secs(not_before.max(0) as u64));

        let verifier = WebPkiClientVerifier::builder_with_provider(
            Arc::new(roots),
            Arc::clone(&self.provider),
        )
        .build()
        .map_err(|e| TrustError::Verifier(e.to_string()))?;

        let end_entity = CertificateDer::from(der);
        verifier.verify_client_cert(&end_entity, &[], now)?;
        Ok(())
    }

    /// Verify a signed token and return its claims.
    ///
    /// The signing key is the snapshot key whose id matches the token's
    /// `kid` header and which is trusted for token validation. Anything else
    /// fails with [`TrustError::KeyNotFound`].
    pub fn verify_signed_token(&self, token: &str) -> TrustResult<AccessClaims> {
        let header = jsonwebtoken::decode_header(token)?;
        let kid = header
            .kid
            .as_deref()
            .map(str::trim)
            .ok_or(TrustError::MissingKeyId)?;

        let snapshot = self.snapshot();
        let key = snapshot
            .keys()
            .iter()
            .find(|k| k.kid == kid && k.allows(KeyUsage::JwtValidation))
            .ok_or_else(|| TrustError::KeyNotFound {
                kid: kid.to_string(),
            })?;
        let decoding = snapshot.decoding_key(key)?;

        let mut validation = Validation::new(header.alg);
        // Audience is a policy decision made by the caller.
        validation.validate_aud = false;

        let data = jsonwebtoken::decode::<AccessClaims>(token, &decoding, &validation)?;
        Ok(data.claims)
    }
}
