//! Signing key ring: the private-key side of session tokens.
//!
//! All keys are Ed25519 and derived deterministically from one master secret,
//! so every process holding the secret (this one and the authority hosts)
//! agrees on them without exchanging private material:
//!
//! ```text
//! seed = HMAC-SHA256(master_secret, label)      label = "static" | "d-<index>"
//! index = (unix_ms - epoch_ms) / update_interval_ms
//! ```
//!
//! Rotation is therefore a pure function of time. An authority publishes the
//! current dynamic key and `key_history - 1` predecessors; anything older is
//! pruned from the document.

use crate::config::{decode_master_secret, ConfigError, SigningKeyConfig};
use crate::error::TokenError;
use crate::jwks::{JwksDocument, KeyAlgorithm, KeyMaterial, KeySet, PublicKeyRecord};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::EncodingKey;
use ring::hmac;
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::fmt;

/// Prefix of dynamic key ids.
pub const DYNAMIC_KEY_PREFIX: &str = "d-";

/// Derivation label of the static key.
const STATIC_KEY_LABEL: &str = "static";

/// Ed25519 signing key with its public half.
#[derive(Clone)]
pub struct SigningKey {
    label: String,
    encoding_key: EncodingKey,
    public_key: Vec<u8>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("label", &self.label)
            .field("encoding_key", &"[REDACTED]")
            .finish()
    }
}

impl SigningKey {
    fn derive(master: &hmac::Key, label: &str) -> Result<Self, TokenError> {
        let tag = hmac::sign(master, label.as_bytes());
        let seed: [u8; 32] = tag
            .as_ref()
            .try_into()
            .map_err(|_| TokenError::Signing("derived seed has wrong length".to_string()))?;

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed)
            .map_err(|e| TokenError::Signing(format!("invalid derived seed: {e}")))?;
        let public_key = key_pair.public_key().as_ref().to_vec();
        let pkcs8 = build_pkcs8_from_seed(&seed);

        Ok(Self {
            label: label.to_string(),
            encoding_key: EncodingKey::from_ed_der(&pkcs8),
            public_key,
        })
    }

    /// Derivation label: `static` or the dynamic key id.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Key id to put in the JWT header. `None` for the static key.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.label
            .starts_with(DYNAMIC_KEY_PREFIX)
            .then_some(self.label.as_str())
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Raw 32-byte Ed25519 public key.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Public key record as an authority would publish it.
    #[must_use]
    pub fn public_record(&self) -> PublicKeyRecord {
        PublicKeyRecord {
            kid: self.label.clone(),
            algorithm: KeyAlgorithm::EdDSA,
            material: KeyMaterial::Ed25519 {
                x: URL_SAFE_NO_PAD.encode(&self.public_key),
            },
        }
    }
}

/// Build a PKCS#8 v1 document from an Ed25519 seed.
///
/// `jsonwebtoken` accepts Ed25519 private keys only as PKCS#8 DER.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);

    // SEQUENCE, 46 bytes
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    // version INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // AlgorithmIdentifier SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // privateKey OCTET STRING { OCTET STRING seed }
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}

/// Derives the static key and time-indexed dynamic keys.
pub struct SigningKeyRing {
    master: hmac::Key,
    static_key: SigningKey,
    update_interval_ms: i64,
    key_history: u32,
    epoch_ms: i64,
}

impl fmt::Debug for SigningKeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyRing")
            .field("master", &"[REDACTED]")
            .field("update_interval_ms", &self.update_interval_ms)
            .field("key_history", &self.key_history)
            .field("epoch_ms", &self.epoch_ms)
            .finish()
    }
}

impl SigningKeyRing {
    /// Build the ring from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the master secret is invalid or the update
    /// interval / key history is zero.
    pub fn new(config: &SigningKeyConfig) -> Result<Self, ConfigError> {
        let master_bytes = decode_master_secret(&config.master_secret)?;
        let master = hmac::Key::new(hmac::HMAC_SHA256, &master_bytes);

        let update_interval_ms = i64::try_from(config.update_interval.as_millis())
            .ok()
            .filter(|ms| *ms > 0)
            .ok_or_else(|| {
                ConfigError::InvalidDuration(
                    "dynamic signing key update interval must be at least 1ms".to_string(),
                )
            })?;
        if config.key_history == 0 {
            return Err(ConfigError::InvalidKeyHistory(
                "key history must be greater than 0".to_string(),
            ));
        }

        let static_key = SigningKey::derive(&master, STATIC_KEY_LABEL)
            .map_err(|e| ConfigError::InvalidMasterSecret(e.to_string()))?;

        Ok(Self {
            master,
            static_key,
            update_interval_ms,
            key_history: config.key_history,
            epoch_ms: config.epoch_ms,
        })
    }

    #[must_use]
    pub fn static_key(&self) -> &SigningKey {
        &self.static_key
    }

    /// Rotation index at `unix_ms`.
    #[must_use]
    pub fn key_index_at(&self, unix_ms: i64) -> i64 {
        unix_ms
            .saturating_sub(self.epoch_ms)
            .div_euclid(self.update_interval_ms)
    }

    /// Dynamic key id in effect at `unix_ms`.
    #[must_use]
    pub fn key_id_at(&self, unix_ms: i64) -> String {
        format!("{DYNAMIC_KEY_PREFIX}{}", self.key_index_at(unix_ms))
    }

    /// Dynamic key in effect at `unix_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Signing`] if key derivation fails.
    pub fn dynamic_key_at(&self, unix_ms: i64) -> Result<SigningKey, TokenError> {
        self.dynamic_key(&self.key_id_at(unix_ms))
    }

    /// Dynamic key by id (`d-<index>`).
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::UnknownKeyId`] when `kid` is not a dynamic key id.
    pub fn dynamic_key(&self, kid: &str) -> Result<SigningKey, TokenError> {
        kid.strip_prefix(DYNAMIC_KEY_PREFIX)
            .and_then(|index| index.parse::<i64>().ok())
            .ok_or_else(|| TokenError::UnknownKeyId(kid.to_string()))?;
        SigningKey::derive(&self.master, kid)
    }

    /// Keys an authority publishes at `unix_ms`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Signing`] if key derivation fails.
    pub fn published_keys_at(&self, unix_ms: i64) -> Result<KeySet, TokenError> {
        let current = self.key_index_at(unix_ms);
        let records = (0..i64::from(self.key_history))
            .map(|age| {
                let kid = format!("{DYNAMIC_KEY_PREFIX}{}", current.saturating_sub(age));
                self.dynamic_key(&kid).map(|key| key.public_record())
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(KeySet::new(records))
    }

    /// JWKS document an authority serves at `unix_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Signing`] if key derivation fails.
    pub fn published_jwks_at(&self, unix_ms: i64) -> Result<JwksDocument, TokenError> {
        Ok(self.published_keys_at(unix_ms)?.to_document())
    }
}
