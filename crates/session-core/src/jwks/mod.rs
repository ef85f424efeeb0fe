//! Verification key discovery: wire format, fetch, multi-host resolve, cache.
//!
//! [`KeyFetcher`] talks to one authority host, [`CombinedJwksResolver`] walks
//! the ordered host list, and [`JwksCache`] keeps one shared snapshot per host
//! list with single-flight refresh.

pub mod cache;
pub mod fetcher;
pub mod resolver;

pub use cache::{JwksCache, JwksCacheEntry, JwksCacheStats, JwksCacheStatsSnapshot};
pub use fetcher::{HttpKeyFetcher, KeyFetcher};
pub use resolver::CombinedJwksResolver;

use crate::error::TokenError;
use crate::jwt::decode_ed25519_public_key_jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON Web Key as served by an authority host.
///
/// Every field except `kty` is optional on the wire; [`PublicKeyRecord::from_jwk`]
/// decides whether the combination is usable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kty: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Curve name for OKP keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// Ed25519 public key (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

/// JWKS document (`{"keys": [...]}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// Signature algorithm a published key is used with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    EdDSA,
    RS256,
}

impl KeyAlgorithm {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            KeyAlgorithm::EdDSA => "EdDSA",
            KeyAlgorithm::RS256 => "RS256",
        }
    }

    pub(crate) fn jwt_algorithm(self) -> Algorithm {
        match self {
            KeyAlgorithm::EdDSA => Algorithm::EdDSA,
            KeyAlgorithm::RS256 => Algorithm::RS256,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public key material, base64url-encoded as published.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyMaterial {
    Ed25519 { x: String },
    Rsa { n: String, e: String },
}

/// One usable verification key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicKeyRecord {
    pub kid: String,
    pub algorithm: KeyAlgorithm,
    pub material: KeyMaterial,
}

impl PublicKeyRecord {
    /// Interpret a wire JWK.
    ///
    /// # Errors
    ///
    /// Returns a short reason when the key type/algorithm is unsupported or
    /// required material is missing.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, String> {
        let kid = jwk
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| "missing kid".to_string())?
            .to_string();

        match (jwk.kty.as_str(), jwk.alg.as_deref()) {
            ("OKP", None | Some("EdDSA")) => {
                if let Some(crv) = jwk.crv.as_deref() {
                    if crv != "Ed25519" {
                        return Err(format!("unsupported curve '{crv}'"));
                    }
                }
                let x = jwk.x.clone().ok_or_else(|| "OKP key missing x".to_string())?;
                Ok(Self {
                    kid,
                    algorithm: KeyAlgorithm::EdDSA,
                    material: KeyMaterial::Ed25519 { x },
                })
            }
            ("RSA", None | Some("RS256")) => {
                let (Some(n), Some(e)) = (jwk.n.clone(), jwk.e.clone()) else {
                    return Err("RSA key missing n or e".to_string());
                };
                Ok(Self {
                    kid,
                    algorithm: KeyAlgorithm::RS256,
                    material: KeyMaterial::Rsa { n, e },
                })
            }
            (kty, alg) => Err(format!(
                "unsupported key type '{kty}' with algorithm '{}'",
                alg.unwrap_or("none")
            )),
        }
    }

    /// Wire representation.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        let mut jwk = Jwk {
            kid: Some(self.kid.clone()),
            alg: Some(self.algorithm.as_str().to_string()),
            key_use: Some("sig".to_string()),
            ..Jwk::default()
        };
        match &self.material {
            KeyMaterial::Ed25519 { x } => {
                jwk.kty = "OKP".to_string();
                jwk.crv = Some("Ed25519".to_string());
                jwk.x = Some(x.clone());
            }
            KeyMaterial::Rsa { n, e } => {
                jwk.kty = "RSA".to_string();
                jwk.n = Some(n.clone());
                jwk.e = Some(e.clone());
            }
        }
        jwk
    }

    /// Build the `jsonwebtoken` key for signature verification.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Malformed`] when the published material does not
    /// decode. A key the authority serves broken can't verify anything.
    pub fn decoding_key(&self) -> Result<DecodingKey, TokenError> {
        match &self.material {
            KeyMaterial::Ed25519 { x } => {
                let public_key_bytes = decode_ed25519_public_key_jwk(x).map_err(|e| {
                    tracing::error!(target: "session.token", kid = %self.kid, error = %e, "Invalid public key encoding");
                    TokenError::Malformed("verification key is not decodable".to_string())
                })?;
                Ok(DecodingKey::from_ed_der(&public_key_bytes))
            }
            KeyMaterial::Rsa { n, e } => DecodingKey::from_rsa_components(n, e).map_err(|err| {
                tracing::error!(target: "session.token", kid = %self.kid, error = %err, "Invalid RSA key components");
                TokenError::Malformed("verification key is not decodable".to_string())
            }),
        }
    }
}

/// Keys returned by one successful fetch, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    keys: Vec<PublicKeyRecord>,
}

impl KeySet {
    #[must_use]
    pub fn new(keys: Vec<PublicKeyRecord>) -> Self {
        Self { keys }
    }

    /// Parse a document, skipping keys that are not usable.
    ///
    /// Returns the usable set and the reasons for each skipped key.
    #[must_use]
    pub fn from_document(document: &JwksDocument) -> (Self, Vec<String>) {
        let mut keys = Vec::with_capacity(document.keys.len());
        let mut skipped = Vec::new();
        for jwk in &document.keys {
            match PublicKeyRecord::from_jwk(jwk) {
                Ok(record) => keys.push(record),
                Err(reason) => skipped.push(reason),
            }
        }
        (Self { keys }, skipped)
    }

    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&PublicKeyRecord> {
        self.keys.iter().find(|record| record.kid == kid)
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|record| record.kid.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PublicKeyRecord> {
        self.keys.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn to_document(&self) -> JwksDocument {
        JwksDocument {
            keys: self.keys.iter().map(PublicKeyRecord::to_jwk).collect(),
        }
    }
}
