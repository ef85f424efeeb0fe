//! Deterministic cryptographic fixtures for testing
//!
//! Provides a fixed master secret, key rings derived from it, and "foreign"
//! Ed25519 keys that no ring derives (for wrong-signer tests).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::EncodingKey;
use ring::signature::{Ed25519KeyPair, KeyPair};
use secrecy::SecretString;
use session_core::config::SigningKeyConfig;
use session_core::jwks::Jwk;
use session_core::keys::SigningKeyRing;
use std::time::Duration;
use thiserror::Error;

/// Base64 of the 32 bytes 0x00..=0x1f. Never use outside tests.
pub const TEST_MASTER_SECRET: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

/// A second, unrelated master secret (0x20..=0x3f).
pub const OTHER_MASTER_SECRET: &str = "ICEiIyQlJicoKSorLC0uLzAxMjM0NTY3ODk6Ozw9Pj8=";

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// The fixed test master secret.
pub fn test_master_secret() -> SecretString {
    SecretString::from(TEST_MASTER_SECRET)
}

/// Signing config over the test master secret.
///
/// # Example
/// ```rust,ignore
/// let ring = test_key_ring(test_signing_config(Duration::from_millis(1500), 8));
/// ```
pub fn test_signing_config(update_interval: Duration, key_history: u32) -> SigningKeyConfig {
    SigningKeyConfig::new(test_master_secret())
        .expect("test master secret is valid")
        .with_update_interval(update_interval)
        .with_key_history(key_history)
}

/// Key ring for a signing config.
pub fn test_key_ring(config: SigningKeyConfig) -> SigningKeyRing {
    SigningKeyRing::new(&config).expect("test signing config is valid")
}

/// Ed25519 key outside any ring: the signing key and its public JWK.
///
/// The same seed always produces the same keypair.
pub fn foreign_signing_key(seed: u8, kid: &str) -> Result<(EncodingKey, Jwk), FixtureError> {
    let mut seed_bytes = [0u8; 32];
    for (i, byte) in seed_bytes.iter_mut().enumerate() {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(0xa5 ^ i as u8);
    }

    let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e)))?;

    let jwk = Jwk {
        kty: "OKP".to_string(),
        kid: Some(kid.to_string()),
        alg: Some("EdDSA".to_string()),
        key_use: Some("sig".to_string()),
        crv: Some("Ed25519".to_string()),
        x: Some(URL_SAFE_NO_PAD.encode(key_pair.public_key().as_ref())),
        ..Jwk::default()
    };

    Ok((EncodingKey::from_ed_der(&build_pkcs8_from_seed(&seed_bytes)), jwk))
}

/// Build PKCS#8 v1 document from Ed25519 seed
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);

    // SEQUENCE, version 0, AlgorithmIdentifier (OID 1.3.101.112)
    pkcs8.extend_from_slice(&[0x30, 0x2e, 0x02, 0x01, 0x00]);
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // OCTET STRING wrapping OCTET STRING with the seed
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}
