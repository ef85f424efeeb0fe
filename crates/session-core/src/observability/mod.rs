//! Observability helpers for the session layer.
//!
//! # Privacy by Default
//!
//! Async entry points use `#[instrument(skip_all)]` and add fields explicitly.
//! Fields fall into three groups:
//! - **SAFE**: logged as-is (key ids, host URLs, outcome labels)
//! - **HASHED**: SHA-256 prefix via [`hash_for_correlation`] (user ids, session handles)
//! - **NEVER**: tokens, refresh tokens, the master secret

pub mod metrics;

use ring::digest;

/// Hash a value for log correlation (SHA-256, first 8 hex chars).
///
/// One-way and truncated: enough to follow one session through the logs
/// without writing its handle or user id in plaintext.
#[must_use]
pub fn hash_for_correlation(value: &str) -> String {
    let digest = digest::digest(&digest::SHA256, value.as_bytes());
    hex::encode(digest.as_ref().get(..4).unwrap_or_default())
}
