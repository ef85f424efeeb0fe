//! Structural JWT helpers used before and after signature verification.
//!
//! - Size limits for DoS prevention
//! - Clock skew constants for iat validation
//! - Unverified header/expiry inspection
//! - iat validation logic
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Nothing returned by [`inspect`] is trusted; it only selects the key and
//!   short-circuits tokens that are already expired
//! - Token contents are never logged

use crate::error::TokenError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Oversized tokens are rejected before base64 decoding or any cryptographic
/// work. Session tokens with a modest custom payload stay well below this.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default JWT clock skew tolerance (5 minutes).
///
/// Tokens with `iat` more than this amount in the future are rejected.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Unverified inspection
// =============================================================================

/// What can be read from a token before its signature is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnverifiedToken {
    /// `kid` header, `None` for static-key tokens.
    pub kid: Option<String>,
    /// `alg` header as written by the issuer.
    pub alg: String,
    /// `exp` claim (unix seconds).
    pub exp: i64,
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

#[derive(Deserialize)]
struct RawExpiry {
    exp: i64,
}

/// Read the header and `exp` of a compact JWS without verifying it.
///
/// # Errors
///
/// Returns [`TokenError::Malformed`] when the token is oversized, does not have
/// three parts, or its header/payload are not base64url JSON, or when `exp`
/// is missing or not an integer. An empty `kid` is treated as malformed rather
/// than as a static-key token.
pub fn inspect(token: &str) -> Result<UnverifiedToken, TokenError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "session.token",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(TokenError::Malformed("token too large".to_string()));
    }

    let mut parts = token.split('.');
    let (Some(header_part), Some(payload_part), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed(
            "expected three dot-separated parts".to_string(),
        ));
    };

    let header: RawHeader = decode_segment(header_part, "header")?;
    if header.kid.as_deref() == Some("") {
        return Err(TokenError::Malformed("empty kid header".to_string()));
    }
    let expiry: RawExpiry = decode_segment(payload_part, "payload")?;

    Ok(UnverifiedToken {
        kid: header.kid,
        alg: header.alg,
        exp: expiry.exp,
    })
}

fn decode_segment<T: for<'de> Deserialize<'de>>(
    segment: &str,
    name: &str,
) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "session.token", segment = name, error = %e, "Failed to decode JWT base64");
        TokenError::Malformed(format!("{name} is not base64url"))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "session.token", segment = name, error = %e, "Failed to parse JWT JSON");
        TokenError::Malformed(format!("{name} is not valid JSON"))
    })
}

// =============================================================================
// Claim checks
// =============================================================================

/// Reject tokens whose `exp` is at or before `now` (unix seconds).
///
/// # Errors
///
/// Returns [`TokenError::Expired`].
pub fn validate_exp_at(exp: i64, now: i64) -> Result<(), TokenError> {
    if exp <= now {
        tracing::debug!(target: "session.token", exp = exp, now = now, "Token rejected: expired");
        return Err(TokenError::Expired);
    }
    Ok(())
}

/// Reject tokens whose `iat` is more than `clock_skew` ahead of `now`.
///
/// # Errors
///
/// Returns [`TokenError::InvalidClaims`] naming `iat`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), TokenError> {
    let clock_skew_secs = i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX);
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "session.token",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(TokenError::InvalidClaims("iat"));
    }

    Ok(())
}

/// Decode an Ed25519 public key from a JWK `x` field (base64url, no padding).
///
/// # Errors
///
/// Returns `base64::DecodeError` if the value is not base64url.
pub fn decode_ed25519_public_key_jwk(x_b64url: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(x_b64url)
}

// =============================================================================
// Tests
// =============================================================================
