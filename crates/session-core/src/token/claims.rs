//! Access token claims.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Claim names the session layer owns. Application payloads may not use them.
pub const PROTECTED_CLAIMS: &[&str] = &[
    "sub",
    "iat",
    "exp",
    "sessionHandle",
    "refreshTokenHash1",
    "parentRefreshTokenHash1",
    "tId",
    "antiCsrfToken",
];

/// Tenant used when none is given.
pub const DEFAULT_TENANT_ID: &str = "public";

fn default_tenant_id() -> String {
    DEFAULT_TENANT_ID.to_string()
}

/// Claims carried by a session access token.
///
/// The signing key id lives in the JWT header, not here. Application data is
/// flattened into the top level of the payload next to the reserved claims.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// User id - redacted in Debug output.
    pub sub: String,

    /// Issued-at (unix seconds).
    pub iat: i64,

    /// Expiry (unix seconds).
    pub exp: i64,

    #[serde(rename = "sessionHandle")]
    pub session_handle: String,

    /// SHA-256 (hex) of the refresh token current when this token was issued.
    #[serde(rename = "refreshTokenHash1")]
    pub refresh_token_hash: String,

    /// Hash of the refresh token that was rotated out to issue this token.
    #[serde(
        rename = "parentRefreshTokenHash1",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_refresh_token_hash: Option<String>,

    #[serde(rename = "tId", default = "default_tenant_id")]
    pub tenant_id: String,

    /// Application payload.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl fmt::Debug for AccessTokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenClaims")
            .field("sub", &"[REDACTED]")
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .field("tenant_id", &self.tenant_id)
            .field("payload_keys", &self.payload.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Reject a payload that uses a protected claim name.
///
/// # Errors
///
/// Returns the first offending key.
pub fn validate_payload(payload: &Map<String, Value>) -> Result<(), String> {
    match PROTECTED_CLAIMS.iter().find(|name| payload.contains_key(**name)) {
        Some(name) => Err((*name).to_string()),
        None => Ok(()),
    }
}
