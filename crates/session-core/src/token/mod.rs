//! Session access tokens: claims, issued tokens, verification results.

pub mod claims;
pub mod codec;

pub use claims::{validate_payload, AccessTokenClaims, DEFAULT_TENANT_ID, PROTECTED_CLAIMS};
pub use codec::SessionTokenCodec;

use std::fmt;

/// Which key signs (or signed) a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningMode {
    /// Long-lived static key, no `kid` header.
    Static,
    /// Time-rotated key identified by `kid`.
    Dynamic,
}

impl SigningMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SigningMode::Static => "static",
            SigningMode::Dynamic => "dynamic",
        }
    }
}

/// A signed access token as handed to the client.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    token: String,
    key_id: Option<String>,
    expires_at: i64,
}

impl SessionToken {
    pub(crate) fn new(token: String, key_id: Option<String>, expires_at: i64) -> Self {
        Self {
            token,
            key_id,
            expires_at,
        }
    }

    /// Compact JWS.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.token
    }

    /// `kid` header, `None` for static-key tokens.
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Expiry (unix seconds).
    #[must_use]
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("token", &"[REDACTED]")
            .field("key_id", &self.key_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Claims that passed signature and claim validation.
///
/// Produced fresh on every verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaims {
    pub claims: AccessTokenClaims,
    pub key_id: Option<String>,
    pub signing_mode: SigningMode,
}

impl VerifiedClaims {
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.claims.sub
    }

    #[must_use]
    pub fn session_handle(&self) -> &str {
        &self.claims.session_handle
    }
}
