//! Error taxonomy for the session layer.
//!
//! Errors are layered the same way the components are:
//!
//! - [`FetchError`] - one authority host failed; the resolver moves on
//! - [`JwksError`] - the cache could not produce any keys
//! - [`TokenError`] - a token could not be issued or verified
//! - [`SessionError`] - what callers of the session operations see
//!
//! Fetch- and cache-layer errors are absorbed wherever stale data or another
//! host can answer instead. Verification errors are always surfaced.

use thiserror::Error;

/// Failure of a single JWKS fetch against one authority host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport failure or non-success HTTP status.
    #[error("JWKS request to {host} failed: {reason}")]
    Network { host: String, reason: String },

    /// Response body was not a usable key set.
    #[error("JWKS document from {host} is invalid: {reason}")]
    Parse { host: String, reason: String },

    /// The host did not answer within the per-host timeout.
    #[error("JWKS request to {host} timed out after {timeout_ms}ms")]
    Timeout { host: String, timeout_ms: u64 },
}

impl FetchError {
    /// The host this failure belongs to.
    #[must_use]
    pub fn host(&self) -> &str {
        match self {
            FetchError::Network { host, .. }
            | FetchError::Parse { host, .. }
            | FetchError::Timeout { host, .. } => host,
        }
    }

    /// Bounded label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network { .. } => "network",
            FetchError::Parse { .. } => "parse",
            FetchError::Timeout { .. } => "timeout",
        }
    }
}

/// Failure to obtain verification keys from the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwksError {
    /// Every configured authority host failed during one resolve attempt.
    #[error("all {attempted} authority hosts failed, last error: {last_error}")]
    AllHostsFailed {
        attempted: usize,
        last_error: FetchError,
    },

    /// A refresh was needed but the rate limit blocked it and nothing is cached.
    #[error("JWKS refresh rate limited and no cached keys are available")]
    RateLimited,

    /// Waited too long for another caller's refresh and nothing is cached.
    #[error("timed out waiting for an in-flight JWKS refresh")]
    LockTimeout,
}

/// Failure to issue or verify an access token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Not a structurally valid token (size, parts, encoding, JSON, claims shape).
    #[error("access token is malformed: {0}")]
    Malformed(String),

    /// Signature did not verify against the resolved key.
    #[error("access token signature is invalid")]
    InvalidSignature,

    /// `exp` is in the past.
    #[error("access token has expired")]
    Expired,

    /// The `kid` header names a key the authority does not publish.
    #[error("access token signed with unknown key id '{0}'")]
    UnknownKeyId(String),

    /// A claim failed validation after the signature check.
    #[error("access token claim '{0}' is invalid")]
    InvalidClaims(&'static str),

    /// Signing failed while issuing a token.
    #[error("failed to sign access token: {0}")]
    Signing(String),

    /// Keys could not be obtained from any authority host.
    #[error("verification keys unavailable: {0}")]
    KeysUnavailable(#[from] JwksError),
}

impl TokenError {
    /// True when the token itself is bad, false for infrastructure failures.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        !matches!(self, TokenError::Signing(_) | TokenError::KeysUnavailable(_))
    }

    /// Bounded label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            TokenError::Malformed(_) => "malformed",
            TokenError::InvalidSignature => "invalid_signature",
            TokenError::Expired => "expired",
            TokenError::UnknownKeyId(_) => "unknown_kid",
            TokenError::InvalidClaims(_) => "invalid_claims",
            TokenError::Signing(_) => "signing",
            TokenError::KeysUnavailable(_) => "keys_unavailable",
        }
    }
}

/// Failure of the session store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("session store error: {0}")]
pub struct StoreError(pub String);

/// Errors returned by the session operations.
///
/// Authentication failures (reject the caller) are distinguishable from
/// infrastructure failures (retry later) via [`SessionError::is_auth_failure`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The session handle was revoked or no longer exists server-side.
    #[error("session has been revoked")]
    Revoked,

    /// Refresh token is unknown, malformed, expired or already rotated.
    #[error("unauthorised: {0}")]
    Unauthorised(String),

    /// A rotated-out refresh token was presented again. The session has been revoked.
    #[error("refresh token reuse detected for session {session_handle}")]
    TokenTheftDetected {
        session_handle: String,
        user_id: String,
    },

    /// The access token payload uses a protected claim name.
    #[error("invalid access token payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// True when the caller should be rejected rather than asked to retry.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        match self {
            SessionError::Token(err) => err.is_auth_failure(),
            SessionError::Revoked
            | SessionError::Unauthorised(_)
            | SessionError::TokenTheftDetected { .. } => true,
            SessionError::InvalidPayload(_) | SessionError::Store(_) => false,
        }
    }

    /// HTTP status code a framework adapter should answer with.
    ///
    /// - 401: any authentication failure
    /// - 400: invalid payload supplied by the application
    /// - 503: keys unavailable
    /// - 500: signing or store failure
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            SessionError::Token(TokenError::KeysUnavailable(_)) => 503,
            SessionError::Token(TokenError::Signing(_)) | SessionError::Store(_) => 500,
            SessionError::InvalidPayload(_) => 400,
            _ => 401,
        }
    }
}

/// Result type alias using [`SessionError`].
pub type Result<T> = std::result::Result<T, SessionError>;
