//! Builder patterns for test data construction
//!
//! Provides fluent APIs for creating access token claims.

use serde_json::{Map, Value};
use session_core::token::{AccessTokenClaims, DEFAULT_TENANT_ID};

/// Builder for access token claims
///
/// Times are unix seconds relative to `now`, which defaults to the real
/// clock; pass the test clock's reading when signing with a `ManualClock`.
///
/// # Example
/// ```rust,ignore
/// let claims = TestClaimsBuilder::at(clock.unix_seconds())
///     .for_user("alice")
///     .with_payload("role", json!("admin"))
///     .expires_in(3600)
///     .build();
/// ```
pub struct TestClaimsBuilder {
    now: i64,
    sub: String,
    session_handle: String,
    tenant_id: String,
    iat: i64,
    exp: i64,
    payload: Map<String, Value>,
}

impl TestClaimsBuilder {
    /// Builder anchored at the real current time.
    pub fn new() -> Self {
        Self::at(chrono::Utc::now().timestamp())
    }

    /// Builder anchored at `now` (unix seconds).
    pub fn at(now: i64) -> Self {
        Self {
            now,
            sub: "test-user".to_string(),
            session_handle: "test-session".to_string(),
            tenant_id: DEFAULT_TENANT_ID.to_string(),
            iat: now,
            exp: now + 3600,
            payload: Map::new(),
        }
    }

    pub fn for_user(mut self, user_id: &str) -> Self {
        self.sub = user_id.to_string();
        self
    }

    pub fn with_session_handle(mut self, handle: &str) -> Self {
        self.session_handle = handle.to_string();
        self
    }

    pub fn for_tenant(mut self, tenant_id: &str) -> Self {
        self.tenant_id = tenant_id.to_string();
        self
    }

    /// Set expiration in seconds from `now` (negative for already expired)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = self.now + seconds;
        self
    }

    /// Set issued-at in seconds from `now`
    pub fn issued_in(mut self, seconds: i64) -> Self {
        self.iat = self.now + seconds;
        self
    }

    pub fn with_payload(mut self, key: &str, value: Value) -> Self {
        self.payload.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> AccessTokenClaims {
        AccessTokenClaims {
            sub: self.sub,
            iat: self.iat,
            exp: self.exp,
            session_handle: self.session_handle,
            refresh_token_hash: "0".repeat(64),
            parent_refresh_token_hash: None,
            tenant_id: self.tenant_id,
            payload: self.payload,
        }
    }
}

impl Default for TestClaimsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
