//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions on compact access tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use serde_json::Value;
use session_core::token::SessionToken;

/// JWT header structure
#[derive(Debug, Deserialize)]
struct JwtHeader {
    pub alg: String,
    pub typ: String,
    #[serde(default)]
    pub kid: Option<String>,
}

fn segment(token: &str, index: usize) -> Vec<u8> {
    let part = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("JWT has no segment {}", index));
    URL_SAFE_NO_PAD
        .decode(part)
        .unwrap_or_else(|e| panic!("Failed to base64 decode JWT segment {}: {:?}", index, e))
}

fn header(token: &str) -> JwtHeader {
    serde_json::from_slice(&segment(token, 0)).expect("Failed to parse JWT header")
}

fn claims(token: &str) -> Value {
    serde_json::from_slice(&segment(token, 1)).expect("Failed to parse JWT claims")
}

/// Custom assertions for access tokens
///
/// # Example
/// ```rust,ignore
/// tokens.access_token
///     .assert_valid_jwt()
///     .assert_signed_by("d-28333333")
///     .assert_for_subject("alice");
/// ```
pub trait TokenAssertions {
    fn token_str(&self) -> &str;

    /// Assert EdDSA/JWT header and three segments with JSON header and payload
    fn assert_valid_jwt(&self) -> &Self {
        let token = self.token_str();
        let parts = token.split('.').count();
        assert_eq!(
            parts, 3,
            "JWT must have 3 parts (header.payload.signature), got {}",
            parts
        );

        let header = header(token);
        assert_eq!(header.alg, "EdDSA", "Expected EdDSA algorithm");
        assert_eq!(header.typ, "JWT", "Expected JWT type");

        let claims = claims(token);
        assert!(claims.is_object(), "JWT payload must be a JSON object");
        self
    }

    /// Assert the dynamic key `kid` in the header
    fn assert_signed_by(&self, key_id: &str) -> &Self {
        let header = header(self.token_str());
        assert_eq!(
            header.kid.as_deref(),
            Some(key_id),
            "Expected key_id '{}', got {:?}",
            key_id,
            header.kid
        );
        self
    }

    /// Assert no `kid` header
    fn assert_static_key(&self) -> &Self {
        let header = header(self.token_str());
        assert!(
            header.kid.is_none(),
            "Expected static-key token without kid, got {:?}",
            header.kid
        );
        self
    }

    fn assert_for_subject(&self, subject: &str) -> &Self {
        let claims = claims(self.token_str());
        assert_eq!(
            claims["sub"], subject,
            "Expected subject '{}', got {}",
            subject, claims["sub"]
        );
        self
    }

    fn assert_session_handle(&self, handle: &str) -> &Self {
        let claims = claims(self.token_str());
        assert_eq!(
            claims["sessionHandle"], handle,
            "Expected session handle '{}', got {}",
            handle, claims["sessionHandle"]
        );
        self
    }

    /// Assert `exp - iat` equals `seconds`
    fn assert_lifetime(&self, seconds: i64) -> &Self {
        let claims = claims(self.token_str());
        let iat = claims["iat"].as_i64().expect("iat must be an integer");
        let exp = claims["exp"].as_i64().expect("exp must be an integer");
        assert_eq!(
            exp - iat,
            seconds,
            "Expected token lifetime {} seconds, got {}",
            seconds,
            exp - iat
        );
        self
    }
}

impl TokenAssertions for String {
    fn token_str(&self) -> &str {
        self
    }
}

impl TokenAssertions for SessionToken {
    fn token_str(&self) -> &str {
        self.as_str()
    }
}
