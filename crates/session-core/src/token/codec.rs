//! Access token signing and verification.
//!
//! # Verification order
//!
//! 1. Size and structure, header parse ([`jwt::inspect`])
//! 2. `exp` against the injected clock, before any key lookup, so expired
//!    tokens never cause a JWKS fetch
//! 3. Key lookup: no `kid` means the static key; otherwise the JWKS cache, with
//!    exactly one forced refresh when the `kid` is unknown
//! 4. Signature, with the algorithm of the resolved key
//! 5. `iat` clock skew, non-empty `sub` and `sessionHandle`

use crate::clock::Clock;
use crate::config::AuthorityHosts;
use crate::error::TokenError;
use crate::jwks::{JwksCache, PublicKeyRecord};
use crate::jwt::{self, DEFAULT_CLOCK_SKEW};
use crate::keys::SigningKeyRing;
use crate::observability::metrics;
use crate::token::{validate_payload, AccessTokenClaims, SessionToken, SigningMode, VerifiedClaims};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, Header, Validation};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Signs and verifies session access tokens.
pub struct SessionTokenCodec {
    keys: Arc<SigningKeyRing>,
    cache: Arc<JwksCache>,
    hosts: AuthorityHosts,
    clock: Arc<dyn Clock>,
    clock_skew: Duration,
}

impl std::fmt::Debug for SessionTokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokenCodec")
            .field("hosts", &self.hosts)
            .field("clock_skew", &self.clock_skew)
            .finish_non_exhaustive()
    }
}

impl SessionTokenCodec {
    #[must_use]
    pub fn new(
        keys: Arc<SigningKeyRing>,
        cache: Arc<JwksCache>,
        hosts: AuthorityHosts,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            keys,
            cache,
            hosts,
            clock,
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }

    #[must_use]
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Sign `claims` as an EdDSA JWS.
    ///
    /// Dynamic mode uses the key in effect now and sets `kid`; static mode
    /// omits `kid`.
    ///
    /// # Errors
    ///
    /// - [`TokenError::InvalidClaims`] if the payload uses a protected claim name
    /// - [`TokenError::Signing`] if key derivation or signing fails
    pub fn encode(
        &self,
        claims: &AccessTokenClaims,
        mode: SigningMode,
    ) -> Result<SessionToken, TokenError> {
        if let Err(name) = validate_payload(&claims.payload) {
            debug!(target: "session.token", claim = %name, "Payload uses protected claim name");
            return Err(TokenError::InvalidClaims("payload"));
        }

        let dynamic_key;
        let key = match mode {
            SigningMode::Static => self.keys.static_key(),
            SigningMode::Dynamic => {
                dynamic_key = self.keys.dynamic_key_at(self.clock.unix_millis())?;
                &dynamic_key
            }
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = key.kid().map(ToString::to_string);

        let token = encode(&header, claims, key.encoding_key())
            .map_err(|e| TokenError::Signing(format!("JWT signing operation failed: {e}")))?;

        metrics::record_token_issued(mode.as_str());
        debug!(target: "session.token", mode = mode.as_str(), kid = ?header.kid, "Access token signed");

        Ok(SessionToken::new(token, header.kid, claims.exp))
    }

    /// Verify a compact JWS and return its claims.
    ///
    /// # Errors
    ///
    /// - [`TokenError::Malformed`] for structural problems
    /// - [`TokenError::Expired`] when `exp` has passed, whatever the signature
    /// - [`TokenError::UnknownKeyId`] when the `kid` is still unknown after one forced refresh
    /// - [`TokenError::InvalidSignature`] when the signature or algorithm does not match
    /// - [`TokenError::InvalidClaims`] for `iat` in the future or empty identifiers
    /// - [`TokenError::KeysUnavailable`] when no keys can be obtained, including
    ///   when the forced refresh for an unknown `kid` fails
    #[instrument(skip_all)]
    pub async fn decode_and_verify(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        let started = Instant::now();
        let result = self.verify(token).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_token_verification(outcome, started.elapsed());
        if let Err(e) = &result {
            debug!(target: "session.token", outcome = outcome, error = %e, "Access token rejected");
        }

        result
    }

    async fn verify(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        let unverified = jwt::inspect(token)?;
        jwt::validate_exp_at(unverified.exp, self.clock.unix_seconds())?;

        let (record, signing_mode) = match unverified.kid.as_deref() {
            None => (self.keys.static_key().public_record(), SigningMode::Static),
            Some(kid) => (self.resolve_key(kid).await?, SigningMode::Dynamic),
        };

        let algorithm = record.algorithm.jwt_algorithm();
        if unverified.alg.parse::<Algorithm>().ok() != Some(algorithm) {
            debug!(target: "session.token", alg = %unverified.alg, "Header alg does not match key");
            return Err(TokenError::InvalidSignature);
        }

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        let decoding_key = record.decoding_key()?;
        let claims = decode::<AccessTokenClaims>(token, &decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::InvalidSignature
                }
                _ => TokenError::Malformed(format!("token could not be decoded: {e}")),
            })?
            .claims;

        jwt::validate_iat_at(claims.iat, self.clock_skew, self.clock.unix_seconds())?;
        if claims.sub.is_empty() {
            return Err(TokenError::InvalidClaims("sub"));
        }
        if claims.session_handle.is_empty() {
            return Err(TokenError::InvalidClaims("sessionHandle"));
        }

        Ok(VerifiedClaims {
            claims,
            key_id: unverified.kid,
            signing_mode,
        })
    }

    async fn resolve_key(&self, kid: &str) -> Result<PublicKeyRecord, TokenError> {
        let keys = self.cache.get_keys(&self.hosts).await?;
        if let Some(record) = keys.get(kid) {
            return Ok(record.clone());
        }

        debug!(target: "session.token", kid = %kid, "Unknown kid, forcing JWKS refresh");
        let refreshed = self
            .cache
            .get_keys_after_unknown_kid(&self.hosts, &keys)
            .await?;
        refreshed
            .get(kid)
            .cloned()
            .ok_or_else(|| TokenError::UnknownKeyId(kid.to_string()))
    }
}
