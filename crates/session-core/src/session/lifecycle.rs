//! Session create / verify / refresh / revoke.
//!
//! Access tokens are stateless and verified against keys alone. Refresh tokens
//! are opaque, stored only as SHA-256 hashes, and rotated on every refresh.
//! Presenting a rotated-out refresh token again is treated as theft and
//! revokes the session.
//!
//! Revocation does not invalidate access tokens already issued; they stay
//! valid until `exp` unless verification is asked to check the store.

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, LifecycleConfig, SessionConfig};
use crate::error::{Result, SessionError, TokenError};
use crate::jwks::JwksCache;
use crate::keys::SigningKeyRing;
use crate::observability::{hash_for_correlation, metrics};
use crate::secret::{ExposeSecret, SecretString};
use crate::session::store::{InMemorySessionStore, SessionRecord, SessionStore};
use crate::token::{
    validate_payload, AccessTokenClaims, SessionToken, SessionTokenCodec, SigningMode,
    VerifiedClaims, DEFAULT_TENANT_ID,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Random bytes in a refresh token.
const REFRESH_TOKEN_RANDOM_BYTES: usize = 32;

/// Opaque refresh token: `<random base64url>.<session handle>`.
#[derive(Clone)]
pub struct RefreshToken(SecretString);

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshToken([REDACTED])")
    }
}

impl RefreshToken {
    fn generate(session_handle: &str, rng: &SystemRandom) -> Result<Self> {
        let mut random = [0u8; REFRESH_TOKEN_RANDOM_BYTES];
        rng.fill(&mut random)
            .map_err(|_| TokenError::Signing("random generation failed".to_string()))?;
        Ok(Self(SecretString::from(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(random),
            session_handle
        ))))
    }

    /// The token string to hand to the client.
    #[must_use]
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Session handle embedded in a presented token, if well-formed.
    #[must_use]
    pub fn session_handle_of(raw: &str) -> Option<&str> {
        let (random, handle) = raw.split_once('.')?;
        (!random.is_empty() && !handle.is_empty()).then_some(handle)
    }

    /// SHA-256 (hex) of a refresh token string.
    #[must_use]
    pub fn hash(raw: &str) -> String {
        hex::encode(digest::digest(&digest::SHA256, raw.as_bytes()))
    }
}

/// Everything handed to the client when a session is created or refreshed.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: SessionToken,
    pub refresh_token: RefreshToken,
    pub session_handle: String,
}

/// Options for [`SessionLifecycle::verify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Also require the session row to exist and not be revoked.
    pub check_store: bool,
}

impl VerifyOptions {
    #[must_use]
    pub fn check_store() -> Self {
        Self { check_store: true }
    }
}

/// Session operations over a token codec and a session store.
pub struct SessionLifecycle {
    codec: Arc<SessionTokenCodec>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    rng: SystemRandom,
}

impl fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("codec", &self.codec)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionLifecycle {
    #[must_use]
    pub fn new(
        codec: Arc<SessionTokenCodec>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            codec,
            store,
            clock,
            config,
            rng: SystemRandom::new(),
        }
    }

    /// Wire a lifecycle from configuration: HTTP JWKS cache, system clock,
    /// in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the signing configuration is invalid.
    pub fn from_config(config: &SessionConfig) -> std::result::Result<Self, ConfigError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = Arc::new(JwksCache::with_http(config.jwks.clone()));
        Self::from_parts(config, cache, Arc::new(InMemorySessionStore::new()), clock)
    }

    /// Wire a lifecycle from configuration with caller-supplied cache, store and clock.
    ///
    /// Share one [`JwksCache`] across everything in the process that verifies
    /// tokens for the same authority.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the signing configuration is invalid.
    pub fn from_parts(
        config: &SessionConfig,
        cache: Arc<JwksCache>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        let keys = Arc::new(SigningKeyRing::new(&config.signing)?);
        let codec = SessionTokenCodec::new(
            keys,
            cache,
            config.authority_hosts.clone(),
            Arc::clone(&clock),
        )
        .with_clock_skew(config.lifecycle.clock_skew);
        Ok(Self::new(
            Arc::new(codec),
            store,
            clock,
            config.lifecycle.clone(),
        ))
    }

    #[must_use]
    pub fn codec(&self) -> &SessionTokenCodec {
        &self.codec
    }

    fn signing_mode(&self) -> SigningMode {
        if self.config.use_dynamic_signing_key {
            SigningMode::Dynamic
        } else {
            SigningMode::Static
        }
    }

    fn issue_access_token(
        &self,
        record: &SessionRecord,
        parent_refresh_token_hash: Option<String>,
    ) -> Result<SessionToken> {
        let now = self.clock.unix_seconds();
        let validity = i64::try_from(self.config.access_token_validity.as_secs()).unwrap_or(i64::MAX);
        let claims = AccessTokenClaims {
            sub: record.user_id.clone(),
            iat: now,
            exp: now.saturating_add(validity),
            session_handle: record.session_handle.clone(),
            refresh_token_hash: record.refresh_token_hash.clone(),
            parent_refresh_token_hash,
            tenant_id: record.tenant_id.clone(),
            payload: record.access_token_payload.clone(),
        };
        Ok(self.codec.encode(&claims, self.signing_mode())?)
    }

    fn refresh_expiry_from(&self, now_ms: i64) -> i64 {
        let validity_ms =
            i64::try_from(self.config.refresh_token_validity.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_add(validity_ms)
    }

    /// Start a session for `user_id`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidPayload`] for an empty user id or a payload
    ///   that uses a protected claim name
    /// - [`SessionError::Token`] if signing fails
    /// - [`SessionError::Store`] if the row cannot be written
    #[instrument(skip_all)]
    pub async fn create(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        payload: Map<String, Value>,
    ) -> Result<SessionTokens> {
        let result = self.create_inner(user_id, tenant_id, payload).await;
        metrics::record_session_operation("create", result.is_ok());
        result
    }

    async fn create_inner(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        payload: Map<String, Value>,
    ) -> Result<SessionTokens> {
        if user_id.is_empty() {
            return Err(SessionError::InvalidPayload(
                "user id must not be empty".to_string(),
            ));
        }
        validate_payload(&payload)
            .map_err(|name| SessionError::InvalidPayload(format!("'{name}' is a protected claim")))?;

        let session_handle = uuid::Uuid::new_v4().to_string();
        let refresh_token = RefreshToken::generate(&session_handle, &self.rng)?;
        let now_ms = self.clock.unix_millis();

        let record = SessionRecord {
            session_handle: session_handle.clone(),
            user_id: user_id.to_string(),
            tenant_id: tenant_id.unwrap_or(DEFAULT_TENANT_ID).to_string(),
            refresh_token_hash: RefreshToken::hash(refresh_token.expose_secret()),
            parent_refresh_token_hash: None,
            access_token_payload: payload,
            created_at_ms: now_ms,
            expires_at_ms: self.refresh_expiry_from(now_ms),
            revoked: false,
        };

        let access_token = self.issue_access_token(&record, None)?;
        self.store.insert(record).await?;

        info!(
            target: "session.lifecycle",
            user = %hash_for_correlation(user_id),
            session = %hash_for_correlation(&session_handle),
            "Session created"
        );

        Ok(SessionTokens {
            access_token,
            refresh_token,
            session_handle,
        })
    }

    /// Verify an access token.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Token`] for any verification failure
    /// - [`SessionError::Revoked`] when `check_store` is set and the session
    ///   row is missing or revoked
    #[instrument(skip_all, fields(check_store = options.check_store))]
    pub async fn verify(&self, access_token: &str, options: VerifyOptions) -> Result<VerifiedClaims> {
        let result = self.verify_inner(access_token, options).await;
        metrics::record_session_operation("verify", result.is_ok());
        result
    }

    async fn verify_inner(&self, access_token: &str, options: VerifyOptions) -> Result<VerifiedClaims> {
        let verified = self.codec.decode_and_verify(access_token).await?;

        if options.check_store {
            let live = self
                .store
                .get(verified.session_handle())
                .await?
                .is_some_and(|record| !record.revoked);
            if !live {
                return Err(SessionError::Revoked);
            }
        }

        Ok(verified)
    }

    /// Exchange a refresh token for a new access token and a new refresh token.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Unauthorised`] for malformed, unknown, expired,
    ///   revoked or concurrently rotated refresh tokens
    /// - [`SessionError::TokenTheftDetected`] when the previous refresh token
    ///   is presented again; the session is revoked
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<SessionTokens> {
        let result = self.refresh_inner(refresh_token).await;
        metrics::record_session_operation("refresh", result.is_ok());
        result
    }

    async fn refresh_inner(&self, presented: &str) -> Result<SessionTokens> {
        let session_handle = RefreshToken::session_handle_of(presented)
            .ok_or_else(|| SessionError::Unauthorised("malformed refresh token".to_string()))?;
        let presented_hash = RefreshToken::hash(presented);

        let record = self
            .store
            .get(session_handle)
            .await?
            .ok_or_else(|| SessionError::Unauthorised("unknown session".to_string()))?;
        if record.revoked {
            return Err(SessionError::Unauthorised("session revoked".to_string()));
        }
        let now_ms = self.clock.unix_millis();
        if now_ms >= record.expires_at_ms {
            return Err(SessionError::Unauthorised(
                "refresh token expired".to_string(),
            ));
        }

        if record.refresh_token_hash != presented_hash {
            if record.parent_refresh_token_hash.as_deref() == Some(presented_hash.as_str()) {
                self.store.revoke(session_handle).await?;
                metrics::record_token_theft_detected();
                warn!(
                    target: "session.lifecycle",
                    user = %hash_for_correlation(&record.user_id),
                    session = %hash_for_correlation(session_handle),
                    "Rotated-out refresh token reused, session revoked"
                );
                return Err(SessionError::TokenTheftDetected {
                    session_handle: record.session_handle,
                    user_id: record.user_id,
                });
            }
            return Err(SessionError::Unauthorised(
                "refresh token does not match".to_string(),
            ));
        }

        let next = RefreshToken::generate(session_handle, &self.rng)?;
        let next_hash = RefreshToken::hash(next.expose_secret());

        // Sign first: a failure here must leave the presented token current.
        let record = SessionRecord {
            refresh_token_hash: next_hash.clone(),
            parent_refresh_token_hash: Some(presented_hash.clone()),
            ..record
        };
        let access_token = self.issue_access_token(&record, Some(presented_hash.clone()))?;

        let rotated = self
            .store
            .rotate_refresh_token(
                session_handle,
                &presented_hash,
                next_hash,
                self.refresh_expiry_from(now_ms),
            )
            .await?;
        if !rotated {
            return Err(SessionError::Unauthorised(
                "refresh token already used".to_string(),
            ));
        }

        info!(
            target: "session.lifecycle",
            session = %hash_for_correlation(session_handle),
            "Session refreshed"
        );

        Ok(SessionTokens {
            access_token,
            refresh_token: next,
            session_handle: record.session_handle,
        })
    }

    /// Revoke a session. Returns false if it was unknown or already revoked.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] on store failure.
    #[instrument(skip_all)]
    pub async fn revoke(&self, session_handle: &str) -> Result<bool> {
        let result = self.store.revoke(session_handle).await.map_err(SessionError::from);
        metrics::record_session_operation("revoke", result.is_ok());
        if let Ok(true) = result {
            info!(target: "session.lifecycle", session = %hash_for_correlation(session_handle), "Session revoked");
        }
        result
    }

    /// Revoke all live sessions of a user, returning the revoked handles.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] on store failure.
    #[instrument(skip_all)]
    pub async fn revoke_all_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let handles = self.store.revoke_all_for_user(user_id).await?;
        info!(
            target: "session.lifecycle",
            user = %hash_for_correlation(user_id),
            count = handles.len(),
            "User sessions revoked"
        );
        Ok(handles)
    }

    /// Handles of a user's live sessions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] on store failure.
    pub async fn session_handles_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        Ok(self.store.handles_for_user(user_id).await?)
    }

    /// Server-side row for a session, revoked or not.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] on store failure.
    pub async fn session_information(&self, session_handle: &str) -> Result<Option<SessionRecord>> {
        Ok(self.store.get(session_handle).await?)
    }

    /// Replace the payload used for access tokens issued from the next refresh on.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidPayload`] for protected claim names
    /// - [`SessionError::Store`] on store failure
    pub async fn update_access_token_payload(
        &self,
        session_handle: &str,
        payload: Map<String, Value>,
    ) -> Result<bool> {
        validate_payload(&payload)
            .map_err(|name| SessionError::InvalidPayload(format!("'{name}' is a protected claim")))?;
        Ok(self.store.update_payload(session_handle, payload).await?)
    }
}
