//! Session layer configuration.
//!
//! Configuration is loaded from environment variables via
//! [`SessionConfig::from_env`]. Sub-configs can also be built directly with
//! their `with_*` setters. The signing master secret is redacted in Debug output.

use crate::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use crate::secret::{ExposeSecret, SecretString};
use base64::{engine::general_purpose::STANDARD, Engine};
use ring::digest;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default JWKS path appended to each authority host.
pub const DEFAULT_JWKS_PATH: &str = "/.well-known/jwks.json";

/// Default freshness window for cached keys.
pub const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(60);

/// Default minimum spacing between refresh attempts.
pub const DEFAULT_REFRESH_RATE_LIMIT: Duration = Duration::from_millis(500);

/// Default per-host fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound on waiting for another caller's refresh.
pub const DEFAULT_LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default dynamic signing key rotation period (168 hours).
pub const DEFAULT_KEY_UPDATE_INTERVAL: Duration = Duration::from_secs(168 * 3600);

/// Default number of dynamic keys an authority publishes.
pub const DEFAULT_KEY_HISTORY: u32 = 2;

/// Default access token lifetime.
pub const DEFAULT_ACCESS_TOKEN_VALIDITY: Duration = Duration::from_secs(3600);

/// Default refresh token lifetime (100 days).
pub const DEFAULT_REFRESH_TOKEN_VALIDITY: Duration = Duration::from_secs(8_640_000);

/// Minimum decoded length of the signing master secret.
pub const MIN_MASTER_SECRET_BYTES: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid authority hosts: {0}")]
    InvalidAuthorityHosts(String),

    #[error("Invalid signing master secret: {0}")]
    InvalidMasterSecret(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),

    #[error("Invalid signing key history configuration: {0}")]
    InvalidKeyHistory(String),

    #[error("Invalid boolean configuration: {0}")]
    InvalidFlag(String),
}

// =============================================================================
// Authority hosts
// =============================================================================

/// Normalized base URL of an authority host.
///
/// A scheme-less value gets `http://` prepended and a trailing `/` is removed,
/// so `"localhost:3567/"` and `"http://localhost:3567"` are the same host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthorityHost(String);

impl AuthorityHost {
    /// Normalize a single host string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAuthorityHosts`] for blank values or
    /// values with whitespace.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidAuthorityHosts(
                "host must not be empty".to_string(),
            ));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidAuthorityHosts(format!(
                "host '{trimmed}' contains whitespace"
            )));
        }

        let (scheme, rest) = trimmed.split_once("://").unwrap_or(("http", trimmed));
        let rest = rest.trim_end_matches('/');
        if scheme.is_empty() || rest.is_empty() {
            return Err(ConfigError::InvalidAuthorityHosts(format!(
                "host '{trimmed}' has no domain"
            )));
        }

        Ok(Self(format!("{scheme}://{rest}")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full JWKS URL for this host.
    #[must_use]
    pub fn jwks_url(&self, jwks_path: &str) -> String {
        if jwks_path.starts_with('/') {
            format!("{}{}", self.0, jwks_path)
        } else {
            format!("{}/{}", self.0, jwks_path)
        }
    }
}

impl fmt::Display for AuthorityHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, non-empty list of authority hosts.
///
/// Order matters: the resolver tries hosts front to back, and the cache key
/// differs when the order differs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthorityHosts(Vec<AuthorityHost>);

impl AuthorityHosts {
    /// Build from already-normalized hosts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAuthorityHosts`] when `hosts` is empty.
    pub fn new(hosts: Vec<AuthorityHost>) -> Result<Self, ConfigError> {
        if hosts.is_empty() {
            return Err(ConfigError::InvalidAuthorityHosts(
                "at least one authority host is required".to_string(),
            ));
        }
        Ok(Self(hosts))
    }

    /// Parse a `;`-separated host list, e.g. `"auth-1.internal;localhost:3567"`.
    ///
    /// Empty segments (such as a trailing `;`) are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAuthorityHosts`] when no host remains or a
    /// segment is invalid.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let hosts = raw
            .split(';')
            .filter(|segment| !segment.trim().is_empty())
            .map(AuthorityHost::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(hosts)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuthorityHost> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable cache key: lowercase hex SHA-256 of the hosts joined with `;`.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let joined = self
            .0
            .iter()
            .map(AuthorityHost::as_str)
            .collect::<Vec<_>>()
            .join(";");
        hex::encode(digest::digest(&digest::SHA256, joined.as_bytes()))
    }
}

impl FromStr for AuthorityHosts {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Sub-configs
// =============================================================================

/// JWKS cache and resolver tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwksCacheConfig {
    /// Path appended to each authority host.
    pub jwks_path: String,
    /// Cached keys younger than this are served without refreshing.
    pub cache_max_age: Duration,
    /// Minimum spacing between refresh attempts for one cache key.
    pub refresh_rate_limit: Duration,
    /// Per-host fetch timeout.
    pub fetch_timeout: Duration,
    /// How long a caller waits for another caller's refresh.
    pub lock_wait_timeout: Duration,
}

impl Default for JwksCacheConfig {
    fn default() -> Self {
        Self {
            jwks_path: DEFAULT_JWKS_PATH.to_string(),
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            refresh_rate_limit: DEFAULT_REFRESH_RATE_LIMIT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            lock_wait_timeout: DEFAULT_LOCK_WAIT_TIMEOUT,
        }
    }
}

impl JwksCacheConfig {
    #[must_use]
    pub fn with_jwks_path(mut self, path: impl Into<String>) -> Self {
        self.jwks_path = path.into();
        self
    }

    #[must_use]
    pub fn with_cache_max_age(mut self, max_age: Duration) -> Self {
        self.cache_max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_refresh_rate_limit(mut self, rate_limit: Duration) -> Self {
        self.refresh_rate_limit = rate_limit;
        self
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = timeout;
        self
    }
}

/// Signing key derivation settings.
#[derive(Clone)]
pub struct SigningKeyConfig {
    /// Base64 master secret all keys are derived from.
    pub master_secret: SecretString,
    /// Dynamic key rotation period.
    pub update_interval: Duration,
    /// Number of dynamic keys published (current key included).
    pub key_history: u32,
    /// Unix millisecond timestamp key indices are counted from.
    pub epoch_ms: i64,
}

impl fmt::Debug for SigningKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyConfig")
            .field("master_secret", &"[REDACTED]")
            .field("update_interval", &self.update_interval)
            .field("key_history", &self.key_history)
            .field("epoch_ms", &self.epoch_ms)
            .finish()
    }
}

impl SigningKeyConfig {
    /// Validate `master_secret` and apply default rotation settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMasterSecret`] when the secret is not
    /// base64 or decodes to fewer than [`MIN_MASTER_SECRET_BYTES`] bytes.
    pub fn new(master_secret: SecretString) -> Result<Self, ConfigError> {
        decode_master_secret(&master_secret)?;
        Ok(Self {
            master_secret,
            update_interval: DEFAULT_KEY_UPDATE_INTERVAL,
            key_history: DEFAULT_KEY_HISTORY,
            epoch_ms: 0,
        })
    }

    #[must_use]
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    #[must_use]
    pub fn with_key_history(mut self, history: u32) -> Self {
        self.key_history = history;
        self
    }

    #[must_use]
    pub fn with_epoch_ms(mut self, epoch_ms: i64) -> Self {
        self.epoch_ms = epoch_ms;
        self
    }
}

/// Decode and length-check a base64 master secret.
pub(crate) fn decode_master_secret(secret: &SecretString) -> Result<Vec<u8>, ConfigError> {
    let bytes = STANDARD
        .decode(secret.expose_secret().trim())
        .map_err(|e| ConfigError::InvalidMasterSecret(format!("not valid base64: {e}")))?;
    if bytes.len() < MIN_MASTER_SECRET_BYTES {
        return Err(ConfigError::InvalidMasterSecret(format!(
            "must decode to at least {MIN_MASTER_SECRET_BYTES} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Token lifetimes and signing mode for the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub access_token_validity: Duration,
    pub refresh_token_validity: Duration,
    /// Tolerance for `iat` in the future.
    pub clock_skew: Duration,
    /// Sign new access tokens with the rotating key instead of the static key.
    pub use_dynamic_signing_key: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            access_token_validity: DEFAULT_ACCESS_TOKEN_VALIDITY,
            refresh_token_validity: DEFAULT_REFRESH_TOKEN_VALIDITY,
            clock_skew: DEFAULT_CLOCK_SKEW,
            use_dynamic_signing_key: true,
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub fn with_access_token_validity(mut self, validity: Duration) -> Self {
        self.access_token_validity = validity;
        self
    }

    #[must_use]
    pub fn with_refresh_token_validity(mut self, validity: Duration) -> Self {
        self.refresh_token_validity = validity;
        self
    }

    #[must_use]
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    #[must_use]
    pub fn with_dynamic_signing_key(mut self, enabled: bool) -> Self {
        self.use_dynamic_signing_key = enabled;
        self
    }
}

// =============================================================================
// Top-level config
// =============================================================================

/// Complete session layer configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub authority_hosts: AuthorityHosts,
    pub jwks: JwksCacheConfig,
    pub signing: SigningKeyConfig,
    pub lifecycle: LifecycleConfig,
}

impl SessionConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`SessionConfig::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a value
    /// is out of range.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let authority_hosts = AuthorityHosts::parse(
            vars.get("SESSION_AUTHORITY_HOSTS")
                .ok_or_else(|| ConfigError::MissingEnvVar("SESSION_AUTHORITY_HOSTS".to_string()))?,
        )?;

        let jwks = JwksCacheConfig {
            jwks_path: vars
                .get("SESSION_JWKS_PATH")
                .cloned()
                .unwrap_or_else(|| DEFAULT_JWKS_PATH.to_string()),
            cache_max_age: parse_millis(
                vars,
                "SESSION_JWKS_CACHE_MAX_AGE_MS",
                DEFAULT_CACHE_MAX_AGE,
            )?,
            // Zero disables rate limiting.
            refresh_rate_limit: parse_millis_allow_zero(
                vars,
                "SESSION_JWKS_REFRESH_RATE_LIMIT_MS",
                DEFAULT_REFRESH_RATE_LIMIT,
            )?,
            fetch_timeout: parse_millis(
                vars,
                "SESSION_JWKS_FETCH_TIMEOUT_MS",
                DEFAULT_FETCH_TIMEOUT,
            )?,
            lock_wait_timeout: parse_millis(
                vars,
                "SESSION_JWKS_LOCK_WAIT_TIMEOUT_MS",
                DEFAULT_LOCK_WAIT_TIMEOUT,
            )?,
        };

        let master_secret = SecretString::from(
            vars.get("SESSION_SIGNING_MASTER_SECRET")
                .ok_or_else(|| {
                    ConfigError::MissingEnvVar("SESSION_SIGNING_MASTER_SECRET".to_string())
                })?
                .clone(),
        );

        let key_history = if let Some(value_str) = vars.get("SESSION_DYNAMIC_SIGNING_KEY_HISTORY") {
            let value: u32 = value_str.parse().map_err(|e| {
                ConfigError::InvalidKeyHistory(format!(
                    "SESSION_DYNAMIC_SIGNING_KEY_HISTORY must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;
            if value == 0 {
                return Err(ConfigError::InvalidKeyHistory(
                    "SESSION_DYNAMIC_SIGNING_KEY_HISTORY must be greater than 0".to_string(),
                ));
            }
            value
        } else {
            DEFAULT_KEY_HISTORY
        };

        let signing = SigningKeyConfig::new(master_secret)?
            .with_update_interval(parse_millis(
                vars,
                "SESSION_DYNAMIC_SIGNING_KEY_UPDATE_INTERVAL_MS",
                DEFAULT_KEY_UPDATE_INTERVAL,
            )?)
            .with_key_history(key_history);

        let clock_skew = if let Some(value_str) = vars.get("SESSION_JWT_CLOCK_SKEW_SECS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "SESSION_JWT_CLOCK_SKEW_SECS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "SESSION_JWT_CLOCK_SKEW_SECS must be positive, got {}",
                    value
                )));
            }

            let value = value.unsigned_abs();
            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "SESSION_JWT_CLOCK_SKEW_SECS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_CLOCK_SKEW
        };

        let lifecycle = LifecycleConfig {
            access_token_validity: parse_secs(
                vars,
                "SESSION_ACCESS_TOKEN_VALIDITY_SECS",
                DEFAULT_ACCESS_TOKEN_VALIDITY,
            )?,
            refresh_token_validity: parse_secs(
                vars,
                "SESSION_REFRESH_TOKEN_VALIDITY_SECS",
                DEFAULT_REFRESH_TOKEN_VALIDITY,
            )?,
            clock_skew,
            use_dynamic_signing_key: parse_flag(vars, "SESSION_USE_DYNAMIC_SIGNING_KEY", true)?,
        };

        Ok(SessionConfig {
            authority_hosts,
            jwks,
            signing,
            lifecycle,
        })
    }
}

fn parse_u64(vars: &HashMap<String, String>, name: &str) -> Result<Option<u64>, ConfigError> {
    vars.get(name)
        .map(|value_str| {
            value_str.trim().parse::<u64>().map_err(|e| {
                ConfigError::InvalidDuration(format!(
                    "{} must be a valid non-negative integer, got '{}': {}",
                    name, value_str, e
                ))
            })
        })
        .transpose()
}

fn parse_millis_allow_zero(
    vars: &HashMap<String, String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    Ok(parse_u64(vars, name)?.map_or(default, Duration::from_millis))
}

fn parse_millis(
    vars: &HashMap<String, String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match parse_u64(vars, name)? {
        Some(0) => Err(ConfigError::InvalidDuration(format!(
            "{name} must be greater than 0"
        ))),
        Some(ms) => Ok(Duration::from_millis(ms)),
        None => Ok(default),
    }
}

fn parse_secs(
    vars: &HashMap<String, String>,
    name: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match parse_u64(vars, name)? {
        Some(0) => Err(ConfigError::InvalidDuration(format!(
            "{name} must be greater than 0"
        ))),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(default),
    }
}

fn parse_flag(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) if v == "false" || v == "0" => Ok(false),
        Some(other) => Err(ConfigError::InvalidFlag(format!(
            "{name} must be true or false, got '{other}'"
        ))),
    }
}
