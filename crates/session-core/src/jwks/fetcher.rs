//! Single-host JWKS transport.
//!
//! One fetch is one `GET {host}{jwks_path}` with no retries. Retrying across
//! hosts is the resolver's job; timing out is too.

use crate::config::{AuthorityHost, DEFAULT_JWKS_PATH};
use crate::error::FetchError;
use crate::jwks::{JwksDocument, KeySet};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Connect timeout for the bundled HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fetches the key set published by one authority host.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    /// Fetch and parse the key set from `host`.
    ///
    /// An empty or entirely unusable key set is an error.
    async fn fetch(&self, host: &AuthorityHost) -> Result<KeySet, FetchError>;
}

/// [`KeyFetcher`] over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpKeyFetcher {
    client: reqwest::Client,
    jwks_path: String,
}

impl Default for HttpKeyFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_JWKS_PATH)
    }
}

impl HttpKeyFetcher {
    /// Create a fetcher requesting `jwks_path` on each host.
    #[must_use]
    pub fn new(jwks_path: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(target: "session.jwks.fetcher", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });
        Self::with_client(client, jwks_path)
    }

    /// Create a fetcher with a caller-supplied client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, jwks_path: impl Into<String>) -> Self {
        Self {
            client,
            jwks_path: jwks_path.into(),
        }
    }
}

#[async_trait]
impl KeyFetcher for HttpKeyFetcher {
    #[instrument(skip_all, fields(host = %host))]
    async fn fetch(&self, host: &AuthorityHost) -> Result<KeySet, FetchError> {
        let url = host.jwks_url(&self.jwks_path);
        debug!(target: "session.jwks.fetcher", url = %url, "Requesting JWKS");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network {
                host: host.to_string(),
                reason: format!("unexpected status {status}"),
            });
        }

        let document: JwksDocument = response.json().await.map_err(|e| FetchError::Parse {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

        let (keys, skipped) = KeySet::from_document(&document);
        for reason in &skipped {
            warn!(target: "session.jwks.fetcher", host = %host, reason = %reason, "Skipping unusable JWK");
        }

        if keys.is_empty() {
            return Err(FetchError::Parse {
                host: host.to_string(),
                reason: "no usable keys".to_string(),
            });
        }

        debug!(target: "session.jwks.fetcher", host = %host, key_count = keys.len(), "JWKS fetched");
        Ok(keys)
    }
}
