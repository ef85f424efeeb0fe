//! Multi-host JWKS resolution.
//!
//! Hosts are tried strictly in configured order. The first host that returns
//! a usable key set wins and later hosts are not contacted. Per-host failures
//! are logged and counted, never surfaced, unless every host fails.

use crate::config::AuthorityHosts;
use crate::error::{FetchError, JwksError};
use crate::jwks::{KeyFetcher, KeySet};
use crate::observability::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Walks an ordered host list until one host yields keys.
#[derive(Clone)]
pub struct CombinedJwksResolver {
    fetcher: Arc<dyn KeyFetcher>,
    fetch_timeout: Duration,
}

impl std::fmt::Debug for CombinedJwksResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedJwksResolver")
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl CombinedJwksResolver {
    #[must_use]
    pub fn new(fetcher: Arc<dyn KeyFetcher>, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            fetch_timeout,
        }
    }

    /// Resolve keys from the first host that answers with a usable key set.
    ///
    /// # Errors
    ///
    /// Returns [`JwksError::AllHostsFailed`] carrying the last host's error
    /// when every host fails.
    #[instrument(skip_all, fields(host_count = hosts.len()))]
    pub async fn resolve(&self, hosts: &AuthorityHosts) -> Result<KeySet, JwksError> {
        let mut last_error = None;
        let mut attempted = 0usize;

        for host in hosts.iter() {
            attempted += 1;
            debug!(target: "session.jwks.resolver", host = %host, attempt = attempted, "Attempting to fetch JWKS");

            let started = Instant::now();
            let outcome = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(host))
                .await
                .unwrap_or_else(|_| {
                    Err(FetchError::Timeout {
                        host: host.to_string(),
                        timeout_ms: u64::try_from(self.fetch_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                    })
                });

            match outcome {
                Ok(keys) if !keys.is_empty() => {
                    metrics::record_host_fetch("success", started.elapsed());
                    debug!(
                        target: "session.jwks.resolver",
                        host = %host,
                        key_count = keys.len(),
                        attempts = attempted,
                        "JWKS resolved"
                    );
                    return Ok(keys);
                }
                Ok(_) => {
                    let err = FetchError::Parse {
                        host: host.to_string(),
                        reason: "no usable keys".to_string(),
                    };
                    metrics::record_host_fetch(err.kind(), started.elapsed());
                    warn!(target: "session.jwks.resolver", host = %host, error = %err, "JWKS host returned no keys, trying next host");
                    last_error = Some(err);
                }
                Err(err) => {
                    metrics::record_host_fetch(err.kind(), started.elapsed());
                    warn!(target: "session.jwks.resolver", host = %host, error = %err, "JWKS fetch failed, trying next host");
                    last_error = Some(err);
                }
            }
        }

        // AuthorityHosts is never empty, so last_error is always set here.
        let last_error = last_error.unwrap_or_else(|| FetchError::Network {
            host: String::new(),
            reason: "no authority hosts configured".to_string(),
        });
        warn!(target: "session.jwks.resolver", attempted = attempted, error = %last_error, "All JWKS hosts failed");

        Err(JwksError::AllHostsFailed {
            attempted,
            last_error,
        })
    }
}
