//! Process-wide JWKS cache keyed by authority host list.
//!
//! Each host list gets a slot holding an immutable [`JwksCacheEntry`] snapshot
//! and a refresh lock. Readers clone the snapshot `Arc` and never wait on the
//! refresh lock while the entry is fresh. A stale or missing entry is
//! refreshed by exactly one caller at a time; callers queued behind it
//! re-check the entry after acquiring the lock and reuse what it fetched.
//!
//! # Refresh policy
//!
//! - Fresh: `now - fetched_at < cache_max_age` and the key set is non-empty
//! - Rate limit: no network refresh within `refresh_rate_limit` of the last
//!   attempt (successful or not); the current keys are served instead
//! - Failure: the entry keeps its old keys and records the attempt and its
//!   error; old keys are served stale if there are any. Callers turned away by
//!   the rate limit with nothing cached get the recorded error
//! - Forced refresh (unknown kid): never answered with stale keys after a
//!   failed attempt, since the caller would take a missing kid as proof the key
//!   does not exist
//! - Lock wait: bounded by `lock_wait_timeout`; on timeout the current keys are
//!   served, or [`JwksError::LockTimeout`] when there are none

use crate::clock::{Clock, SystemClock};
use crate::config::{AuthorityHosts, JwksCacheConfig};
use crate::error::JwksError;
use crate::jwks::{CombinedJwksResolver, HttpKeyFetcher, KeyFetcher, KeySet};
use crate::observability::metrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

/// Immutable snapshot of the keys cached for one host list.
#[derive(Debug, Clone, Default)]
pub struct JwksCacheEntry {
    /// Keys from the last successful fetch (empty before the first one).
    pub keys: Arc<KeySet>,
    /// When `keys` were fetched.
    pub fetched_at: Option<Instant>,
    /// When a refresh was last attempted, successful or not.
    pub last_refresh_attempt_at: Option<Instant>,
    /// Why the last attempt failed; cleared by the next success.
    pub last_error: Option<JwksError>,
}

impl JwksCacheEntry {
    fn is_fresh(&self, now: Instant, config: &JwksCacheConfig) -> bool {
        !self.keys.is_empty()
            && self
                .fetched_at
                .is_some_and(|at| now.saturating_duration_since(at) < config.cache_max_age)
    }

    fn is_rate_limited(&self, now: Instant, config: &JwksCacheConfig) -> bool {
        self.last_refresh_attempt_at
            .is_some_and(|at| now.saturating_duration_since(at) < config.refresh_rate_limit)
    }
}

/// Cache counters. Cheap to update from any task.
#[derive(Debug, Default)]
pub struct JwksCacheStats {
    cache_hits: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    rate_limited: AtomicU64,
}

/// Point-in-time copy of [`JwksCacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JwksCacheStatsSnapshot {
    /// Calls answered from a fresh entry.
    pub cache_hits: u64,
    /// Network resolves started (one per refresh, however many hosts it tried).
    pub refreshes: u64,
    /// Resolves where every host failed.
    pub refresh_failures: u64,
    /// Refreshes skipped because of the rate limit.
    pub rate_limited: u64,
}

impl JwksCacheStats {
    fn snapshot(&self) -> JwksCacheStatsSnapshot {
        JwksCacheStatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.cache_hits.store(0, Ordering::Relaxed);
        self.refreshes.store(0, Ordering::Relaxed);
        self.refresh_failures.store(0, Ordering::Relaxed);
        self.rate_limited.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct CacheSlot {
    entry: RwLock<Arc<JwksCacheEntry>>,
    refresh_lock: Mutex<()>,
}

/// Shared cache of verification keys.
///
/// Create one per process and share it via `Arc`.
pub struct JwksCache {
    resolver: CombinedJwksResolver,
    clock: Arc<dyn Clock>,
    config: JwksCacheConfig,
    slots: RwLock<HashMap<String, Arc<CacheSlot>>>,
    stats: JwksCacheStats,
}

impl std::fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksCache")
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl JwksCache {
    /// Create a cache with an injected transport and clock.
    #[must_use]
    pub fn new(fetcher: Arc<dyn KeyFetcher>, clock: Arc<dyn Clock>, config: JwksCacheConfig) -> Self {
        Self {
            resolver: CombinedJwksResolver::new(fetcher, config.fetch_timeout),
            clock,
            config,
            slots: RwLock::new(HashMap::new()),
            stats: JwksCacheStats::default(),
        }
    }

    /// Create a cache that fetches over HTTP using the system clock.
    #[must_use]
    pub fn with_http(config: JwksCacheConfig) -> Self {
        let fetcher = Arc::new(HttpKeyFetcher::new(config.jwks_path.clone()));
        Self::new(fetcher, Arc::new(SystemClock), config)
    }

    #[must_use]
    pub fn config(&self) -> &JwksCacheConfig {
        &self.config
    }

    /// Keys for `hosts`, refreshing when the cached entry is stale or missing.
    ///
    /// # Errors
    ///
    /// Errors only when no keys at all can be returned:
    /// - [`JwksError::AllHostsFailed`] when the refresh failed
    /// - [`JwksError::RateLimited`] when the refresh was skipped
    /// - [`JwksError::LockTimeout`] when another caller's refresh took too long
    #[instrument(skip_all, fields(cache_key = tracing::field::Empty))]
    pub async fn get_keys(&self, hosts: &AuthorityHosts) -> Result<Arc<KeySet>, JwksError> {
        let slot = self.slot(hosts).await;

        let snapshot = slot.entry.read().await.clone();
        if snapshot.is_fresh(self.clock.now(), &self.config) {
            return Ok(self.cache_hit(&snapshot));
        }

        self.refresh(hosts, &slot, None).await
    }

    /// Forced refresh after a token named a key id missing from `observed`.
    ///
    /// Ignores `cache_max_age` but honours the rate limit. When the entry has
    /// already been replaced since `observed` was read, the newer keys are
    /// returned without fetching.
    ///
    /// # Errors
    ///
    /// Unlike [`JwksCache::get_keys`], errors even when stale keys are cached:
    /// - [`JwksError::AllHostsFailed`] when this refresh failed, or the
    ///   rate limit blocked it and the previous attempt had failed
    /// - [`JwksError::LockTimeout`] when another caller's refresh took too long
    #[instrument(skip_all)]
    pub async fn get_keys_after_unknown_kid(
        &self,
        hosts: &AuthorityHosts,
        observed: &Arc<KeySet>,
    ) -> Result<Arc<KeySet>, JwksError> {
        let slot = self.slot(hosts).await;
        self.refresh(hosts, &slot, Some(observed)).await
    }

    /// Fresh keys for `hosts` if cached, without ever fetching.
    pub async fn cached_keys(&self, hosts: &AuthorityHosts) -> Option<Arc<KeySet>> {
        let slot = self.slots.read().await.get(&hosts.cache_key()).cloned()?;
        let snapshot = slot.entry.read().await.clone();
        snapshot
            .is_fresh(self.clock.now(), &self.config)
            .then(|| self.cache_hit(&snapshot))
    }

    /// Current entry for `hosts`, fresh or not.
    pub async fn entry(&self, hosts: &AuthorityHosts) -> Option<Arc<JwksCacheEntry>> {
        let slot = self.slots.read().await.get(&hosts.cache_key()).cloned()?;
        let entry = slot.entry.read().await.clone();
        Some(entry)
    }

    /// Drop every cached entry and zero the counters.
    pub async fn reset(&self) {
        self.slots.write().await.clear();
        self.stats.reset();
        debug!(target: "session.jwks.cache", "JWKS cache reset");
    }

    #[must_use]
    pub fn stats(&self) -> JwksCacheStatsSnapshot {
        self.stats.snapshot()
    }

    async fn slot(&self, hosts: &AuthorityHosts) -> Arc<CacheSlot> {
        let key = hosts.cache_key();
        tracing::Span::current().record("cache_key", key.get(..12).unwrap_or(&key));

        if let Some(slot) = self.slots.read().await.get(&key) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(key).or_default())
    }

    fn cache_hit(&self, entry: &JwksCacheEntry) -> Arc<KeySet> {
        self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_jwks_cache("hit");
        debug!(target: "session.jwks.cache", key_count = entry.keys.len(), "Returning JWKS from cache");
        Arc::clone(&entry.keys)
    }

    async fn refresh(
        &self,
        hosts: &AuthorityHosts,
        slot: &CacheSlot,
        observed: Option<&Arc<KeySet>>,
    ) -> Result<Arc<KeySet>, JwksError> {
        let Ok(_guard) =
            tokio::time::timeout(self.config.lock_wait_timeout, slot.refresh_lock.lock()).await
        else {
            let current = slot.entry.read().await.clone();
            metrics::record_jwks_cache("lock_timeout");
            warn!(
                target: "session.jwks.cache",
                wait_ms = u64::try_from(self.config.lock_wait_timeout.as_millis()).unwrap_or(u64::MAX),
                has_keys = !current.keys.is_empty(),
                "Timed out waiting for in-flight JWKS refresh"
            );
            return if current.keys.is_empty() || observed.is_some() {
                Err(JwksError::LockTimeout)
            } else {
                Ok(Arc::clone(&current.keys))
            };
        };

        // Another caller may have refreshed while this one waited.
        let current = slot.entry.read().await.clone();
        let now = self.clock.now();
        match observed {
            None if current.is_fresh(now, &self.config) => return Ok(self.cache_hit(&current)),
            Some(observed) if !current.keys.is_empty() && !Arc::ptr_eq(observed, &current.keys) => {
                debug!(target: "session.jwks.cache", "JWKS replaced since unknown kid was observed, skipping fetch");
                return Ok(self.cache_hit(&current));
            }
            _ => {}
        }

        if current.is_rate_limited(now, &self.config) {
            self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
            metrics::record_jwks_cache("rate_limited");
            warn!(
                target: "session.jwks.cache",
                has_keys = !current.keys.is_empty(),
                "JWKS refresh rate limited"
            );
            return match &current.last_error {
                Some(err) if current.keys.is_empty() || observed.is_some() => Err(err.clone()),
                _ if current.keys.is_empty() => Err(JwksError::RateLimited),
                _ => Ok(Arc::clone(&current.keys)),
            };
        }

        debug!(target: "session.jwks.cache", forced = observed.is_some(), "Fetching jwk set from the configured uri");
        self.stats.refreshes.fetch_add(1, Ordering::Relaxed);
        let result = self.resolver.resolve(hosts).await;
        let attempted_at = self.clock.now();

        match result {
            Ok(keys) => {
                let keys = Arc::new(keys);
                *slot.entry.write().await = Arc::new(JwksCacheEntry {
                    keys: Arc::clone(&keys),
                    fetched_at: Some(attempted_at),
                    last_refresh_attempt_at: Some(attempted_at),
                    last_error: None,
                });
                metrics::record_jwks_cache("refreshed");
                debug!(target: "session.jwks.cache", key_count = keys.len(), "Returning JWKS from fetch");
                Ok(keys)
            }
            Err(err) => {
                self.stats.refresh_failures.fetch_add(1, Ordering::Relaxed);
                *slot.entry.write().await = Arc::new(JwksCacheEntry {
                    keys: Arc::clone(&current.keys),
                    fetched_at: current.fetched_at,
                    last_refresh_attempt_at: Some(attempted_at),
                    last_error: Some(err.clone()),
                });

                if current.keys.is_empty() || observed.is_some() {
                    metrics::record_jwks_cache("failed");
                    warn!(
                        target: "session.jwks.cache",
                        error = %err,
                        forced = observed.is_some(),
                        "JWKS refresh failed, not serving cached keys"
                    );
                    Err(err)
                } else {
                    metrics::record_jwks_cache("stale");
                    warn!(target: "session.jwks.cache", error = %err, "JWKS refresh failed, serving stale keys");
                    Ok(Arc::clone(&current.keys))
                }
            }
        }
    }
}
