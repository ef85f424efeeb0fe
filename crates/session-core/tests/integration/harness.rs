//! Shared wiring: one fake authority, a manual clock, and the layers on top.

use session_core::clock::{Clock, ManualClock};
use session_core::config::{
    AuthorityHosts, JwksCacheConfig, LifecycleConfig, SessionConfig, SigningKeyConfig,
};
use session_core::jwks::{HttpKeyFetcher, JwksCache};
use session_core::keys::SigningKeyRing;
use session_core::session::{InMemorySessionStore, SessionLifecycle};
use session_core::token::SessionTokenCodec;
use session_test_utils::{hosts_of, init_test_tracing, test_key_ring, test_signing_config, TestAuthority};
use std::sync::Arc;
use std::time::Duration;

/// 2023-11-14T22:13:20Z
pub const START_MS: i64 = 1_700_000_000_000;

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub signing: SigningKeyConfig,
    pub keys: Arc<SigningKeyRing>,
    pub authority: TestAuthority,
    pub hosts: AuthorityHosts,
    pub cache: Arc<JwksCache>,
}

impl Harness {
    pub async fn start(update_interval: Duration, key_history: u32, jwks: JwksCacheConfig) -> Self {
        init_test_tracing();

        let clock = Arc::new(ManualClock::starting_at(START_MS));
        let signing = test_signing_config(update_interval, key_history);
        let keys = Arc::new(test_key_ring(signing.clone()));
        let authority = TestAuthority::start(Arc::clone(&keys), clock.clone()).await;
        let hosts = hosts_of(&[&authority]);
        let cache = Arc::new(JwksCache::new(
            Arc::new(HttpKeyFetcher::new(jwks.jwks_path.clone())),
            clock.clone(),
            jwks,
        ));

        Self {
            clock,
            signing,
            keys,
            authority,
            hosts,
            cache,
        }
    }

    /// Hourly keys, two published, default cache timings.
    pub async fn hourly() -> Self {
        Self::start(Duration::from_secs(3600), 2, JwksCacheConfig::default()).await
    }

    pub fn dyn_clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Codec signing with this harness's ring and verifying through its cache.
    pub fn codec(&self) -> SessionTokenCodec {
        SessionTokenCodec::new(
            Arc::clone(&self.keys),
            Arc::clone(&self.cache),
            self.hosts.clone(),
            self.dyn_clock(),
        )
    }

    pub fn lifecycle(&self, config: LifecycleConfig) -> (SessionLifecycle, Arc<InMemorySessionStore>) {
        let config = SessionConfig {
            authority_hosts: self.hosts.clone(),
            jwks: self.cache.config().clone(),
            signing: self.signing.clone(),
            lifecycle: config,
        };
        let store = Arc::new(InMemorySessionStore::new());
        let lifecycle = SessionLifecycle::from_parts(
            &config,
            Arc::clone(&self.cache),
            store.clone(),
            self.dyn_clock(),
        )
        .expect("test session config is valid");
        (lifecycle, store)
    }

    /// Current unix seconds on the harness clock.
    pub fn now(&self) -> i64 {
        self.clock.unix_seconds()
    }
}
