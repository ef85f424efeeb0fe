//! JWKS cache behaviour across real HTTP hosts and concurrent callers.

use crate::harness::{Harness, START_MS};
use session_core::clock::ManualClock;
use session_core::config::{AuthorityHosts, JwksCacheConfig};
use session_core::error::{FetchError, JwksError};
use session_core::jwks::{HttpKeyFetcher, JwksCache, KeySet};
use session_test_utils::{
    hosts_of, test_key_ring, test_signing_config, HostScript, ScriptedFetcher,
    TestAuthority,
};
use std::sync::Arc;
use std::time::Duration;

fn published_keys() -> KeySet {
    test_key_ring(test_signing_config(Duration::from_secs(3600), 2))
        .published_keys_at(START_MS)
        .unwrap()
}

// ============================================================================
// Host fallback
// ============================================================================

#[tokio::test]
async fn test_hosts_tried_in_order_until_first_success() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let bad1 = TestAuthority::failing().await;
    let bad2 = TestAuthority::failing().await;
    let unused = TestAuthority::failing().await;
    let hosts = hosts_of(&[&bad1, &bad2, &harness.authority, &unused]);

    let keys = harness.cache.get_keys(&hosts).await?;

    assert_eq!(keys.len(), 2);
    assert_eq!(bad1.request_count(), 1);
    assert_eq!(bad2.request_count(), 1);
    assert_eq!(harness.authority.request_count(), 1);
    assert_eq!(unused.request_count(), 0, "hosts after the first success are never contacted");

    // Second call within max age is a cache hit: no host contacted again.
    let again = harness.cache.get_keys(&hosts).await?;
    assert!(Arc::ptr_eq(&keys, &again));
    assert_eq!(bad1.request_count() + bad2.request_count(), 2);
    assert_eq!(harness.authority.request_count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_all_hosts_down_reports_attempts() {
    let harness = Harness::hourly().await;
    let bad1 = TestAuthority::failing().await;
    let bad2 = TestAuthority::failing().await;
    let hosts = hosts_of(&[&bad1, &bad2]);

    let err = harness.cache.get_keys(&hosts).await.unwrap_err();

    match err {
        JwksError::AllHostsFailed {
            attempted,
            last_error,
        } => {
            assert_eq!(attempted, 2);
            assert_eq!(last_error.host(), bad2.host().as_str());
            assert!(matches!(last_error, FetchError::Network { .. }));
        }
        other => unreachable!("expected AllHostsFailed, got {other:?}"),
    }
}

// ============================================================================
// Freshness
// ============================================================================

#[tokio::test]
async fn test_single_fetch_within_max_age() -> Result<(), anyhow::Error> {
    let config = JwksCacheConfig::default().with_cache_max_age(Duration::from_secs(10));
    let harness = Harness::start(Duration::from_secs(3600), 2, config).await;

    for _ in 0..9 {
        harness.cache.get_keys(&harness.hosts).await?;
        harness.clock.advance(Duration::from_secs(1));
    }
    assert_eq!(harness.authority.request_count(), 1);

    harness.clock.advance(Duration::from_secs(1));
    harness.cache.get_keys(&harness.hosts).await?;
    assert_eq!(harness.authority.request_count(), 2);

    let stats = harness.cache.stats();
    assert_eq!(stats.refreshes, 2);
    assert_eq!(stats.cache_hits, 8);

    Ok(())
}

#[tokio::test]
async fn test_outage_serves_stale_keys_and_rate_limits_retries() -> Result<(), anyhow::Error> {
    let config = JwksCacheConfig::default()
        .with_cache_max_age(Duration::from_secs(10))
        .with_refresh_rate_limit(Duration::from_secs(1));
    let harness = Harness::start(Duration::from_secs(3600), 2, config).await;

    let primed = harness.cache.get_keys(&harness.hosts).await?;
    harness.authority.set_failing(true);
    harness.clock.advance(Duration::from_secs(11));

    let stale = harness.cache.get_keys(&harness.hosts).await?;
    assert!(Arc::ptr_eq(&primed, &stale));
    assert_eq!(harness.authority.request_count(), 2);

    // Retry inside the rate limit: no request reaches the host.
    let stale = harness.cache.get_keys(&harness.hosts).await?;
    assert!(Arc::ptr_eq(&primed, &stale));
    assert_eq!(harness.authority.request_count(), 2);

    harness.authority.set_failing(false);
    harness.clock.advance(Duration::from_secs(1));
    let recovered = harness.cache.get_keys(&harness.hosts).await?;
    assert_eq!(*recovered, *primed);
    assert_eq!(harness.authority.request_count(), 3);

    Ok(())
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_fetch() {
    let fetcher = Arc::new(ScriptedFetcher::new().with_script(
        "http://authority",
        HostScript::Slow(published_keys(), Duration::from_millis(100)),
    ));
    let cache = Arc::new(JwksCache::new(
        fetcher.clone(),
        Arc::new(ManualClock::starting_at(START_MS)),
        JwksCacheConfig::default(),
    ));
    let hosts: AuthorityHosts = "http://authority".parse().unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let hosts = hosts.clone();
            tokio::spawn(async move { cache.get_keys(&hosts).await })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(fetcher.call_count(), 1);
    let first = results.first().unwrap();
    assert!(results.iter().all(|keys| Arc::ptr_eq(keys, first)));
}

#[tokio::test(start_paused = true)]
async fn test_waiter_gives_up_on_hung_refresh_with_stale_keys() {
    let clock = Arc::new(ManualClock::starting_at(START_MS));
    let fetcher = Arc::new(
        ScriptedFetcher::new().with_script("http://authority", HostScript::Keys(published_keys())),
    );
    let config = JwksCacheConfig::default()
        .with_cache_max_age(Duration::from_secs(10))
        .with_fetch_timeout(Duration::from_secs(600))
        .with_lock_wait_timeout(Duration::from_secs(2));
    let cache = Arc::new(JwksCache::new(fetcher.clone(), clock.clone(), config));
    let hosts: AuthorityHosts = "http://authority".parse().unwrap();

    let primed = cache.get_keys(&hosts).await.unwrap();
    clock.advance(Duration::from_secs(11));
    fetcher.set_script("http://authority", HostScript::Hang);

    let holder = {
        let cache = Arc::clone(&cache);
        let hosts = hosts.clone();
        tokio::spawn(async move { cache.get_keys(&hosts).await })
    };
    while fetcher.call_count() < 2 {
        tokio::task::yield_now().await;
    }

    let started = tokio::time::Instant::now();
    let waited = cache.get_keys(&hosts).await.unwrap();

    assert!(Arc::ptr_eq(&primed, &waited));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(fetcher.call_count(), 2, "the waiter never fetches itself");
    holder.abort();
}

// ============================================================================
// Isolation
// ============================================================================

#[tokio::test]
async fn test_separate_caches_do_not_share_state() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let other = JwksCache::new(
        Arc::new(HttpKeyFetcher::default()),
        harness.dyn_clock(),
        JwksCacheConfig::default(),
    );

    harness.cache.get_keys(&harness.hosts).await?;
    other.get_keys(&harness.hosts).await?;
    assert_eq!(harness.authority.request_count(), 2);

    harness.cache.reset().await;
    assert!(harness.cache.cached_keys(&harness.hosts).await.is_none());
    assert!(other.cached_keys(&harness.hosts).await.is_some());

    Ok(())
}

#[tokio::test]
async fn test_host_order_is_part_of_cache_key() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let second = TestAuthority::start(harness.keys.clone(), harness.dyn_clock()).await;

    harness
        .cache
        .get_keys(&hosts_of(&[&harness.authority, &second]))
        .await?;
    harness
        .cache
        .get_keys(&hosts_of(&[&second, &harness.authority]))
        .await?;

    assert_eq!(harness.authority.request_count(), 1);
    assert_eq!(second.request_count(), 1);

    Ok(())
}
