//! Dynamic signing key rotation as seen by a verifier.
//!
//! Keys rotate every 1.5s and the authority publishes the last eight, so a
//! token stays verifiable for about twelve seconds of rotations.

use crate::harness::Harness;
use session_core::config::JwksCacheConfig;
use session_core::error::TokenError;
use session_core::token::SigningMode;
use session_test_utils::{TestClaimsBuilder, TokenAssertions};
use std::time::Duration;

const UPDATE_INTERVAL: Duration = Duration::from_millis(1500);
const KEY_HISTORY: u32 = 8;

async fn rotating_harness() -> Harness {
    let jwks = JwksCacheConfig::default().with_cache_max_age(Duration::from_secs(10));
    Harness::start(UPDATE_INTERVAL, KEY_HISTORY, jwks).await
}

#[tokio::test]
async fn test_old_token_verifies_while_its_key_is_published() -> Result<(), anyhow::Error> {
    let harness = rotating_harness().await;
    let codec = harness.codec();

    let old = codec.encode(&TestClaimsBuilder::at(harness.now()).build(), SigningMode::Dynamic)?;
    old.assert_signed_by("d-1133333333");
    codec.decode_and_verify(old.as_str()).await?;
    assert_eq!(harness.authority.request_count(), 1);

    harness.clock.advance(Duration::from_secs(5));

    let new = codec.encode(&TestClaimsBuilder::at(harness.now()).build(), SigningMode::Dynamic)?;
    new.assert_signed_by("d-1133333336");

    // Old kid still in the cached set: no fetch.
    codec.decode_and_verify(old.as_str()).await?;
    assert_eq!(harness.authority.request_count(), 1);

    // New kid not cached yet: one forced refresh picks it up.
    let verified = codec.decode_and_verify(new.as_str()).await?;
    assert_eq!(verified.key_id.as_deref(), Some("d-1133333336"));
    assert_eq!(harness.authority.request_count(), 2);

    // Both still verify from the refreshed set.
    codec.decode_and_verify(old.as_str()).await?;
    codec.decode_and_verify(new.as_str()).await?;
    assert_eq!(harness.authority.request_count(), 2);

    Ok(())
}

#[tokio::test]
async fn test_token_rejected_once_its_key_is_pruned() -> Result<(), anyhow::Error> {
    let harness = rotating_harness().await;
    let codec = harness.codec();

    let old = codec.encode(&TestClaimsBuilder::at(harness.now()).build(), SigningMode::Dynamic)?;
    codec.decode_and_verify(old.as_str()).await?;

    // Eleven rotations later the authority no longer publishes the old key.
    harness.clock.advance(Duration::from_secs(17));

    let err = codec.decode_and_verify(old.as_str()).await.unwrap_err();
    assert_eq!(err, TokenError::UnknownKeyId("d-1133333333".to_string()));

    // Stale refresh plus the rate-limited forced refresh: one new request.
    assert_eq!(harness.authority.request_count(), 2);

    let current = codec.encode(&TestClaimsBuilder::at(harness.now()).build(), SigningMode::Dynamic)?;
    codec.decode_and_verify(current.as_str()).await?;
    assert_eq!(harness.authority.request_count(), 2);

    Ok(())
}

#[tokio::test]
async fn test_static_tokens_survive_rotation() -> Result<(), anyhow::Error> {
    let harness = rotating_harness().await;
    let codec = harness.codec();

    let token = codec.encode(&TestClaimsBuilder::at(harness.now()).build(), SigningMode::Static)?;
    harness.clock.advance(Duration::from_secs(60));

    codec.decode_and_verify(token.as_str()).await?;
    assert_eq!(harness.authority.request_count(), 0);

    Ok(())
}
