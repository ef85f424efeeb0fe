//! Access token signing and verification end to end over HTTP key fetches.

use crate::harness::Harness;
use jsonwebtoken::{encode, Algorithm, Header};
use serde_json::json;
use session_core::clock::Clock;
use session_core::config::JwksCacheConfig;
use session_core::error::{JwksError, TokenError};
use session_core::token::{AccessTokenClaims, SigningMode};
use session_test_utils::{foreign_signing_key, TestClaimsBuilder, TokenAssertions};
use std::time::Duration;

fn sign_with_foreign_key(claims: &AccessTokenClaims, kid: &str) -> String {
    let (key, _) = foreign_signing_key(9, kid).unwrap();
    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &key).unwrap()
}

#[tokio::test]
async fn test_dynamic_token_round_trip() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let codec = harness.codec();
    let claims = TestClaimsBuilder::at(harness.now())
        .for_user("alice")
        .with_session_handle("session-1")
        .with_payload("role", json!("admin"))
        .build();

    let token = codec.encode(&claims, SigningMode::Dynamic)?;
    token
        .assert_valid_jwt()
        .assert_signed_by("d-472222")
        .assert_for_subject("alice")
        .assert_session_handle("session-1");

    let verified = codec.decode_and_verify(token.as_str()).await?;

    assert_eq!(verified.claims, claims);
    assert_eq!(verified.key_id.as_deref(), Some("d-472222"));
    assert_eq!(verified.signing_mode, SigningMode::Dynamic);
    assert_eq!(harness.authority.request_count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_static_token_verified_without_contacting_hosts() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    harness.authority.set_failing(true);
    let codec = harness.codec();
    let claims = TestClaimsBuilder::at(harness.now()).for_user("bob").build();

    let token = codec.encode(&claims, SigningMode::Static)?;
    token.assert_valid_jwt().assert_static_key();

    let verified = codec.decode_and_verify(token.as_str()).await?;
    assert_eq!(verified.user_id(), "bob");
    assert_eq!(verified.signing_mode, SigningMode::Static);
    assert_eq!(harness.authority.request_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_expired_token_rejected_before_any_fetch() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let codec = harness.codec();
    let claims = TestClaimsBuilder::at(harness.now()).expires_in(30).build();
    let token = codec.encode(&claims, SigningMode::Dynamic)?;

    harness.clock.advance(Duration::from_secs(30));

    let err = codec.decode_and_verify(token.as_str()).await.unwrap_err();
    assert_eq!(err, TokenError::Expired);
    assert_eq!(harness.authority.request_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_unknown_kid_triggers_exactly_one_forced_refresh() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let codec = harness.codec();
    harness.cache.get_keys(&harness.hosts).await?;
    harness.clock.advance(Duration::from_secs(1));

    let claims = TestClaimsBuilder::at(harness.now()).build();
    let token = sign_with_foreign_key(&claims, "foreign-1");

    let err = codec.decode_and_verify(&token).await.unwrap_err();
    assert_eq!(err, TokenError::UnknownKeyId("foreign-1".to_string()));
    assert_eq!(harness.authority.request_count(), 2);

    // Retry inside the rate limit: still unknown, no further request.
    let err = codec.decode_and_verify(&token).await.unwrap_err();
    assert_eq!(err, TokenError::UnknownKeyId("foreign-1".to_string()));
    assert_eq!(harness.authority.request_count(), 2);

    Ok(())
}

#[tokio::test]
async fn test_foreign_signature_under_published_kid_rejected() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let codec = harness.codec();
    let kid = harness.keys.key_id_at(harness.clock.unix_millis());
    let claims = TestClaimsBuilder::at(harness.now()).build();

    let token = sign_with_foreign_key(&claims, &kid);

    let err = codec.decode_and_verify(&token).await.unwrap_err();
    assert_eq!(err, TokenError::InvalidSignature);
    assert!(err.is_auth_failure());

    Ok(())
}

#[tokio::test]
async fn test_hosts_down_is_infrastructure_failure() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    harness.authority.set_failing(true);
    let codec = harness.codec();
    let claims = TestClaimsBuilder::at(harness.now()).build();
    let token = codec.encode(&claims, SigningMode::Dynamic)?;

    let err = codec.decode_and_verify(token.as_str()).await.unwrap_err();

    assert!(matches!(
        err,
        TokenError::KeysUnavailable(JwksError::AllHostsFailed { attempted: 1, .. })
    ));
    assert!(!err.is_auth_failure());

    Ok(())
}

#[tokio::test]
async fn test_rotated_kid_during_outage_is_infrastructure_failure() -> Result<(), anyhow::Error> {
    let jwks = JwksCacheConfig::default().with_cache_max_age(Duration::from_secs(600));
    let harness = Harness::start(Duration::from_secs(60), 4, jwks).await;
    let codec = harness.codec();

    let before = codec.encode(&TestClaimsBuilder::at(harness.now()).build(), SigningMode::Dynamic)?;
    codec.decode_and_verify(before.as_str()).await?;

    harness.clock.advance(Duration::from_secs(61));
    harness.authority.set_failing(true);

    let rotated = codec.encode(&TestClaimsBuilder::at(harness.now()).build(), SigningMode::Dynamic)?;
    let err = codec.decode_and_verify(rotated.as_str()).await.unwrap_err();
    assert!(matches!(
        err,
        TokenError::KeysUnavailable(JwksError::AllHostsFailed { .. })
    ));
    assert!(!err.is_auth_failure());
    assert_eq!(harness.authority.request_count(), 2);

    // Retry inside the rate limit: still an outage, not an unknown key.
    let err = codec.decode_and_verify(rotated.as_str()).await.unwrap_err();
    assert!(!err.is_auth_failure());
    assert_eq!(harness.authority.request_count(), 2);

    // Tokens under cached keys keep verifying.
    codec.decode_and_verify(before.as_str()).await?;

    Ok(())
}

#[tokio::test]
async fn test_future_iat_outside_skew_rejected() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let codec = harness.codec().with_clock_skew(Duration::from_secs(60));

    let within = TestClaimsBuilder::at(harness.now()).issued_in(60).build();
    let token = codec.encode(&within, SigningMode::Static)?;
    codec.decode_and_verify(token.as_str()).await?;

    let beyond = TestClaimsBuilder::at(harness.now()).issued_in(61).build();
    let token = codec.encode(&beyond, SigningMode::Static)?;
    let err = codec.decode_and_verify(token.as_str()).await.unwrap_err();
    assert_eq!(err, TokenError::InvalidClaims("iat"));

    Ok(())
}
