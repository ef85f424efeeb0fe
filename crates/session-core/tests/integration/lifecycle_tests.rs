//! Session lifecycle: create, verify, refresh rotation, theft detection, revocation.

use crate::harness::Harness;
use serde_json::{json, Map, Value};
use session_core::config::LifecycleConfig;
use session_core::error::SessionError;
use session_core::session::{
    layered, RefreshToken, SessionRecipe, SessionStore, SharedRecipe, TracingLayer, UserContext,
    VerifyOptions,
};
use session_test_utils::TokenAssertions;
use std::sync::Arc;
use std::time::Duration;

fn payload(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(key, value)| ((*key).to_string(), value.clone()))
        .collect()
}

// ============================================================================
// Create and verify
// ============================================================================

#[tokio::test]
async fn test_create_issues_verifiable_tokens() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let (lifecycle, store) = harness.lifecycle(LifecycleConfig::default());

    let tokens = lifecycle
        .create("alice", None, payload(&[("role", json!("admin"))]))
        .await?;

    tokens
        .access_token
        .assert_valid_jwt()
        .assert_signed_by("d-472222")
        .assert_for_subject("alice")
        .assert_session_handle(&tokens.session_handle)
        .assert_lifetime(3600);
    assert_eq!(
        RefreshToken::session_handle_of(tokens.refresh_token.expose_secret()),
        Some(tokens.session_handle.as_str())
    );

    let verified = lifecycle
        .verify(tokens.access_token.as_str(), VerifyOptions::check_store())
        .await?;
    assert_eq!(verified.user_id(), "alice");
    assert_eq!(verified.claims.tenant_id, "public");
    assert_eq!(verified.claims.payload.get("role"), Some(&json!("admin")));
    assert_eq!(
        verified.claims.refresh_token_hash,
        RefreshToken::hash(tokens.refresh_token.expose_secret())
    );

    let record = lifecycle
        .session_information(&tokens.session_handle)
        .await?
        .unwrap();
    assert_eq!(record.user_id, "alice");
    assert!(!record.revoked);
    assert_eq!(store.len().await, 1);

    Ok(())
}

#[tokio::test]
async fn test_static_signing_mode_issues_tokens_without_kid() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let (lifecycle, _) =
        harness.lifecycle(LifecycleConfig::default().with_dynamic_signing_key(false));

    let tokens = lifecycle.create("bob", Some("tenant-7"), Map::new()).await?;
    tokens.access_token.assert_static_key();

    let verified = lifecycle
        .verify(tokens.access_token.as_str(), VerifyOptions::default())
        .await?;
    assert_eq!(verified.claims.tenant_id, "tenant-7");
    assert_eq!(harness.authority.request_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_create_rejects_protected_payload_keys() {
    let harness = Harness::hourly().await;
    let (lifecycle, store) = harness.lifecycle(LifecycleConfig::default());

    let err = lifecycle
        .create("alice", None, payload(&[("sessionHandle", json!("spoofed"))]))
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::InvalidPayload(_)));
    assert_eq!(err.status_code(), 400);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_expired_access_token_rejected() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let (lifecycle, _) = harness.lifecycle(
        LifecycleConfig::default().with_access_token_validity(Duration::from_secs(60)),
    );
    let tokens = lifecycle.create("alice", None, Map::new()).await?;

    harness.clock.advance(Duration::from_secs(60));

    let err = lifecycle
        .verify(tokens.access_token.as_str(), VerifyOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_auth_failure());
    assert_eq!(err.status_code(), 401);
    assert_eq!(harness.authority.request_count(), 0);

    Ok(())
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn test_refresh_rotates_refresh_token() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let (lifecycle, _) = harness.lifecycle(LifecycleConfig::default());
    let first = lifecycle.create("alice", None, Map::new()).await?;

    harness.clock.advance(Duration::from_secs(30));
    let second = lifecycle
        .refresh(first.refresh_token.expose_secret())
        .await?;

    assert_eq!(second.session_handle, first.session_handle);
    assert_ne!(
        second.refresh_token.expose_secret(),
        first.refresh_token.expose_secret()
    );
    assert!(second.access_token.expires_at() > first.access_token.expires_at());

    let verified = lifecycle
        .verify(second.access_token.as_str(), VerifyOptions::check_store())
        .await?;
    assert_eq!(
        verified.claims.parent_refresh_token_hash,
        Some(RefreshToken::hash(first.refresh_token.expose_secret()))
    );

    // The rotated token keeps working for the next refresh.
    let third = lifecycle
        .refresh(second.refresh_token.expose_secret())
        .await?;
    assert_eq!(third.session_handle, first.session_handle);

    Ok(())
}

#[tokio::test]
async fn test_reusing_rotated_refresh_token_revokes_session() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let (lifecycle, _) = harness.lifecycle(LifecycleConfig::default());
    let first = lifecycle.create("alice", None, Map::new()).await?;
    let second = lifecycle
        .refresh(first.refresh_token.expose_secret())
        .await?;

    let err = lifecycle
        .refresh(first.refresh_token.expose_secret())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SessionError::TokenTheftDetected {
            session_handle: first.session_handle.clone(),
            user_id: "alice".to_string(),
        }
    );

    // The legitimate holder is locked out too.
    let err = lifecycle
        .refresh(second.refresh_token.expose_secret())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Unauthorised(_)));

    let err = lifecycle
        .verify(second.access_token.as_str(), VerifyOptions::check_store())
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::Revoked);

    Ok(())
}

#[tokio::test]
async fn test_refresh_rejects_unknown_and_malformed_tokens() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let (lifecycle, _) = harness.lifecycle(LifecycleConfig::default());
    let tokens = lifecycle.create("alice", None, Map::new()).await?;

    for presented in [
        "no-separator".to_string(),
        "random.unknown-session".to_string(),
        format!("forged.{}", tokens.session_handle),
    ] {
        let err = lifecycle.refresh(&presented).await.unwrap_err();
        assert!(
            matches!(err, SessionError::Unauthorised(_)),
            "{presented}: {err:?}"
        );
    }

    // A forged token does not count as reuse: the real one still works.
    lifecycle
        .refresh(tokens.refresh_token.expose_secret())
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_expired_refresh_token_rejected() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let (lifecycle, _) = harness.lifecycle(
        LifecycleConfig::default().with_refresh_token_validity(Duration::from_secs(120)),
    );
    let tokens = lifecycle.create("alice", None, Map::new()).await?;

    harness.clock.advance(Duration::from_secs(120));

    let err = lifecycle
        .refresh(tokens.refresh_token.expose_secret())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Unauthorised(_)));

    Ok(())
}

#[tokio::test]
async fn test_failed_signing_leaves_refresh_token_current() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let (lifecycle, store) = harness.lifecycle(LifecycleConfig::default());
    let tokens = lifecycle.create("alice", None, Map::new()).await?;

    // Written straight to the store, so the next access token cannot be signed.
    store
        .update_payload(&tokens.session_handle, payload(&[("exp", json!(0))]))
        .await?;
    let err = lifecycle
        .refresh(tokens.refresh_token.expose_secret())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Token(_)), "{err:?}");

    let record = store.get(&tokens.session_handle).await?.unwrap();
    assert_eq!(
        record.refresh_token_hash,
        RefreshToken::hash(tokens.refresh_token.expose_secret())
    );
    assert!(!record.revoked);

    // Once the payload is fixed the same token refreshes normally.
    store
        .update_payload(&tokens.session_handle, payload(&[("plan", json!("pro"))]))
        .await?;
    let refreshed = lifecycle
        .refresh(tokens.refresh_token.expose_secret())
        .await?;
    assert_eq!(refreshed.session_handle, tokens.session_handle);

    Ok(())
}

#[tokio::test]
async fn test_updated_payload_applies_from_next_refresh() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let (lifecycle, _) = harness.lifecycle(LifecycleConfig::default());
    let tokens = lifecycle
        .create("alice", None, payload(&[("plan", json!("free"))]))
        .await?;

    assert!(
        lifecycle
            .update_access_token_payload(&tokens.session_handle, payload(&[("plan", json!("pro"))]))
            .await?
    );
    let err = lifecycle
        .update_access_token_payload(&tokens.session_handle, payload(&[("exp", json!(0))]))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidPayload(_)));

    let current = lifecycle
        .verify(tokens.access_token.as_str(), VerifyOptions::default())
        .await?;
    assert_eq!(current.claims.payload.get("plan"), Some(&json!("free")));

    let refreshed = lifecycle
        .refresh(tokens.refresh_token.expose_secret())
        .await?;
    let next = lifecycle
        .verify(refreshed.access_token.as_str(), VerifyOptions::default())
        .await?;
    assert_eq!(next.claims.payload.get("plan"), Some(&json!("pro")));

    Ok(())
}

// ============================================================================
// Revocation
// ============================================================================

#[tokio::test]
async fn test_revoked_session_fails_store_checked_verification() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let (lifecycle, _) = harness.lifecycle(LifecycleConfig::default());
    let tokens = lifecycle.create("alice", None, Map::new()).await?;

    assert!(lifecycle.revoke(&tokens.session_handle).await?);
    assert!(!lifecycle.revoke(&tokens.session_handle).await?);

    // Stateless verification still accepts the token until it expires.
    lifecycle
        .verify(tokens.access_token.as_str(), VerifyOptions::default())
        .await?;

    let err = lifecycle
        .verify(tokens.access_token.as_str(), VerifyOptions::check_store())
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::Revoked);
    assert_eq!(err.status_code(), 401);

    let err = lifecycle
        .refresh(tokens.refresh_token.expose_secret())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Unauthorised(_)));

    Ok(())
}

#[tokio::test]
async fn test_user_sessions_listed_and_revoked_together() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let (lifecycle, _) = harness.lifecycle(LifecycleConfig::default());

    let older = lifecycle.create("alice", None, Map::new()).await?;
    harness.clock.advance(Duration::from_secs(1));
    let newer = lifecycle.create("alice", None, Map::new()).await?;
    let other = lifecycle.create("bob", None, Map::new()).await?;

    assert_eq!(
        lifecycle.session_handles_for_user("alice").await?,
        vec![older.session_handle.clone(), newer.session_handle.clone()]
    );

    let revoked = lifecycle.revoke_all_for_user("alice").await?;
    assert_eq!(revoked, vec![older.session_handle, newer.session_handle]);
    assert!(lifecycle.session_handles_for_user("alice").await?.is_empty());
    assert_eq!(
        lifecycle.session_handles_for_user("bob").await?,
        vec![other.session_handle]
    );

    Ok(())
}

// ============================================================================
// Recipe interface
// ============================================================================

#[tokio::test]
async fn test_lifecycle_behind_recipe_layers() -> Result<(), anyhow::Error> {
    let harness = Harness::hourly().await;
    let (lifecycle, _) = harness.lifecycle(LifecycleConfig::default());
    let recipe = layered(Arc::new(lifecycle) as SharedRecipe, TracingLayer::new());
    let ctx = UserContext::new();

    let tokens = recipe.create_session("alice", None, Map::new(), &ctx).await?;
    let verified = recipe
        .verify_session(tokens.access_token.as_str(), VerifyOptions::check_store(), &ctx)
        .await?;
    assert_eq!(verified.session_handle(), tokens.session_handle);

    let refreshed = recipe
        .refresh_session(tokens.refresh_token.expose_secret(), &ctx)
        .await?;
    assert!(recipe.revoke_session(&refreshed.session_handle, &ctx).await?);

    let err = recipe
        .verify_session(refreshed.access_token.as_str(), VerifyOptions::check_store(), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::Revoked);

    Ok(())
}
