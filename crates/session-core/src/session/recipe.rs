//! Upward session interface and override decorators.
//!
//! Applications call the session layer through [`SessionRecipe`]. Overrides
//! wrap a [`SharedRecipe`] with a [`tower::Layer`]; each layer sees every call
//! and decides whether to delegate to the inner recipe.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use session_core::config::SessionConfig;
//! # use session_core::session::{layered, SessionLifecycle, SharedRecipe, TracingLayer};
//! # fn wire(config: &SessionConfig) -> Result<SharedRecipe, session_core::config::ConfigError> {
//! let base: SharedRecipe = Arc::new(SessionLifecycle::from_config(config)?);
//! let recipe = layered(base, TracingLayer::new());
//! # Ok(recipe)
//! # }
//! ```

use crate::error::Result;
use crate::session::lifecycle::{SessionLifecycle, SessionTokens, VerifyOptions};
use crate::token::VerifiedClaims;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::Layer;
use tracing::{info_span, Instrument};

/// Per-request values passed through every layer unmodified.
pub type UserContext = HashMap<String, Value>;

/// Session operations exposed to applications.
#[async_trait]
pub trait SessionRecipe: Send + Sync {
    async fn create_session(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        payload: Map<String, Value>,
        ctx: &UserContext,
    ) -> Result<SessionTokens>;

    async fn verify_session(
        &self,
        access_token: &str,
        options: VerifyOptions,
        ctx: &UserContext,
    ) -> Result<VerifiedClaims>;

    async fn refresh_session(&self, refresh_token: &str, ctx: &UserContext) -> Result<SessionTokens>;

    async fn revoke_session(&self, session_handle: &str, ctx: &UserContext) -> Result<bool>;
}

/// Type-erased recipe that layers wrap.
pub type SharedRecipe = Arc<dyn SessionRecipe>;

#[async_trait]
impl SessionRecipe for SessionLifecycle {
    async fn create_session(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        payload: Map<String, Value>,
        _ctx: &UserContext,
    ) -> Result<SessionTokens> {
        self.create(user_id, tenant_id, payload).await
    }

    async fn verify_session(
        &self,
        access_token: &str,
        options: VerifyOptions,
        _ctx: &UserContext,
    ) -> Result<VerifiedClaims> {
        self.verify(access_token, options).await
    }

    async fn refresh_session(&self, refresh_token: &str, _ctx: &UserContext) -> Result<SessionTokens> {
        self.refresh(refresh_token).await
    }

    async fn revoke_session(&self, session_handle: &str, _ctx: &UserContext) -> Result<bool> {
        self.revoke(session_handle).await
    }
}

#[async_trait]
impl<T: SessionRecipe + ?Sized> SessionRecipe for Arc<T> {
    async fn create_session(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        payload: Map<String, Value>,
        ctx: &UserContext,
    ) -> Result<SessionTokens> {
        (**self).create_session(user_id, tenant_id, payload, ctx).await
    }

    async fn verify_session(
        &self,
        access_token: &str,
        options: VerifyOptions,
        ctx: &UserContext,
    ) -> Result<VerifiedClaims> {
        (**self).verify_session(access_token, options, ctx).await
    }

    async fn refresh_session(&self, refresh_token: &str, ctx: &UserContext) -> Result<SessionTokens> {
        (**self).refresh_session(refresh_token, ctx).await
    }

    async fn revoke_session(&self, session_handle: &str, ctx: &UserContext) -> Result<bool> {
        (**self).revoke_session(session_handle, ctx).await
    }
}

/// Wrap `base` with `layer`, returning a new shared recipe.
///
/// Call repeatedly to stack overrides; the last layer applied runs first.
pub fn layered<L>(base: SharedRecipe, layer: L) -> SharedRecipe
where
    L: Layer<SharedRecipe>,
    L::Service: SessionRecipe + 'static,
{
    Arc::new(layer.layer(base))
}

/// Layer that opens a span around every session operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLayer;

impl TracingLayer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingRecipe<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingRecipe { inner }
    }
}

/// Recipe produced by [`TracingLayer`].
#[derive(Debug, Clone)]
pub struct TracingRecipe<S> {
    inner: S,
}

#[async_trait]
impl<S: SessionRecipe> SessionRecipe for TracingRecipe<S> {
    async fn create_session(
        &self,
        user_id: &str,
        tenant_id: Option<&str>,
        payload: Map<String, Value>,
        ctx: &UserContext,
    ) -> Result<SessionTokens> {
        let span = info_span!(target: "session.lifecycle", "session.create", tenant = tenant_id);
        self.inner
            .create_session(user_id, tenant_id, payload, ctx)
            .instrument(span)
            .await
    }

    async fn verify_session(
        &self,
        access_token: &str,
        options: VerifyOptions,
        ctx: &UserContext,
    ) -> Result<VerifiedClaims> {
        let span = info_span!(
            target: "session.lifecycle",
            "session.verify",
            check_store = options.check_store
        );
        self.inner
            .verify_session(access_token, options, ctx)
            .instrument(span)
            .await
    }

    async fn refresh_session(&self, refresh_token: &str, ctx: &UserContext) -> Result<SessionTokens> {
        let span = info_span!(target: "session.lifecycle", "session.refresh");
        self.inner
            .refresh_session(refresh_token, ctx)
            .instrument(span)
            .await
    }

    async fn revoke_session(&self, session_handle: &str, ctx: &UserContext) -> Result<bool> {
        let span = info_span!(target: "session.lifecycle", "session.revoke");
        self.inner
            .revoke_session(session_handle, ctx)
            .instrument(span)
            .await
    }
}
