//! Session credential layer: access token signing and verification against
//! remote key sets, plus session create / verify / refresh / revoke.
//!
//! Public keys are fetched from one or more authority hosts as JWKS documents
//! and cached per host list by [`jwks::JwksCache`]. Access tokens are EdDSA
//! JWS signed with keys from [`keys::SigningKeyRing`] and checked by
//! [`token::SessionTokenCodec`]. [`session::SessionLifecycle`] ties the codec
//! to a [`session::SessionStore`] for refresh token rotation and revocation.

#![warn(clippy::pedantic)]

/// Module for the injectable time source
pub mod clock;

/// Module for configuration loaded from the environment
pub mod config;

/// Module for error types at each layer
pub mod error;

/// Module for JWKS fetching, resolution across hosts, and caching
pub mod jwks;

/// Module for JWT inspection and claim time checks
pub mod jwt;

/// Module for signing key derivation
pub mod keys;

/// Module for metrics and log correlation helpers
pub mod observability;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for the session lifecycle, store and override layers
pub mod session;

/// Module for access token claims and the token codec
pub mod token;

pub use error::{Result, SessionError, TokenError};
