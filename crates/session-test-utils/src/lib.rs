//! # Session Test Utilities
//!
//! Shared test utilities for the session layer.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed master secret, foreign keys)
//! - Fake authority hosts (`TestAuthority`, wiremock-backed)
//! - A scripted in-process key transport (`ScriptedFetcher`)
//! - Claim builders (`TestClaimsBuilder`)
//! - Custom assertions (`TokenAssertions` trait)
//! - Test log setup (`init_test_tracing`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let clock = Arc::new(ManualClock::new());
//!     let keys = Arc::new(test_key_ring(test_signing_config(Duration::from_secs(60), 2)));
//!     let authority = TestAuthority::start(keys.clone(), clock.clone()).await;
//!
//!     let tokens = lifecycle.create("alice", None, Map::new()).await?;
//!     tokens.access_token
//!         .assert_valid_jwt()
//!         .assert_for_subject("alice");
//! }
//! ```

pub mod assertions;
pub mod authority;
pub mod crypto_fixtures;
pub mod scripted_fetcher;
pub mod token_builders;
pub mod tracing_init;

// Re-export commonly used items
pub use assertions::*;
pub use authority::*;
pub use crypto_fixtures::*;
pub use scripted_fetcher::*;
pub use token_builders::*;
pub use tracing_init::*;
