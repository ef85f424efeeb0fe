//! Secret types for values that must never reach logs.
//!
//! Re-exports the [`secrecy`] types used for the signing master secret and for
//! refresh tokens. `SecretString` and `SecretBox<T>` implement `Debug` with
//! redaction, so structs that derive `Debug` stay safe to log. Secrets are
//! zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use session_core::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Issued {
//!     session_handle: String,
//!     refresh_token: SecretString,
//! }
//!
//! let issued = Issued {
//!     session_handle: "7f9c".to_string(),
//!     refresh_token: SecretString::from("opaque.7f9c"),
//! };
//!
//! assert!(!format!("{issued:?}").contains("opaque"));
//! assert_eq!(issued.refresh_token.expose_secret(), "opaque.7f9c");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
