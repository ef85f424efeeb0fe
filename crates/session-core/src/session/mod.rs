//! Session lifecycle on top of the token codec.

pub mod lifecycle;
pub mod recipe;
pub mod store;

pub use lifecycle::{RefreshToken, SessionLifecycle, SessionTokens, VerifyOptions};
pub use recipe::{layered, SessionRecipe, SharedRecipe, TracingLayer, TracingRecipe, UserContext};
pub use store::{InMemorySessionStore, SessionRecord, SessionStore};
