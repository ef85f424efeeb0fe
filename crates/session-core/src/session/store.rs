//! Server-side session rows.

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

/// One session, keyed by its handle.
#[derive(Clone, PartialEq)]
pub struct SessionRecord {
    pub session_handle: String,
    pub user_id: String,
    pub tenant_id: String,
    /// SHA-256 (hex) of the current refresh token.
    pub refresh_token_hash: String,
    /// Hash of the refresh token rotated out by the last refresh.
    pub parent_refresh_token_hash: Option<String>,
    /// Payload copied into access tokens issued for this session.
    pub access_token_payload: Map<String, Value>,
    pub created_at_ms: i64,
    /// Refresh token expiry.
    pub expires_at_ms: i64,
    pub revoked: bool,
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("session_handle", &self.session_handle)
            .field("user_id", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .field("created_at_ms", &self.created_at_ms)
            .field("expires_at_ms", &self.expires_at_ms)
            .field("revoked", &self.revoked)
            .finish_non_exhaustive()
    }
}

/// Persistence for session rows.
///
/// Implementations must make [`SessionStore::rotate_refresh_token`] atomic:
/// two concurrent refreshes with the same token must not both succeed.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, record: SessionRecord) -> Result<(), StoreError>;

    async fn get(&self, session_handle: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Compare-and-swap the refresh token hash.
    ///
    /// Succeeds only if the row exists, is not revoked, and its current hash is
    /// `expected_hash`. On success the old hash becomes the parent hash.
    async fn rotate_refresh_token(
        &self,
        session_handle: &str,
        expected_hash: &str,
        new_hash: String,
        expires_at_ms: i64,
    ) -> Result<bool, StoreError>;

    /// Mark a session revoked. Returns false if it was unknown or already revoked.
    async fn revoke(&self, session_handle: &str) -> Result<bool, StoreError>;

    /// Revoke every live session of a user, returning the revoked handles.
    async fn revoke_all_for_user(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    /// Handles of a user's live sessions, oldest first.
    async fn handles_for_user(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    /// Replace the access token payload. Returns false if the session is unknown or revoked.
    async fn update_payload(
        &self,
        session_handle: &str,
        payload: Map<String, Value>,
    ) -> Result<bool, StoreError>;
}

/// [`SessionStore`] held in process memory.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, record: SessionRecord) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&record.session_handle) {
            return Err(StoreError(format!(
                "session {} already exists",
                record.session_handle
            )));
        }
        sessions.insert(record.session_handle.clone(), record);
        Ok(())
    }

    async fn get(&self, session_handle: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.sessions.read().await.get(session_handle).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        session_handle: &str,
        expected_hash: &str,
        new_hash: String,
        expires_at_ms: i64,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        let Some(record) = sessions.get_mut(session_handle) else {
            return Ok(false);
        };
        if record.revoked || record.refresh_token_hash != expected_hash {
            return Ok(false);
        }
        record.parent_refresh_token_hash =
            Some(std::mem::replace(&mut record.refresh_token_hash, new_hash));
        record.expires_at_ms = expires_at_ms;
        Ok(true)
    }

    async fn revoke(&self, session_handle: &str) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(match sessions.get_mut(session_handle) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                true
            }
            _ => false,
        })
    }

    async fn revoke_all_for_user(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let mut sessions = self.sessions.write().await;
        let mut revoked: Vec<(i64, String)> = sessions
            .values_mut()
            .filter(|record| record.user_id == user_id && !record.revoked)
            .map(|record| {
                record.revoked = true;
                (record.created_at_ms, record.session_handle.clone())
            })
            .collect();
        revoked.sort();
        Ok(revoked.into_iter().map(|(_, handle)| handle).collect())
    }

    async fn handles_for_user(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut handles: Vec<(i64, String)> = sessions
            .values()
            .filter(|record| record.user_id == user_id && !record.revoked)
            .map(|record| (record.created_at_ms, record.session_handle.clone()))
            .collect();
        handles.sort();
        Ok(handles.into_iter().map(|(_, handle)| handle).collect())
    }

    async fn update_payload(
        &self,
        session_handle: &str,
        payload: Map<String, Value>,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(match sessions.get_mut(session_handle) {
            Some(record) if !record.revoked => {
                record.access_token_payload = payload;
                true
            }
            _ => false,
        })
    }
}
