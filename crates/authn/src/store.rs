//! Collaborator interfaces for canonical user and session records.
//!
//! The security core never owns these records. It reads users on cache
//! misses and enumerates sessions during bulk invalidation.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medianest_storage::StorageResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Account status of a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// May authenticate.
    Active,
    /// Deactivated by an administrator.
    Inactive,
    /// Temporarily blocked.
    Suspended,
}

impl UserStatus {
    /// Whether the status admits authentication.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Canonical user record as served by the user store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    /// User id.
    pub id: String,
    /// Login email.
    pub email: String,
    /// Current role.
    pub role: String,
    /// Account status.
    pub status: UserStatus,
}

/// Reference to a session's token, in whichever form the session store keeps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionToken {
    /// The raw token string.
    Raw(String),
    /// SHA-256 hex digest of the token.
    Hash(String),
}

/// Session record as served by the session store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    /// Session id.
    pub session_id: String,
    /// The session's token reference.
    pub token: SessionToken,
    /// IP the session was created from.
    pub ip_address: String,
    /// When the session's token expires, if known.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Source of canonical user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetches a user by id. `Ok(None)` when the user does not exist.
    async fn fetch_user(&self, user_id: &str) -> StorageResult<Option<UserRecord>>;
}

/// Source of active session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Lists the sessions currently held by `user_id`.
    async fn find_sessions_for_user(&self, user_id: &str) -> StorageResult<Vec<SessionRecord>>;
}

/// In-memory [`UserStore`] for tests and development.
#[derive(Clone, Default)]
pub struct MemoryUserStore {
    users: Arc<RwLock<HashMap<String, UserRecord>>>,
}

impl MemoryUserStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a user.
    pub fn upsert(&self, user: UserRecord) {
        self.users.write().insert(user.id.clone(), user);
    }

    /// Updates a user's role. Returns `false` if the user is unknown.
    pub fn set_role(&self, user_id: &str, role: impl Into<String>) -> bool {
        self.users.write().get_mut(user_id).map(|u| u.role = role.into()).is_some()
    }

    /// Updates a user's status. Returns `false` if the user is unknown.
    pub fn set_status(&self, user_id: &str, status: UserStatus) -> bool {
        self.users.write().get_mut(user_id).map(|u| u.status = status).is_some()
    }

    /// Removes a user.
    pub fn remove(&self, user_id: &str) {
        self.users.write().remove(user_id);
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn fetch_user(&self, user_id: &str) -> StorageResult<Option<UserRecord>> {
        Ok(self.users.read().get(user_id).cloned())
    }
}

/// In-memory [`SessionStore`] for tests and development.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Vec<SessionRecord>>>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a session for `user_id`.
    pub fn add(&self, user_id: &str, session: SessionRecord) {
        self.sessions.write().entry(user_id.to_owned()).or_default().push(session);
    }

    /// Drops every session of `user_id`.
    pub fn clear(&self, user_id: &str) {
        self.sessions.write().remove(user_id);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn find_sessions_for_user(&self, user_id: &str) -> StorageResult<Vec<SessionRecord>> {
        Ok(self.sessions.read().get(user_id).cloned().unwrap_or_default())
    }
}
