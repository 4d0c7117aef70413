//! Security audit trail.
//!
//! Every security-relevant action (login, logout, revocation, invalidation,
//! rejected tokens, suspicious activity) is appended to a bounded per-user
//! list in the store and emitted as a structured `tracing` event under the
//! `medianest::audit` target for log aggregation.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use medianest_authn::audit::{AuditAction, AuditEvent, SecurityAuditLog};
//! use medianest_storage::MemoryBackend;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let log = SecurityAuditLog::new(Arc::new(MemoryBackend::new()), 1000);
//! let event = AuditEvent::builder()
//!     .user_id("alice")
//!     .action(AuditAction::Logout)
//!     .reason("user_logout")
//!     .build();
//! log.append(&event).await.unwrap();
//! # });
//! ```

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use medianest_storage::{KeyValueStore, StorageError, StorageResult};
use serde::{Deserialize, Serialize};

/// Action recorded by an [`AuditEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Successful authentication.
    Login,
    /// A token was revoked by logout.
    Logout,
    /// A token was revoked for a reason other than logout.
    Revoked,
    /// The user's cached snapshots were dropped.
    CacheInvalidated,
    /// All of a user's sessions were revoked.
    SessionsInvalidated,
    /// A token was replaced and the session generation advanced.
    TokenRotated,
    /// A token was presented from an IP other than its issued-to IP.
    IpMismatch,
    /// A revoked token was presented.
    BlacklistedTokenUsed,
    /// The activity detector flagged the user.
    SuspiciousActivity,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login => write!(f, "login"),
            Self::Logout => write!(f, "logout"),
            Self::Revoked => write!(f, "revoked"),
            Self::CacheInvalidated => write!(f, "cache_invalidated"),
            Self::SessionsInvalidated => write!(f, "sessions_invalidated"),
            Self::TokenRotated => write!(f, "token_rotated"),
            Self::IpMismatch => write!(f, "ip_mismatch"),
            Self::BlacklistedTokenUsed => write!(f, "blacklisted_token_used"),
            Self::SuspiciousActivity => write!(f, "suspicious_activity"),
        }
    }
}

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// The user the event concerns.
    #[builder(into)]
    pub user_id: String,
    /// What happened.
    pub action: AuditAction,
    /// Free-form reason, e.g. `user_logout` or `role_change`.
    #[builder(into)]
    pub reason: Option<String>,
    /// Request origin, when known.
    #[builder(into)]
    pub ip_address: Option<String>,
    /// Request user agent, when known.
    #[builder(into)]
    pub user_agent: Option<String>,
}

fn audit_key(user_id: &str) -> Vec<u8> {
    format!("audit:{user_id}").into_bytes()
}

/// Bounded per-user audit list backed by a [`KeyValueStore`].
#[derive(Clone)]
pub struct SecurityAuditLog {
    store: Arc<dyn KeyValueStore>,
    max_entries: usize,
}

impl SecurityAuditLog {
    /// Creates a log keeping at most `max_entries` events per user.
    pub fn new(store: Arc<dyn KeyValueStore>, max_entries: usize) -> Self {
        Self { store, max_entries: max_entries.max(1) }
    }

    /// Appends `event` as the newest entry of its user's list.
    ///
    /// The list is trimmed back to the cap only when a push overflows it.
    ///
    /// # Errors
    ///
    /// Returns the store error if the push or trim fails.
    #[tracing::instrument(skip(self, event), fields(user_id = %event.user_id, action = %event.action))]
    pub async fn append(&self, event: &AuditEvent) -> StorageResult<()> {
        tracing::info!(
            target: "medianest::audit",
            audit_user_id = %event.user_id,
            audit_action = %event.action,
            audit_reason = event.reason.as_deref().unwrap_or(""),
            audit_ip_address = event.ip_address.as_deref().unwrap_or(""),
            audit_timestamp = %event.timestamp.to_rfc3339(),
            "security audit event"
        );

        let payload = serde_json::to_vec(event)
            .map_err(|e| StorageError::serialization_with_source("failed to encode audit event", e))?;

        let key = audit_key(&event.user_id);
        let len = self.store.list_push(&key, payload).await?;
        if len > self.max_entries {
            self.store.list_trim(&key, 0, self.max_entries as isize - 1).await?;
        }
        Ok(())
    }

    /// Appends `event`, logging instead of returning a failure.
    ///
    /// Used where the audit write must not change the outcome of the
    /// operation being audited.
    pub async fn append_best_effort(&self, event: &AuditEvent) {
        if let Err(err) = self.append(event).await {
            tracing::warn!(
                user_id = %event.user_id,
                action = %event.action,
                error = %err,
                "failed to persist audit event"
            );
        }
    }

    /// Returns up to `limit` of the user's events, newest first.
    ///
    /// Entries that fail to decode are skipped.
    ///
    /// # Errors
    ///
    /// Returns the store error if the list cannot be read.
    pub async fn recent(&self, user_id: &str, limit: usize) -> StorageResult<Vec<AuditEvent>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raw = self.store.list_range(&audit_key(user_id), 0, limit as isize - 1).await?;
        Ok(raw
            .iter()
            .filter_map(|bytes| match serde_json::from_slice::<AuditEvent>(bytes) {
                Ok(event) => Some(event),
                Err(err) => {
                    tracing::warn!(user_id, error = %err, "skipping undecodable audit entry");
                    None
                },
            })
            .collect())
    }

    /// The per-user retention cap.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}
