//! Logout, bulk session invalidation and token rotation.

use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::{
    audit::{AuditAction, AuditEvent, SecurityAuditLog},
    blacklist::{REASON_LOGOUT, REASON_TOKEN_ROTATION, TokenBlacklist},
    error::AuthError,
    store::{SessionStore, SessionToken},
    user_cache::UserAuthCache,
};

/// Revokes tokens and drops the cached state that depended on them.
#[derive(Clone)]
pub struct SessionInvalidator {
    blacklist: TokenBlacklist,
    cache: UserAuthCache,
    audit: SecurityAuditLog,
    sessions: Arc<dyn SessionStore>,
    fallback_token_lifetime: Duration,
}

impl SessionInvalidator {
    /// Creates an invalidator.
    ///
    /// `fallback_token_lifetime` is used as the blacklist lifetime for
    /// hash-only session records that carry no expiry.
    pub fn new(
        blacklist: TokenBlacklist,
        cache: UserAuthCache,
        audit: SecurityAuditLog,
        sessions: Arc<dyn SessionStore>,
        fallback_token_lifetime: Duration,
    ) -> Self {
        Self { blacklist, cache, audit, sessions, fallback_token_lifetime }
    }

    /// Revokes every session of `user_id` and drops its cached snapshots.
    ///
    /// Returns the number of sessions revoked. Used on deactivation and
    /// role change.
    ///
    /// # Errors
    ///
    /// - [`AuthError::CacheBackendUnavailable`] if the session store, the
    ///   blacklist or the cache fails
    /// - any verification error of a raw session token, or
    ///   [`AuthError::TokenOwnerMismatch`] if it belongs to another user
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_user_sessions(&self, user_id: &str, reason: &str) -> Result<usize, AuthError> {
        let sessions = self.sessions.find_sessions_for_user(user_id).await?;

        for session in &sessions {
            match &session.token {
                SessionToken::Raw(token) => {
                    self.blacklist.blacklist(token, user_id, reason).await?;
                },
                SessionToken::Hash(hash) => {
                    let expires_at = match session.expires_at {
                        Some(at) => at,
                        None => {
                            let fallback = chrono::Duration::from_std(self.fallback_token_lifetime)
                                .unwrap_or(chrono::Duration::days(1));
                            Utc::now() + fallback
                        },
                    };
                    self.blacklist.blacklist_hash(hash, user_id, reason, expires_at).await?;
                },
            }
        }

        self.cache.invalidate_user_cache(user_id, reason).await?;

        let event = AuditEvent::builder()
            .user_id(user_id)
            .action(AuditAction::SessionsInvalidated)
            .reason(format!("{reason}; sessions={}", sessions.len()))
            .build();
        self.audit.append_best_effort(&event).await;

        tracing::info!(sessions = sessions.len(), "user sessions invalidated");
        Ok(sessions.len())
    }

    /// Revokes `token` and drops the user's cached snapshots.
    ///
    /// The token must carry a valid signature and belong to `user_id`; it
    /// may already be expired.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`], [`AuthError::AlgorithmNotAllowed`] or
    ///   [`AuthError::InvalidSignature`] if the token fails verification
    /// - [`AuthError::TokenOwnerMismatch`] if the token belongs to another user
    /// - [`AuthError::CacheBackendUnavailable`] if the store fails
    #[tracing::instrument(skip(self, token))]
    pub async fn logout(&self, token: &str, user_id: &str) -> Result<(), AuthError> {
        self.blacklist.blacklist(token, user_id, REASON_LOGOUT).await?;
        self.cache.invalidate_user_cache(user_id, REASON_LOGOUT).await?;
        Ok(())
    }

    /// Revokes `old_token` and advances its session's generation.
    ///
    /// Returns the new generation, to be embedded as the `gen` claim of the
    /// replacement token. Any other token of the session carrying a lower
    /// generation stops authenticating.
    ///
    /// # Errors
    ///
    /// Same as [`logout`](Self::logout).
    #[tracing::instrument(skip(self, old_token))]
    pub async fn rotate_token(&self, old_token: &str, user_id: &str) -> Result<u64, AuthError> {
        let claims = self.blacklist.blacklist(old_token, user_id, REASON_TOKEN_ROTATION).await?;
        let generation = self.blacklist.bump_generation(&claims.sub, &claims.sid).await?;
        self.cache.invalidate_user_cache(user_id, REASON_TOKEN_ROTATION).await?;

        let event = AuditEvent::builder()
            .user_id(user_id)
            .action(AuditAction::TokenRotated)
            .reason(format!("session={}; generation={generation}", claims.sid))
            .build();
        self.audit.append_best_effort(&event).await;
        Ok(generation)
    }
}
