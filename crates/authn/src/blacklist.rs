//! Token revocation list and session generations.
//!
//! Revoked tokens are stored by SHA-256 hash under `blacklist:{hash}` with a
//! store TTL equal to the token's remaining lifetime, capped at the longest
//! lifetime an authenticating token may have, so entries vanish once the
//! token could no longer authenticate anyway.
//!
//! Lookups fail closed: a store error yields
//! [`BlacklistStatus::Indeterminate`], which [`TokenBlacklist::is_blacklisted`]
//! surfaces as [`AuthError::CacheBackendUnavailable`] rather than `false`.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use medianest_storage::{KeyValueStore, ReadRetryPolicy, StorageError, StorageResult, with_read_retry};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    audit::{AuditAction, AuditEvent, SecurityAuditLog},
    error::AuthError,
    token::{TokenClaims, TokenCodec},
};

/// Revocation reason recorded by logout.
pub const REASON_LOGOUT: &str = "logout";
/// Revocation reason recorded by token rotation.
pub const REASON_TOKEN_ROTATION: &str = "token_rotation";

/// Domain separation tag mixed into every generation counter key.
const GENERATION_KEY_DOMAIN: &str = "medianest.token-gen.v1";

/// SHA-256 of the raw token string, lowercase hex.
#[must_use]
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn hash_prefix(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

fn blacklist_key(hash: &str) -> Vec<u8> {
    format!("blacklist:{hash}").into_bytes()
}

// Length-prefixed like cache keys: ("a:b", "c") and ("a", "b:c") are distinct counters.
fn generation_key(user_id: &str, session_id: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for component in [GENERATION_KEY_DOMAIN, user_id, session_id] {
        hasher.update((component.len() as u64).to_be_bytes());
        hasher.update(component.as_bytes());
    }
    format!("token-gen:{}", hex::encode(hasher.finalize())).into_bytes()
}

/// Stored record of a revoked token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// SHA-256 hex of the token.
    pub token_hash: String,
    /// Owner of the token.
    pub user_id: String,
    /// Why it was revoked.
    pub reason: String,
    /// When it was revoked.
    pub blacklisted_at: DateTime<Utc>,
    /// When the entry lapses: the token's expiry, capped at the maximum token lifetime.
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a revocation lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistStatus {
    /// Not revoked.
    Clear,
    /// Revoked.
    Revoked,
    /// The store could not answer. Callers must treat this as a rejection.
    Indeterminate,
}

/// Revocation list over a shared [`KeyValueStore`].
#[derive(Clone)]
pub struct TokenBlacklist {
    store: Arc<dyn KeyValueStore>,
    audit: SecurityAuditLog,
    codec: TokenCodec,
    read_retry: ReadRetryPolicy,
    max_token_lifetime: Duration,
}

impl TokenBlacklist {
    /// Creates a blacklist.
    ///
    /// `codec` verifies tokens handed in for revocation. `max_token_lifetime`
    /// bounds both blacklist entries and session generation counters; it must
    /// be at least the longest lifetime an authenticating token can have.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        audit: SecurityAuditLog,
        codec: TokenCodec,
        read_retry: ReadRetryPolicy,
        max_token_lifetime: Duration,
    ) -> Self {
        Self { store, audit, codec, read_retry, max_token_lifetime }
    }

    /// Revokes `token` until its natural expiry and returns its verified claims.
    ///
    /// The signature is verified but an elapsed `exp` is accepted; revoking an
    /// already-expired token writes no entry. The token must belong to
    /// `user_id`. Idempotent.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`], [`AuthError::AlgorithmNotAllowed`] or
    ///   [`AuthError::InvalidSignature`] if the token fails verification
    /// - [`AuthError::TokenOwnerMismatch`] if the token's subject is not `user_id`
    /// - [`AuthError::CacheBackendUnavailable`] if the entry cannot be written
    #[tracing::instrument(skip(self, token))]
    pub async fn blacklist(&self, token: &str, user_id: &str, reason: &str) -> Result<TokenClaims, AuthError> {
        let claims = self.codec.verify_signature(token)?;
        if claims.sub != user_id {
            tracing::warn!(token_owner = %claims.sub, "refusing to revoke another user's token");
            return Err(AuthError::TokenOwnerMismatch);
        }
        let expires_at = DateTime::from_timestamp(i64::try_from(claims.exp).unwrap_or(i64::MAX), 0)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.blacklist_hash(&token_hash(token), user_id, reason, expires_at).await?;
        Ok(claims)
    }

    /// Revokes a token known only by its hash.
    ///
    /// The entry lives until `expires_at`, but never longer than the maximum
    /// token lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CacheBackendUnavailable`] if the entry cannot be written.
    #[tracing::instrument(skip(self, hash), fields(token_hash = hash_prefix(hash)))]
    pub async fn blacklist_hash(
        &self,
        hash: &str,
        user_id: &str,
        reason: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let now = Utc::now();
        match (expires_at - now).to_std() {
            Ok(remaining) if !remaining.is_zero() => {
                let ttl = remaining.min(self.max_token_lifetime);
                let expires_at = chrono::Duration::from_std(ttl)
                    .ok()
                    .and_then(|ttl| now.checked_add_signed(ttl))
                    .unwrap_or(expires_at);
                let entry = BlacklistEntry {
                    token_hash: hash.to_owned(),
                    user_id: user_id.to_owned(),
                    reason: reason.to_owned(),
                    blacklisted_at: now,
                    expires_at,
                };
                let payload = serde_json::to_vec(&entry).map_err(|e| {
                    StorageError::serialization_with_source("failed to encode blacklist entry", e)
                })?;
                self.store.set_with_ttl(blacklist_key(hash), payload, ttl).await?;
                tracing::debug!(ttl_secs = ttl.as_secs(), "token blacklisted");
            },
            _ => tracing::debug!("token already expired, no blacklist entry needed"),
        }

        let action = if reason == REASON_LOGOUT { AuditAction::Logout } else { AuditAction::Revoked };
        let event = AuditEvent::builder().user_id(user_id).action(action).reason(reason).build();
        self.audit.append_best_effort(&event).await;
        Ok(())
    }

    async fn lookup(&self, hash: &str) -> StorageResult<bool> {
        let key = blacklist_key(hash);
        with_read_retry(self.read_retry, "blacklist_get", || self.store.get(&key))
            .await
            .map(|found| found.is_some())
            .inspect_err(|err| {
                tracing::warn!(token_hash = hash_prefix(hash), error = %err, "blacklist lookup failed");
            })
    }

    /// Looks up whether `token` is revoked.
    pub async fn status(&self, token: &str) -> BlacklistStatus {
        self.status_hash(&token_hash(token)).await
    }

    /// Looks up whether the token with this hash is revoked.
    pub async fn status_hash(&self, hash: &str) -> BlacklistStatus {
        match self.lookup(hash).await {
            Ok(true) => BlacklistStatus::Revoked,
            Ok(false) => BlacklistStatus::Clear,
            Err(_) => BlacklistStatus::Indeterminate,
        }
    }

    /// Whether `token` is revoked.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CacheBackendUnavailable`] when the store cannot
    /// answer. An error is never reported as `Ok(false)`.
    pub async fn is_blacklisted(&self, token: &str) -> Result<bool, AuthError> {
        self.lookup(&token_hash(token)).await.map_err(AuthError::CacheBackendUnavailable)
    }

    /// Returns the stored entry for `token`, if revoked.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CacheBackendUnavailable`] if the store fails or
    /// the entry cannot be decoded.
    pub async fn entry(&self, token: &str) -> Result<Option<BlacklistEntry>, AuthError> {
        let Some(raw) = self.store.get(&blacklist_key(&token_hash(token))).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&raw).map(Some).map_err(|e| {
            AuthError::CacheBackendUnavailable(StorageError::serialization_with_source(
                "failed to decode blacklist entry",
                e,
            ))
        })
    }

    /// Current generation of a session. Zero when never bumped.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CacheBackendUnavailable`] if the counter cannot be
    /// read or holds a non-integer value.
    pub async fn current_generation(&self, user_id: &str, session_id: &str) -> Result<u64, AuthError> {
        let key = generation_key(user_id, session_id);
        let raw = with_read_retry(self.read_retry, "generation_get", || self.store.get(&key)).await?;
        match raw {
            None => Ok(0),
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| AuthError::CacheBackendUnavailable(StorageError::wrong_type(&key))),
        }
    }

    /// Advances a session's generation and returns the new value.
    ///
    /// Tokens carrying a lower `gen` claim are rejected from then on.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CacheBackendUnavailable`] if the counter cannot be updated.
    #[tracing::instrument(skip(self))]
    pub async fn bump_generation(&self, user_id: &str, session_id: &str) -> Result<u64, AuthError> {
        let key = generation_key(user_id, session_id);
        let next = self.store.increment(&key, 1).await?;
        self.store.expire(&key, self.max_token_lifetime).await?;
        Ok(u64::try_from(next).unwrap_or(0))
    }

    /// Rejects `claims` whose generation predates the session's current one.
    ///
    /// Tokens without a `gen` claim are not generation-checked.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Blacklisted`] for a superseded generation
    /// - [`AuthError::CacheBackendUnavailable`] if the counter cannot be read
    pub async fn check_generation(&self, claims: &TokenClaims) -> Result<(), AuthError> {
        let Some(token_gen) = claims.r#gen else {
            return Ok(());
        };
        let current = self.current_generation(&claims.sub, &claims.sid).await?;
        if token_gen < current {
            tracing::debug!(
                user_id = %claims.sub,
                session_id = %claims.sid,
                token_gen,
                current,
                "token generation superseded"
            );
            return Err(AuthError::Blacklisted);
        }
        Ok(())
    }
}
