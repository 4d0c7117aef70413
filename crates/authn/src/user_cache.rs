//! Scope-bound cache of user snapshots.
//!
//! A snapshot is only ever stored under the [`SecureCacheKey`] of the full
//! request scope, never under the user id alone, so a response computed for
//! one user, session or origin can never be served to another.
//!
//! Every hit is re-validated (freshness, status, owner, role, epoch) before
//! use; anything that fails validation is deleted and refetched.
//!
//! Each user has a cache epoch under `authcache-epoch:{user_id}`, advanced by
//! every invalidation. Snapshots carry the epoch read before their fetch, so
//! a snapshot written by a request that raced an invalidation is never served.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use medianest_storage::{KeyValueStore, ReadRetryPolicy, StorageError, with_read_retry};
use serde::{Deserialize, Serialize};

use crate::{
    audit::{AuditAction, AuditEvent, SecurityAuditLog},
    cache_key::{CacheScope, SecureCacheKey, SecureCacheKeyGenerator},
    error::AuthError,
    store::{UserRecord, UserStatus, UserStore},
};

fn epoch_key(user_id: &str) -> Vec<u8> {
    format!("authcache-epoch:{user_id}").into_bytes()
}

/// Cached copy of the user fields the validator needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedUserSnapshot {
    /// User id.
    pub user_id: String,
    /// Login email.
    pub email: String,
    /// Role at fetch time.
    pub role: String,
    /// Status at fetch time.
    pub status: UserStatus,
    /// When the snapshot was fetched.
    pub cached_at: DateTime<Utc>,
    /// Lifetime in seconds.
    pub ttl_secs: u64,
    /// The user's cache epoch when the fetch started.
    #[serde(default)]
    pub epoch: u64,
}

impl CachedUserSnapshot {
    fn from_record(record: UserRecord, ttl: Duration, epoch: u64) -> Self {
        Self {
            user_id: record.id,
            email: record.email,
            role: record.role,
            status: record.status,
            cached_at: Utc::now(),
            ttl_secs: ttl.as_secs(),
            epoch,
        }
    }

    /// Whether the snapshot may answer a request for `scope` at `now`.
    fn admits(&self, scope: &CacheScope, epoch: u64, now: DateTime<Utc>) -> bool {
        let fresh = chrono::Duration::from_std(Duration::from_secs(self.ttl_secs))
            .ok()
            .and_then(|ttl| self.cached_at.checked_add_signed(ttl))
            .is_some_and(|expires| now < expires);
        fresh
            && self.epoch == epoch
            && self.status.is_active()
            && self.user_id == scope.user_id
            && self.role == scope.role
    }
}

/// User snapshot cache over a shared [`KeyValueStore`].
#[derive(Clone)]
pub struct UserAuthCache {
    store: Arc<dyn KeyValueStore>,
    keys: SecureCacheKeyGenerator,
    audit: SecurityAuditLog,
    ttl: Duration,
    fetch_timeout: Duration,
    read_retry: ReadRetryPolicy,
}

impl UserAuthCache {
    /// Creates a cache whose snapshots and indexes expire after `ttl`.
    ///
    /// Each user-store fetch on a miss is bounded by `fetch_timeout`.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        audit: SecurityAuditLog,
        ttl: Duration,
        fetch_timeout: Duration,
        read_retry: ReadRetryPolicy,
    ) -> Self {
        let keys = SecureCacheKeyGenerator::new(Arc::clone(&store), read_retry, ttl);
        Self { store, keys, audit, ttl, fetch_timeout, read_retry }
    }

    /// The key generator, for callers that need the index directly.
    pub fn keys(&self) -> &SecureCacheKeyGenerator {
        &self.keys
    }

    /// Resolves the snapshot for `scope`, reading through to `user_store` on a miss.
    ///
    /// When the canonical role differs from the scope's, the canonical
    /// snapshot is returned but not cached: the entry would be keyed by a
    /// role the user no longer holds.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UserNotFound`] if the user store has no such user
    /// - [`AuthError::UserInactive`] if the user is not active
    /// - [`AuthError::CacheBackendUnavailable`] if the cache read fails, or the
    ///   user fetch fails or exceeds the fetch timeout
    #[tracing::instrument(skip(self, scope, user_store), fields(user_id = %scope.user_id, session_id = %scope.session_id))]
    pub async fn get(&self, scope: &CacheScope, user_store: &dyn UserStore) -> Result<CachedUserSnapshot, AuthError> {
        let key = SecureCacheKeyGenerator::key(scope);
        let storage_key = key.storage_key();

        let epoch = self.current_epoch(&scope.user_id).await?;
        let cached = with_read_retry(self.read_retry, "cache_get", || self.store.get(&storage_key)).await?;
        if let Some(raw) = cached {
            match serde_json::from_slice::<CachedUserSnapshot>(&raw) {
                Ok(snapshot) if snapshot.admits(scope, epoch, Utc::now()) => {
                    tracing::debug!("user cache hit");
                    return Ok(snapshot);
                },
                Ok(_) => tracing::debug!("cached snapshot failed validation, evicting"),
                Err(err) => tracing::warn!(error = %err, "undecodable cached snapshot, evicting"),
            }
            if let Err(err) = self.store.delete(&storage_key).await {
                tracing::warn!(error = %err, "failed to evict cached snapshot");
            }
        }

        let fetched = tokio::time::timeout(self.fetch_timeout, user_store.fetch_user(&scope.user_id))
            .await
            .map_err(|_| {
                tracing::warn!(timeout_ms = self.fetch_timeout.as_millis() as u64, "user store fetch timed out");
                AuthError::CacheBackendUnavailable(StorageError::timeout())
            })?;
        let record = fetched?.ok_or(AuthError::UserNotFound)?;
        if !record.status.is_active() {
            return Err(AuthError::UserInactive);
        }

        let snapshot = CachedUserSnapshot::from_record(record, self.ttl, epoch);
        if snapshot.role == scope.role {
            self.populate(&key, &snapshot).await;
        } else {
            tracing::debug!(token_role = %scope.role, canonical_role = %snapshot.role, "role differs from token, not caching");
        }
        Ok(snapshot)
    }

    /// Current cache epoch of `user_id`. Zero when never invalidated.
    async fn current_epoch(&self, user_id: &str) -> Result<u64, AuthError> {
        let key = epoch_key(user_id);
        let raw = with_read_retry(self.read_retry, "cache_epoch_get", || self.store.get(&key)).await?;
        match raw {
            None => Ok(0),
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| AuthError::CacheBackendUnavailable(StorageError::wrong_type(&key))),
        }
    }

    /// Writes the index entry first, then the snapshot, so a snapshot can
    /// never exist without being reachable from the index.
    async fn populate(&self, key: &SecureCacheKey, snapshot: &CachedUserSnapshot) {
        if let Err(err) = self.keys.record(&snapshot.user_id, key).await {
            tracing::warn!(error = %err, "failed to index cache key, serving uncached");
            return;
        }
        let payload = match serde_json::to_vec(snapshot) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode snapshot");
                return;
            },
        };
        if let Err(err) = self.store.set_with_ttl(key.storage_key(), payload, self.ttl).await {
            tracing::warn!(error = %err, "failed to write snapshot");
        }
    }

    /// Drops every cached snapshot of `user_id`. Returns how many keys were deleted.
    ///
    /// The epoch is advanced first, so a `get` issued after this returns
    /// performs a fresh fetch even if a concurrent `get` writes a snapshot
    /// fetched before the invalidation.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CacheBackendUnavailable`] if the epoch cannot be
    /// advanced, the index cannot be read or a key cannot be deleted.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_user_cache(&self, user_id: &str, reason: &str) -> Result<usize, AuthError> {
        let epoch_key = epoch_key(user_id);
        let epoch = self.store.increment(&epoch_key, 1).await?;
        // Outlives any snapshot tagged with the previous epoch.
        self.store.expire(&epoch_key, self.ttl.saturating_mul(2).saturating_add(self.fetch_timeout)).await?;

        let keys = self.keys.indexed_keys(user_id).await?;
        for key in &keys {
            self.store.delete(&key.storage_key()).await?;
        }
        self.keys.clear_index(user_id).await?;

        tracing::debug!(deleted = keys.len(), epoch, "user cache invalidated");
        let event = AuditEvent::builder()
            .user_id(user_id)
            .action(AuditAction::CacheInvalidated)
            .reason(reason)
            .build();
        self.audit.append_best_effort(&event).await;
        Ok(keys.len())
    }

    /// Reads the raw snapshot stored for `scope` without validation or fetch.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CacheBackendUnavailable`] if the read fails or
    /// the stored value cannot be decoded.
    pub async fn peek(&self, scope: &CacheScope) -> Result<Option<CachedUserSnapshot>, AuthError> {
        let Some(raw) = self.store.get(&SecureCacheKeyGenerator::key(scope).storage_key()).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&raw).map(Some).map_err(|e| {
            AuthError::CacheBackendUnavailable(StorageError::serialization_with_source(
                "failed to decode cached snapshot",
                e,
            ))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use medianest_storage::{MemoryBackend, StorageResult, testutil::FailingBackend};
    use tokio::sync::Notify;

    use super::*;
    use crate::store::MemoryUserStore;

    struct Fixture {
        store: Arc<dyn KeyValueStore>,
        cache: UserAuthCache,
        users: MemoryUserStore,
    }

    fn fixture_over(store: Arc<dyn KeyValueStore>) -> Fixture {
        let audit = SecurityAuditLog::new(Arc::clone(&store), 100);
        let cache = UserAuthCache::new(
            Arc::clone(&store),
            audit,
            Duration::from_secs(30),
            Duration::from_millis(50),
            ReadRetryPolicy::disabled(),
        );
        let users = MemoryUserStore::new();
        users.upsert(UserRecord {
            id: "alice".to_owned(),
            email: "alice@example.com".to_owned(),
            role: "user".to_owned(),
            status: UserStatus::Active,
        });
        Fixture { store, cache, users }
    }

    fn fixture() -> Fixture {
        fixture_over(Arc::new(MemoryBackend::new()))
    }

    fn scope() -> CacheScope {
        CacheScope::new("alice", "s1", "10.0.0.1", "user")
    }

    #[tokio::test]
    async fn test_miss_populates_and_indexes() {
        let f = fixture();
        let snapshot = f.cache.get(&scope(), &f.users).await.unwrap();
        assert_eq!(snapshot.email, "alice@example.com");

        assert_eq!(f.cache.peek(&scope()).await.unwrap(), Some(snapshot));
        let indexed = f.cache.keys().indexed_keys("alice").await.unwrap();
        assert_eq!(indexed, vec![SecureCacheKeyGenerator::key(&scope())]);
    }

    #[tokio::test]
    async fn test_hit_does_not_refetch() {
        let f = fixture();
        f.cache.get(&scope(), &f.users).await.unwrap();

        f.users.remove("alice");
        let snapshot = f.cache.get(&scope(), &f.users).await.unwrap();
        assert_eq!(snapshot.user_id, "alice");
    }

    #[tokio::test]
    async fn test_role_mismatch_returns_canonical_without_caching() {
        let f = fixture();
        let admin_scope = CacheScope::new("alice", "s1", "10.0.0.1", "admin");

        let snapshot = f.cache.get(&admin_scope, &f.users).await.unwrap();
        assert_eq!(snapshot.role, "user");
        assert_eq!(f.cache.peek(&admin_scope).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_users() {
        let f = fixture();
        let unknown = CacheScope::new("mallory", "s1", "10.0.0.1", "user");
        assert!(matches!(f.cache.get(&unknown, &f.users).await, Err(AuthError::UserNotFound)));

        f.users.set_status("alice", UserStatus::Inactive);
        assert!(matches!(f.cache.get(&scope(), &f.users).await, Err(AuthError::UserInactive)));
    }

    #[tokio::test]
    async fn test_invalidate_forces_fresh_fetch() {
        let f = fixture();
        f.cache.get(&scope(), &f.users).await.unwrap();
        f.cache.get(&CacheScope::new("alice", "s2", "10.0.0.7", "user"), &f.users).await.unwrap();

        assert_eq!(f.cache.invalidate_user_cache("alice", "role_change").await.unwrap(), 2);
        assert_eq!(f.cache.peek(&scope()).await.unwrap(), None);

        f.users.set_status("alice", UserStatus::Suspended);
        assert!(matches!(f.cache.get(&scope(), &f.users).await, Err(AuthError::UserInactive)));
    }

    #[tokio::test]
    async fn test_tampered_snapshot_for_other_user_is_rejected() {
        let f = fixture();
        let key = SecureCacheKeyGenerator::key(&scope()).storage_key();
        let forged = CachedUserSnapshot {
            user_id: "bob".to_owned(),
            email: "bob@example.com".to_owned(),
            role: "user".to_owned(),
            status: UserStatus::Active,
            cached_at: Utc::now(),
            ttl_secs: 30,
            epoch: 0,
        };
        f.store.set(key, serde_json::to_vec(&forged).unwrap()).await.unwrap();

        let snapshot = f.cache.get(&scope(), &f.users).await.unwrap();
        assert_eq!(snapshot.user_id, "alice");
        assert_eq!(snapshot.email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_refetched() {
        let f = fixture();
        let key = SecureCacheKeyGenerator::key(&scope()).storage_key();
        let stale = CachedUserSnapshot {
            user_id: "alice".to_owned(),
            email: "old@example.com".to_owned(),
            role: "user".to_owned(),
            status: UserStatus::Active,
            cached_at: Utc::now() - chrono::Duration::seconds(120),
            ttl_secs: 30,
            epoch: 0,
        };
        f.store.set(key, serde_json::to_vec(&stale).unwrap()).await.unwrap();

        let snapshot = f.cache.get(&scope(), &f.users).await.unwrap();
        assert_eq!(snapshot.email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_undecodable_snapshot_is_replaced() {
        let f = fixture();
        let key = SecureCacheKeyGenerator::key(&scope()).storage_key();
        f.store.set(key, b"{not json".to_vec()).await.unwrap();

        let snapshot = f.cache.get(&scope(), &f.users).await.unwrap();
        assert_eq!(f.cache.peek(&scope()).await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_cache_read_failure_fails_closed() {
        let failing = FailingBackend::new(MemoryBackend::new());
        failing.fail_all();
        let f = fixture_over(Arc::new(failing));

        let result = f.cache.get(&scope(), &f.users).await;
        assert!(matches!(result, Err(AuthError::CacheBackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_user_store_failure_fails_closed() {
        struct DownUserStore;

        #[async_trait::async_trait]
        impl UserStore for DownUserStore {
            async fn fetch_user(&self, _user_id: &str) -> StorageResult<Option<UserRecord>> {
                Err(StorageError::connection("database unreachable"))
            }
        }

        let f = fixture();
        let result = f.cache.get(&scope(), &DownUserStore).await;
        assert!(matches!(result, Err(AuthError::CacheBackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_write_failure_still_serves_uncached() {
        let failing = FailingBackend::new(MemoryBackend::new());
        let f = fixture_over(Arc::new(failing.clone()));
        failing.fail_writes();

        let snapshot = f.cache.get(&scope(), &f.users).await.unwrap();
        assert_eq!(snapshot.user_id, "alice");
        assert_eq!(f.cache.peek(&scope()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stalled_user_store_times_out() {
        struct StalledUserStore;

        #[async_trait::async_trait]
        impl UserStore for StalledUserStore {
            async fn fetch_user(&self, _user_id: &str) -> StorageResult<Option<UserRecord>> {
                std::future::pending().await
            }
        }

        let f = fixture();
        let result = tokio::time::timeout(Duration::from_secs(2), f.cache.get(&scope(), &StalledUserStore))
            .await
            .expect("get must not hang");
        assert!(matches!(result, Err(AuthError::CacheBackendUnavailable(StorageError::Timeout))));
        assert_eq!(f.cache.peek(&scope()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_snapshot_from_fetch_racing_invalidation_is_not_served() {
        // Returns the record read before pausing, so the write-back is stale.
        struct GatedUserStore {
            inner: MemoryUserStore,
            fetched: Notify,
            release: Notify,
        }

        #[async_trait::async_trait]
        impl UserStore for GatedUserStore {
            async fn fetch_user(&self, user_id: &str) -> StorageResult<Option<UserRecord>> {
                let record = self.inner.fetch_user(user_id).await;
                self.fetched.notify_one();
                self.release.notified().await;
                record
            }
        }

        let f = fixture();
        let gated = Arc::new(GatedUserStore {
            inner: f.users.clone(),
            fetched: Notify::new(),
            release: Notify::new(),
        });

        let racing = tokio::spawn({
            let cache = f.cache.clone();
            let gated = Arc::clone(&gated);
            async move { cache.get(&scope(), gated.as_ref()).await }
        });

        gated.fetched.notified().await;
        f.users.set_status("alice", UserStatus::Inactive);
        f.cache.invalidate_user_cache("alice", "deactivated").await.unwrap();
        gated.release.notify_one();

        let stale = racing.await.unwrap().unwrap();
        assert_eq!(stale.status, UserStatus::Active);

        assert!(matches!(f.cache.get(&scope(), &f.users).await, Err(AuthError::UserInactive)));
    }
}
