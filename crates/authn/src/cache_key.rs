//! Composite cache keys and the per-user key index.
//!
//! A cached user snapshot is addressed by the SHA-256 digest of the full
//! request scope `(user_id, session_id, ip_address, role)`. Each component is
//! prefixed with its big-endian `u64` byte length and the tuple with a domain
//! tag, so no two distinct scopes can encode to the same digest input:
//! `("ab", "c")` and `("a", "bc")` hash differently.
//!
//! Because the digest is one-way, invalidating "every key of a user" needs an
//! index: `authcache-index:{user_id}` lists the hex keys written for that user.

use std::{collections::HashSet, fmt, sync::Arc, time::Duration};

use medianest_storage::{KeyValueStore, ReadRetryPolicy, StorageResult, with_read_retry};
use sha2::{Digest, Sha256};

/// Domain separation tag mixed into every cache key.
pub const CACHE_KEY_DOMAIN: &str = "medianest.authcache.v1";

const SNAPSHOT_PREFIX: &str = "authcache:";

/// The request scope a cached snapshot is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheScope {
    /// User id from the verified token.
    pub user_id: String,
    /// Session id from the verified token.
    pub session_id: String,
    /// IP of the current request.
    pub ip_address: String,
    /// Role from the verified token.
    pub role: String,
}

impl CacheScope {
    /// Creates a scope.
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        ip_address: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            ip_address: ip_address.into(),
            role: role.into(),
        }
    }
}

/// 32-byte digest identifying one cached snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SecureCacheKey([u8; 32]);

impl SecureCacheKey {
    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a lowercase or uppercase hex rendering.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Store key under which the snapshot lives.
    #[must_use]
    pub fn storage_key(&self) -> Vec<u8> {
        format!("{SNAPSHOT_PREFIX}{}", self.to_hex()).into_bytes()
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SecureCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureCacheKey({})", self.to_hex())
    }
}

impl fmt::Display for SecureCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn index_key(user_id: &str) -> Vec<u8> {
    format!("authcache-index:{user_id}").into_bytes()
}

/// Derives cache keys and maintains the per-user key index.
#[derive(Clone)]
pub struct SecureCacheKeyGenerator {
    store: Arc<dyn KeyValueStore>,
    read_retry: ReadRetryPolicy,
    index_ttl: Duration,
}

impl SecureCacheKeyGenerator {
    /// Creates a generator; the index TTL is refreshed to `index_ttl` on every append.
    pub fn new(store: Arc<dyn KeyValueStore>, read_retry: ReadRetryPolicy, index_ttl: Duration) -> Self {
        Self { store, read_retry, index_ttl }
    }

    /// Derives the key for a scope. Pure and deterministic.
    #[must_use]
    pub fn key(scope: &CacheScope) -> SecureCacheKey {
        Self::key_for(&scope.user_id, &scope.session_id, &scope.ip_address, &scope.role)
    }

    /// Derives the key for the individual scope components.
    #[must_use]
    pub fn key_for(user_id: &str, session_id: &str, ip_address: &str, role: &str) -> SecureCacheKey {
        let mut hasher = Sha256::new();
        for component in [CACHE_KEY_DOMAIN, user_id, session_id, ip_address, role] {
            hasher.update((component.len() as u64).to_be_bytes());
            hasher.update(component.as_bytes());
        }
        SecureCacheKey(hasher.finalize().into())
    }

    /// Adds `key` to the user's index and refreshes the index TTL.
    ///
    /// The index only needs to outlive the snapshots it points at, and every
    /// snapshot is written with the same TTL right before it is recorded.
    ///
    /// # Errors
    ///
    /// Returns the store error if the push or TTL refresh fails.
    pub async fn record(&self, user_id: &str, key: &SecureCacheKey) -> StorageResult<()> {
        let index = index_key(user_id);
        self.store.list_push(&index, key.to_hex().into_bytes()).await?;
        self.store.expire(&index, self.index_ttl).await?;
        Ok(())
    }

    /// Keys recorded for the user, de-duplicated, newest first.
    ///
    /// # Errors
    ///
    /// Returns the store error if the index cannot be read.
    pub async fn indexed_keys(&self, user_id: &str) -> StorageResult<Vec<SecureCacheKey>> {
        let index = index_key(user_id);
        let raw = with_read_retry(self.read_retry, "index_range", || self.store.list_range(&index, 0, -1)).await?;

        let mut seen = HashSet::with_capacity(raw.len());
        Ok(raw
            .iter()
            .filter_map(|bytes| std::str::from_utf8(bytes).ok().and_then(SecureCacheKey::from_hex))
            .filter(|key| seen.insert(*key))
            .collect())
    }

    /// Deletes the user's index.
    ///
    /// # Errors
    ///
    /// Returns the store error if the delete fails.
    pub async fn clear_index(&self, user_id: &str) -> StorageResult<()> {
        self.store.delete(&index_key(user_id)).await
    }
}
