//! Key/value store trait definition.
//!
//! This module defines the [`KeyValueStore`] trait, the only mutable shared
//! resource of the session-security core. Every component (blacklist, user
//! cache, activity detector, audit log) receives a store handle explicitly;
//! there is no process-wide store instance.
//!
//! # Design Philosophy
//!
//! The trait mirrors what managed caches offer natively:
//! - **Keys and values are bytes**: No assumptions about serialization format
//! - **Atomic single-key operations**: get/set/delete with TTL, increment, list append
//! - **No cross-key transactions**: callers structure their writes so that no
//!   operation needs atomicity across more than one key
//! - **Object safe**: components hold an `Arc<dyn KeyValueStore>`
//!
//! # Implementing a Store
//!
//! 1. Implement the [`KeyValueStore`] trait
//! 2. Map backend-specific errors to [`StorageError`](crate::StorageError)
//! 3. Treat keys whose TTL has elapsed as absent in every operation
//!
//! See [`MemoryBackend`](crate::MemoryBackend) for a reference implementation.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Abstract key/value and list store shared by all instances of the core.
///
/// Implementations are expected to be thread-safe (`Send + Sync`) and to make
/// every single-key operation atomic.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](KeyValueStore::get) | Retrieve a single value by key |
/// | [`set`](KeyValueStore::set) | Store a value without expiry |
/// | [`set_with_ttl`](KeyValueStore::set_with_ttl) | Store with automatic expiration |
/// | [`delete`](KeyValueStore::delete) | Remove a key |
/// | [`compare_and_delete`](KeyValueStore::compare_and_delete) | Remove a key only if it holds an expected value |
/// | [`increment`](KeyValueStore::increment) | Atomic counter update |
/// | [`list_push`](KeyValueStore::list_push) | Atomic prepend to a list |
/// | [`list_range`](KeyValueStore::list_range) | Read a slice of a list |
/// | [`list_trim`](KeyValueStore::list_trim) | Keep only a slice of a list |
/// | [`expire`](KeyValueStore::expire) | Set or replace a key's TTL |
/// | [`health_check`](KeyValueStore::health_check) | Verify store availability |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use medianest_storage::{KeyValueStore, MemoryBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryBackend::new();
///
/// store.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();
/// let value = store.get(b"key").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieves a plain value by key.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the key exists and has not expired
    /// - `Ok(None)` if the key doesn't exist
    /// - `Err(StorageError::WrongType)` if the key holds a list
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a value, replacing whatever the key held and clearing its TTL.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Stores a value that expires after `ttl`.
    ///
    /// A zero `ttl` stores a value that is already expired; subsequent reads
    /// return `None`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()>;

    /// Deletes a key of any type.
    ///
    /// If the key doesn't exist, this is a no-op (returns `Ok(())`).
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Atomically deletes a key if and only if it holds exactly `expected`.
    ///
    /// Returns `true` when the key was deleted, `false` when it was absent,
    /// expired, or held a different value. The comparison is an exact,
    /// length-sensitive byte equality check.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn compare_and_delete(&self, key: &[u8], expected: &[u8]) -> StorageResult<bool>;

    /// Atomically adds `delta` to the integer stored at `key`.
    ///
    /// An absent key starts at zero. The key's TTL, if any, is preserved.
    /// Values are stored as their decimal ASCII representation so that
    /// [`get`](KeyValueStore::get) returns a readable number.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WrongType`](crate::StorageError::WrongType) if
    /// the key holds a list or a non-integer value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn increment(&self, key: &[u8], delta: i64) -> StorageResult<i64>;

    /// Atomically prepends `value` to the list at `key`, creating it if needed.
    ///
    /// Returns the list length after the push. Lists are newest-first.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_push(&self, key: &[u8], value: Vec<u8>) -> StorageResult<usize>;

    /// Returns the elements of the list at `key` between `start` and `stop`,
    /// both inclusive.
    ///
    /// Negative indexes count from the end (`-1` is the last element).
    /// Out-of-range indexes are clamped; an absent key yields an empty list.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_range(&self, key: &[u8], start: isize, stop: isize) -> StorageResult<Vec<Bytes>>;

    /// Trims the list at `key` so that it only holds `start..=stop`.
    ///
    /// Uses the same index semantics as [`list_range`](KeyValueStore::list_range).
    /// An empty resulting range deletes the key.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_trim(&self, key: &[u8], start: isize, stop: isize) -> StorageResult<()>;

    /// Sets or replaces the TTL of an existing key.
    ///
    /// Returns `false` if the key does not exist.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn expire(&self, key: &[u8], ttl: Duration) -> StorageResult<bool>;

    /// Verifies that the store can serve requests.
    #[must_use = "health check results indicate store availability and must be inspected"]
    async fn health_check(&self) -> StorageResult<()>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        (**self).set(key, value).await
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        (**self).set_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        (**self).delete(key).await
    }

    async fn compare_and_delete(&self, key: &[u8], expected: &[u8]) -> StorageResult<bool> {
        (**self).compare_and_delete(key, expected).await
    }

    async fn increment(&self, key: &[u8], delta: i64) -> StorageResult<i64> {
        (**self).increment(key, delta).await
    }

    async fn list_push(&self, key: &[u8], value: Vec<u8>) -> StorageResult<usize> {
        (**self).list_push(key, value).await
    }

    async fn list_range(&self, key: &[u8], start: isize, stop: isize) -> StorageResult<Vec<Bytes>> {
        (**self).list_range(key, start, stop).await
    }

    async fn list_trim(&self, key: &[u8], start: isize, stop: isize) -> StorageResult<()> {
        (**self).list_trim(key, start, stop).await
    }

    async fn expire(&self, key: &[u8], ttl: Duration) -> StorageResult<bool> {
        (**self).expire(key, ttl).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        (**self).health_check().await
    }
}

/// Resolves Redis-style inclusive `start..=stop` indexes against a list of
/// length `len`, returning a half-open range or `None` when empty.
pub(crate) fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as isize;
    let normalize = |idx: isize| if idx < 0 { len_i + idx } else { idx };

    let start = normalize(start).max(0);
    let stop = normalize(stop).min(len_i - 1);
    if start > stop {
        return None;
    }
    Some((start as usize, stop as usize + 1))
}
