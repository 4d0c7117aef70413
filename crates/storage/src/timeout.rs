//! Per-operation deadline wrapper for key/value stores.
//!
//! [`TimeoutBackend`] wraps any [`KeyValueStore`] and bounds every call with
//! [`tokio::time::timeout`]. A call that exceeds the deadline returns
//! [`StorageError::Timeout`], which callers on the authentication path treat
//! as "store unavailable" and fail closed on.
//!
//! # Usage
//!
//! ```no_run
//! # use std::time::Duration;
//! # use medianest_storage::{KeyValueStore, MemoryBackend, TimeoutBackend};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = TimeoutBackend::new(MemoryBackend::new(), Duration::from_millis(50))?;
//! store.set(b"key".to_vec(), b"value".to_vec()).await?;
//! # Ok(())
//! # }
//! ```

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use crate::{
    ConfigError, KeyValueStore,
    error::{StorageError, StorageResult},
};

/// Default deadline applied to each store operation.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);

/// Smallest deadline accepted by [`TimeoutBackend::new`].
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Wraps a store so that each operation completes within a fixed deadline.
#[derive(Clone, Debug)]
pub struct TimeoutBackend<S> {
    inner: S,
    timeout: Duration,
}

impl<S: KeyValueStore> TimeoutBackend<S> {
    /// Creates a wrapper applying `timeout` to every operation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `timeout` is under one millisecond.
    pub fn new(inner: S, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout < MIN_TIMEOUT {
            return Err(ConfigError::BelowMinimum {
                field: "store_timeout",
                value: format!("{}us", timeout.as_micros()),
                min: "1ms".to_owned(),
            });
        }
        Ok(Self { inner, timeout })
    }

    /// Returns a reference to the inner store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns the configured deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = StorageResult<T>> + Send,
    ) -> StorageResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "store operation timed out");
                Err(StorageError::timeout())
            },
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for TimeoutBackend<S> {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.bounded("get", self.inner.get(key)).await
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.bounded("set", self.inner.set(key, value)).await
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        self.bounded("set_with_ttl", self.inner.set_with_ttl(key, value, ttl)).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.bounded("delete", self.inner.delete(key)).await
    }

    async fn compare_and_delete(&self, key: &[u8], expected: &[u8]) -> StorageResult<bool> {
        self.bounded("compare_and_delete", self.inner.compare_and_delete(key, expected)).await
    }

    async fn increment(&self, key: &[u8], delta: i64) -> StorageResult<i64> {
        self.bounded("increment", self.inner.increment(key, delta)).await
    }

    async fn list_push(&self, key: &[u8], value: Vec<u8>) -> StorageResult<usize> {
        self.bounded("list_push", self.inner.list_push(key, value)).await
    }

    async fn list_range(&self, key: &[u8], start: isize, stop: isize) -> StorageResult<Vec<Bytes>> {
        self.bounded("list_range", self.inner.list_range(key, start, stop)).await
    }

    async fn list_trim(&self, key: &[u8], start: isize, stop: isize) -> StorageResult<()> {
        self.bounded("list_trim", self.inner.list_trim(key, start, stop)).await
    }

    async fn expire(&self, key: &[u8], ttl: Duration) -> StorageResult<bool> {
        self.bounded("expire", self.inner.expire(key, ttl)).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.bounded("health_check", self.inner.health_check()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{MemoryBackend, testutil::FailingBackend};

    #[tokio::test]
    async fn test_passes_through_fast_operations() {
        let store = TimeoutBackend::new(MemoryBackend::new(), DEFAULT_STORE_TIMEOUT).unwrap();
        store.set(b"k".to_vec(), b"v".to_vec()).await.unwrap();
        assert_eq!(store.get(b"k").await.unwrap(), Some(Bytes::from("v")));
    }

    #[tokio::test]
    async fn test_slow_operation_times_out() {
        let slow = FailingBackend::new(MemoryBackend::new());
        slow.set_delay(Duration::from_millis(200));
        let store = TimeoutBackend::new(slow, Duration::from_millis(20)).unwrap();

        let result = store.get(b"k").await;
        assert!(matches!(result, Err(StorageError::Timeout)), "got {result:?}");
    }

    #[tokio::test]
    async fn test_errors_from_inner_are_preserved() {
        let failing = FailingBackend::new(MemoryBackend::new());
        failing.fail_all();
        let store = TimeoutBackend::new(failing, DEFAULT_STORE_TIMEOUT).unwrap();

        let result = store.list_push(b"k", b"v".to_vec()).await;
        assert!(matches!(result, Err(StorageError::Connection { .. })), "got {result:?}");
    }

    #[tokio::test]
    async fn test_rejects_sub_millisecond_timeout() {
        let result = TimeoutBackend::new(MemoryBackend::new(), Duration::from_micros(10));
        assert!(matches!(result, Err(ConfigError::BelowMinimum { field: "store_timeout", .. })));
    }
}
