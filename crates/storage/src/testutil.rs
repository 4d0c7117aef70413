//! Shared test utilities for key/value store testing.
//!
//! This module provides a fault-injecting store wrapper and assertion macros
//! for [`StorageResult`] values. It is feature-gated behind `testutil` to
//! prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! medianest-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use medianest_storage::testutil::{FailingBackend, make_key};
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    KeyValueStore,
    error::{StorageError, StorageResult},
};

/// Create a deterministic test key from a prefix and index.
///
/// Produces keys like `"prefix:000042"` (zero-padded to 6 digits) encoded
/// as UTF-8 bytes.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}:{idx:06}").into_bytes()
}

/// Create a test value tagged with a task ID and sequence number.
///
/// Produces values like `"task3-val042"` encoded as UTF-8 bytes.
#[must_use]
pub fn make_tagged_value(task: usize, seq: usize) -> Vec<u8> {
    format!("task{task}-val{seq}").into_bytes()
}

#[derive(Default)]
struct FaultState {
    fail_all: AtomicBool,
    fail_writes: AtomicBool,
    fail_next: AtomicU32,
    calls: AtomicU64,
    delay: Mutex<Duration>,
}

/// A store wrapper that injects connection failures and latency.
///
/// Clones share the same fault state, so a test can keep one handle to flip
/// faults while the code under test holds another.
///
/// | Control | Effect |
/// |---------|--------|
/// | [`fail_all`](Self::fail_all) | every operation fails |
/// | [`fail_writes`](Self::fail_writes) | mutating operations fail, reads pass |
/// | [`fail_next`](Self::fail_next) | the next `n` operations fail, then recover |
/// | [`set_delay`](Self::set_delay) | every operation sleeps before running |
/// | [`heal`](Self::heal) | clears all faults |
#[derive(Clone)]
pub struct FailingBackend<S> {
    inner: S,
    state: Arc<FaultState>,
}

impl<S: KeyValueStore> FailingBackend<S> {
    /// Wraps `inner` with no faults enabled.
    pub fn new(inner: S) -> Self {
        Self { inner, state: Arc::new(FaultState::default()) }
    }

    /// Makes every subsequent operation fail.
    pub fn fail_all(&self) {
        self.state.fail_all.store(true, Ordering::SeqCst);
    }

    /// Makes every subsequent mutating operation fail.
    pub fn fail_writes(&self) {
        self.state.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Makes the next `n` operations fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.state.fail_next.store(n, Ordering::SeqCst);
    }

    /// Delays every operation by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }

    /// Clears every configured fault.
    pub fn heal(&self) {
        self.state.fail_all.store(false, Ordering::SeqCst);
        self.state.fail_writes.store(false, Ordering::SeqCst);
        self.state.fail_next.store(0, Ordering::SeqCst);
        *self.state.delay.lock() = Duration::ZERO;
    }

    /// Number of operations attempted through this wrapper.
    pub fn call_count(&self) -> u64 {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Returns a reference to the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn before(&self, op: &'static str, is_write: bool) -> StorageResult<()> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.state.fail_all.load(Ordering::SeqCst)
            || (is_write && self.state.fail_writes.load(Ordering::SeqCst))
        {
            return Err(StorageError::connection(format!("injected {op} failure")));
        }

        let consumed = self
            .state
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(StorageError::connection(format!("injected transient {op} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for FailingBackend<S> {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.before("get", false).await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.before("set", true).await?;
        self.inner.set(key, value).await
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        self.before("set_with_ttl", true).await?;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.before("delete", true).await?;
        self.inner.delete(key).await
    }

    async fn compare_and_delete(&self, key: &[u8], expected: &[u8]) -> StorageResult<bool> {
        self.before("compare_and_delete", true).await?;
        self.inner.compare_and_delete(key, expected).await
    }

    async fn increment(&self, key: &[u8], delta: i64) -> StorageResult<i64> {
        self.before("increment", true).await?;
        self.inner.increment(key, delta).await
    }

    async fn list_push(&self, key: &[u8], value: Vec<u8>) -> StorageResult<usize> {
        self.before("list_push", true).await?;
        self.inner.list_push(key, value).await
    }

    async fn list_range(&self, key: &[u8], start: isize, stop: isize) -> StorageResult<Vec<Bytes>> {
        self.before("list_range", false).await?;
        self.inner.list_range(key, start, stop).await
    }

    async fn list_trim(&self, key: &[u8], start: isize, stop: isize) -> StorageResult<()> {
        self.before("list_trim", true).await?;
        self.inner.list_trim(key, start, stop).await
    }

    async fn expire(&self, key: &[u8], ttl: Duration) -> StorageResult<bool> {
        self.before("expire", true).await?;
        self.inner.expire(key, ttl).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.before("health_check", false).await?;
        self.inner.health_check().await
    }
}

/// Assert that a [`StorageResult`] is `Ok`.
///
/// Returns the inner value on success, panics with a descriptive message
/// on failure.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Assert that a [`StorageResult`] contains a [`StorageError::Timeout`].
#[macro_export]
macro_rules! assert_timeout {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Timeout)),
            "expected StorageError::Timeout, got: {:?}",
            $result,
        );
    };
}
