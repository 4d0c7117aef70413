//! In-memory key/value store implementation.
//!
//! This module provides [`MemoryBackend`], an in-process implementation of
//! [`KeyValueStore`] suitable for testing, development, and single-instance
//! deployments.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Typed entries**: Each key holds either a plain value or a list
//! - **TTL support**: Expired keys read as absent immediately; a background task reclaims them
//! - **Atomic single-key operations**: every trait method runs under one lock acquisition
//!
//! # Example
//!
//! ```
//! use medianest_storage::{KeyValueStore, MemoryBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryBackend::new();
//!
//!     store.set(b"greeting".to_vec(), b"hello".to_vec()).await.unwrap();
//!     let value = store.get(b"greeting").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Not shared across processes, so horizontally scaled deployments need a
//!   networked store behind the same trait
//! - TTL cleanup runs every second; reads never observe expired values regardless

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::sleep};

use crate::{
    backend::{KeyValueStore, resolve_range},
    error::{StorageError, StorageResult},
};

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // Best-effort signal; the receiver may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Debug, Clone)]
enum Value {
    Plain(Bytes),
    List(VecDeque<Bytes>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Map = BTreeMap<Vec<u8>, Entry>;

/// In-memory key/value store using a [`BTreeMap`].
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data, which is how tests model several stateless service
/// instances talking to one store.
///
/// # Shutdown
///
/// The background TTL cleanup task stops automatically when all clones of
/// the `MemoryBackend` are dropped (via the internal `ShutdownGuard`).
/// You can also call [`shutdown`](Self::shutdown) to stop the task explicitly.
#[derive(Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<Map>>,
    /// Shared ownership of the shutdown sender. When the last clone drops the
    /// sender is dropped, which closes the watch channel and stops the task.
    shutdown_guard: Arc<ShutdownGuard>,
}

impl MemoryBackend {
    /// Creates a new in-memory store.
    ///
    /// This also spawns a background task that periodically removes expired
    /// keys, so it must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let backend = Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        // The task holds only the data map, not the guard, so dropping the
        // last user-facing clone still stops it.
        let data = Arc::clone(&backend.data);
        tokio::spawn(async move {
            cleanup_expired_keys(data, shutdown_rx).await;
        });

        backend
    }

    /// Explicitly signals the background TTL cleanup task to stop.
    ///
    /// The store remains fully usable afterwards; expired keys are still
    /// hidden from reads, they are just not reclaimed.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Number of physically stored keys, including expired ones that have not
    /// been reclaimed yet.
    #[must_use]
    pub fn stored_key_count(&self) -> usize {
        self.data.read().len()
    }

    /// Returns the live entry for `key`, dropping it first if it has expired.
    fn live_entry<'a>(map: &'a mut Map, key: &[u8], now: Instant) -> Option<&'a mut Entry> {
        if map.get(key).is_some_and(|entry| entry.is_expired(now)) {
            map.remove(key);
        }
        map.get_mut(key)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task to reclaim expired keys. Runs every second until the
/// shutdown signal fires or the sender is dropped.
async fn cleanup_expired_keys(data: Arc<RwLock<Map>>, mut shutdown_rx: watch::Receiver<()>) {
    loop {
        select! {
            _ = sleep(Duration::from_secs(1)) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let now = Instant::now();
        let expired_keys: Vec<Vec<u8>> = {
            let guard = data.read();
            guard.iter().filter(|(_, entry)| entry.is_expired(now)).map(|(k, _)| k.clone()).collect()
        };

        if !expired_keys.is_empty() {
            let mut guard = data.write();
            for key in expired_keys {
                // Re-check: the key may have been rewritten since the scan.
                if guard.get(&key).is_some_and(|entry| entry.is_expired(now)) {
                    guard.remove(&key);
                }
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryBackend {
    #[tracing::instrument(skip(self, key), level = "trace")]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        fail_point!("memory-get", |_| Err(StorageError::connection("injected get failure")));

        let data = self.data.read();
        match data.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => match &entry.value {
                Value::Plain(bytes) => Ok(Some(bytes.clone())),
                Value::List(_) => Err(StorageError::wrong_type(key)),
            },
            _ => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, key, value), level = "trace")]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let mut data = self.data.write();
        data.insert(key, Entry { value: Value::Plain(Bytes::from(value)), expires_at: None });
        Ok(())
    }

    #[tracing::instrument(skip(self, key, value), level = "trace")]
    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        let expires_at = Instant::now().checked_add(ttl);
        let mut data = self.data.write();
        data.insert(key, Entry { value: Value::Plain(Bytes::from(value)), expires_at });
        Ok(())
    }

    #[tracing::instrument(skip(self, key), level = "trace")]
    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        data.remove(key);
        Ok(())
    }

    async fn compare_and_delete(&self, key: &[u8], expected: &[u8]) -> StorageResult<bool> {
        let mut data = self.data.write();
        let matches = match Self::live_entry(&mut data, key, Instant::now()) {
            Some(Entry { value: Value::Plain(current), .. }) => current[..] == *expected,
            _ => false,
        };
        if matches {
            data.remove(key);
        }
        Ok(matches)
    }

    async fn increment(&self, key: &[u8], delta: i64) -> StorageResult<i64> {
        let mut data = self.data.write();
        let now = Instant::now();

        let (current, expires_at) = match Self::live_entry(&mut data, key, now) {
            None => (0, None),
            Some(Entry { value: Value::Plain(bytes), expires_at }) => {
                let parsed = std::str::from_utf8(bytes)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| StorageError::wrong_type(key))?;
                (parsed, *expires_at)
            },
            Some(Entry { value: Value::List(_), .. }) => return Err(StorageError::wrong_type(key)),
        };

        let next = current
            .checked_add(delta)
            .ok_or_else(|| StorageError::internal("increment would overflow i64"))?;
        data.insert(
            key.to_vec(),
            Entry { value: Value::Plain(Bytes::from(next.to_string())), expires_at },
        );
        Ok(next)
    }

    async fn list_push(&self, key: &[u8], value: Vec<u8>) -> StorageResult<usize> {
        let mut data = self.data.write();
        match Self::live_entry(&mut data, key, Instant::now()) {
            Some(Entry { value: Value::List(list), .. }) => {
                list.push_front(Bytes::from(value));
                Ok(list.len())
            },
            Some(Entry { value: Value::Plain(_), .. }) => Err(StorageError::wrong_type(key)),
            None => {
                let mut list = VecDeque::with_capacity(1);
                list.push_front(Bytes::from(value));
                data.insert(key.to_vec(), Entry { value: Value::List(list), expires_at: None });
                Ok(1)
            },
        }
    }

    async fn list_range(&self, key: &[u8], start: isize, stop: isize) -> StorageResult<Vec<Bytes>> {
        let data = self.data.read();
        match data.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => match &entry.value {
                Value::List(list) => Ok(resolve_range(list.len(), start, stop)
                    .map(|(from, to)| list.range(from..to).cloned().collect())
                    .unwrap_or_default()),
                Value::Plain(_) => Err(StorageError::wrong_type(key)),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn list_trim(&self, key: &[u8], start: isize, stop: isize) -> StorageResult<()> {
        let mut data = self.data.write();
        let remove = match Self::live_entry(&mut data, key, Instant::now()) {
            Some(Entry { value: Value::List(list), .. }) => {
                match resolve_range(list.len(), start, stop) {
                    Some((from, to)) => {
                        list.truncate(to);
                        list.drain(..from);
                        list.is_empty()
                    },
                    None => true,
                }
            },
            Some(Entry { value: Value::Plain(_), .. }) => return Err(StorageError::wrong_type(key)),
            None => false,
        };
        if remove {
            data.remove(key);
        }
        Ok(())
    }

    async fn expire(&self, key: &[u8], ttl: Duration) -> StorageResult<bool> {
        let mut data = self.data.write();
        match Self::live_entry(&mut data, key, Instant::now()) {
            Some(entry) => {
                entry.expires_at = Instant::now().checked_add(ttl);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn health_check(&self) -> StorageResult<()> {
        fail_point!("memory-health-check", |_| Err(StorageError::connection("injected health failure")));
        // Acquiring the read lock proves we are not deadlocked.
        let _unused = self.data.read();
        Ok(())
    }
}
