//! Key/value store abstraction for the MediaNest session-security core.
//!
//! This crate provides the [`KeyValueStore`] trait that every security
//! component (token blacklist, user auth cache, activity detector, audit log)
//! is written against. All mutable security state lives behind this trait so
//! that any number of stateless service instances can share one store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    medianest-authn                          │
//! │  AuthValidator │ TokenBlacklist │ UserAuthCache │ audit     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   medianest-storage                         │
//! │              KeyValueStore trait                            │
//! │   (get, set_with_ttl, increment, list_push, list_range)     │
//! ├──────────────┬──────────────────────────────────────────────┤
//! │ MemoryBackend│  TimeoutBackend<S> (deadline per operation)  │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use medianest_storage::{KeyValueStore, MemoryBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryBackend::new();
//!
//!     store.set(b"user:123".to_vec(), b"Alice".to_vec()).await?;
//!     let value = store.get(b"user:123").await?;
//!     assert_eq!(value.map(|b| b.to_vec()), Some(b"Alice".to_vec()));
//!
//!     // Lists are newest-first.
//!     store.list_push(b"events", b"first".to_vec()).await?;
//!     store.list_push(b"events", b"second".to_vec()).await?;
//!     let newest = store.list_range(b"events", 0, 0).await?;
//!     assert_eq!(newest[0].as_ref(), b"second");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`]. Stores map their internal
//! errors to [`StorageError`]; [`StorageError::is_transient`] tells callers
//! whether a read is worth retrying (see [`retry::with_read_retry`]).
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with [`testutil::FailingBackend`] and assertion
//!   macros. Enable this in `[dev-dependencies]` for integration tests.
//! - **`failpoints`**: Activates `fail` crate injection points inside [`MemoryBackend`].

#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod memory;
pub mod retry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod timeout;

pub use backend::KeyValueStore;
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use retry::{ReadRetryPolicy, with_read_retry};
pub use timeout::{DEFAULT_STORE_TIMEOUT, TimeoutBackend};
