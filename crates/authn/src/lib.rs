//! # MediaNest Authentication Core
//!
//! Session-token validation and the security state around it.
//!
//! This crate provides:
//! - **Token codec**: HMAC-signed claims with a strict algorithm allow-list
//! - **Revocation**: a token blacklist with per-session generations
//! - **Scope-bound user cache**: snapshots keyed by user, session, IP and role
//! - **Activity detection**: sliding-window scoring of authentication attempts
//! - **Audit trail**: bounded per-user security event lists
//!
//! All shared state lives in an injected
//! [`KeyValueStore`](medianest_storage::KeyValueStore). Any store failure on
//! the authentication path rejects the request.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use medianest_authn::{AuthConfig, AuthValidator, MemorySessionStore, MemoryUserStore};
//! use medianest_storage::MemoryBackend;
//! use zeroize::Zeroizing;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let secret = Zeroizing::new(std::env::var("MEDIANEST_JWT_SECRET")?.into_bytes());
//! let validator = AuthValidator::new(
//!     &AuthConfig::default(),
//!     &secret,
//!     Arc::new(MemoryBackend::new()),
//!     Arc::new(MemoryUserStore::new()),
//!     Arc::new(MemorySessionStore::new()),
//! )?;
//!
//! let context = validator.authenticate_bearer("Bearer eyJhbGciOi...", "203.0.113.7").await?;
//! println!("authenticated {} as {}", context.user_id, context.role);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Suspicious-activity detection.
pub mod activity;
/// Security audit trail.
pub mod audit;
/// Token revocation list and session generations.
pub mod blacklist;
/// Composite cache keys and the per-user key index.
pub mod cache_key;
/// Validator configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// Logout, bulk invalidation and token rotation.
pub mod session;
/// User and session store interfaces.
pub mod store;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Token signing and verification.
pub mod token;
/// Scope-bound user snapshot cache.
pub mod user_cache;
/// Algorithm validation.
pub mod validation;
/// Request authentication.
pub mod validator;

// Re-export key types for convenience
pub use activity::{ActivitySignal, SuspiciousActivityDetector};
pub use audit::{AuditAction, AuditEvent, SecurityAuditLog};
pub use blacklist::{BlacklistEntry, BlacklistStatus, TokenBlacklist, token_hash};
pub use cache_key::{CacheScope, SecureCacheKey, SecureCacheKeyGenerator};
pub use config::{ActivityConfig, AuthConfig, ReadRetryConfig};
pub use error::{AuthError, PUBLIC_AUTH_FAILURE, PublicAuthError, Result};
pub use session::SessionInvalidator;
pub use store::{
    MemorySessionStore, MemoryUserStore, SessionRecord, SessionStore, SessionToken, UserRecord,
    UserStatus, UserStore,
};
pub use token::{MIN_SECRET_LEN, TokenClaims, TokenCodec};
pub use user_cache::{CachedUserSnapshot, UserAuthCache};
pub use validation::{FORBIDDEN_ALGORITHMS, SUPPORTED_ALGORITHMS, validate_algorithm};
pub use validator::{AuthContext, AuthValidator};
