//! Shared test utilities for authentication testing.
//!
//! Provides a fixed HMAC test secret, claim and token builders, raw JWT
//! crafting for attack tests, a [`TestHarness`] wiring an [`AuthValidator`]
//! over in-memory stores, and the [`assert_auth_error!`](crate::assert_auth_error)
//! macro. Feature-gated behind `testutil` to keep it out of production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! medianest-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use medianest_authn::testutil::{TestHarness, craft_raw_jwt};
//! ```

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use medianest_storage::{KeyValueStore, MemoryBackend};
use zeroize::Zeroizing;

use crate::{
    config::AuthConfig,
    store::{MemorySessionStore, MemoryUserStore, UserRecord, UserStatus},
    token::{TokenClaims, TokenCodec},
    validator::AuthValidator,
};

/// HMAC secret used by every helper in this module.
pub const TEST_SECRET: &[u8] = b"medianest-test-secret-0123456789-abcdef";

/// IP address the helper tokens are issued to.
pub const TEST_IP: &str = "10.0.0.1";

/// [`TEST_SECRET`] as owned key material.
pub fn test_secret() -> Zeroizing<Vec<u8>> {
    Zeroizing::new(TEST_SECRET.to_vec())
}

/// HS256 codec over [`TEST_SECRET`].
///
/// # Panics
///
/// Never in practice; the test secret satisfies the length minimum.
#[allow(clippy::expect_used)]
pub fn test_codec() -> TokenCodec {
    TokenCodec::new(&test_secret()).expect("test secret is long enough")
}

/// Claims for `user_id`/`session_id` with role `user`, issued to
/// [`TEST_IP`], valid for one hour.
pub fn test_claims(user_id: &str, session_id: &str) -> TokenClaims {
    TokenClaims::new(user_id, session_id, "user", TEST_IP, 3600)
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.`
/// with an empty signature, for testing rejection of `alg: "none"`,
/// algorithm confusion and malformed claims.
///
/// # Panics
///
/// Panics if JSON serialization fails.
#[allow(clippy::expect_used)]
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Builds an active [`UserRecord`] with an `@example.com` email.
pub fn test_user(id: &str, role: &str) -> UserRecord {
    UserRecord {
        id: id.to_owned(),
        email: format!("{id}@example.com"),
        role: role.to_owned(),
        status: UserStatus::Active,
    }
}

/// An [`AuthValidator`] over in-memory stores, seeded with `alice` (role
/// `user`) and `bob` (role `admin`).
pub struct TestHarness {
    /// The validator under test.
    pub validator: AuthValidator,
    /// The backing key-value store, unwrapped.
    pub store: Arc<dyn KeyValueStore>,
    /// Canonical users.
    pub users: MemoryUserStore,
    /// Canonical sessions.
    pub sessions: MemorySessionStore,
}

impl TestHarness {
    /// Harness with default configuration over a fresh [`MemoryBackend`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryBackend::new()))
    }

    /// Harness with default configuration over `store`.
    pub fn with_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_config(AuthConfig::default(), store)
    }

    /// Harness with `config` over `store`.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    #[allow(clippy::expect_used)]
    pub fn with_config(config: AuthConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let users = MemoryUserStore::new();
        users.upsert(test_user("alice", "user"));
        users.upsert(test_user("bob", "admin"));
        let sessions = MemorySessionStore::new();

        let validator = AuthValidator::new(
            &config,
            &test_secret(),
            Arc::clone(&store),
            Arc::new(users.clone()),
            Arc::new(sessions.clone()),
        )
        .expect("valid test configuration");

        Self { validator, store, users, sessions }
    }

    /// Signs `claims` with the validator's codec.
    ///
    /// # Panics
    ///
    /// Panics if signing fails.
    #[allow(clippy::expect_used)]
    pub fn sign(&self, claims: &TokenClaims) -> String {
        self.validator.codec().sign(claims).expect("sign test token")
    }

    /// Signs a one-hour token for `user_id` carrying the user's canonical role.
    ///
    /// Unknown users get role `user`.
    pub fn token_for(&self, user_id: &str, session_id: &str, ip: &str) -> String {
        let role = if user_id == "bob" { "admin" } else { "user" };
        self.sign(&TokenClaims::new(user_id, session_id, role, ip, 3600))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Asserts that a [`Result<T, AuthError>`] is an `Err` matching the given
/// [`AuthError`](crate::error::AuthError) variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use medianest_authn::assert_auth_error;
/// use medianest_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::Expired);
/// assert_auth_error!(result, Expired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {{
        let result = &$result;
        assert!(
            matches!(result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            result,
        );
    }};
    ($result:expr, $variant:ident, $msg:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            result,
        );
    }};
}
