//! Authentication error types.
//!
//! This module defines errors that can occur while validating tokens,
//! consulting the revocation list and resolving the user cache.
//!
//! Every variant carries enough detail for internal logs and audit records.
//! None of that detail may reach a client: render failures through
//! [`AuthError::public_message`] or [`PublicAuthError`], which never reveal
//! which step rejected the request.

use std::fmt;

use medianest_storage::StorageError;
use thiserror::Error;

/// The only message ever shown to an unauthenticated caller.
pub const PUBLIC_AUTH_FAILURE: &str = "authentication failed";

/// Authentication errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. New variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Token cannot be parsed, or a required claim is missing or empty.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Header algorithm is forbidden or not in the allow-list.
    #[error("Algorithm not allowed: {0}")]
    AlgorithmNotAllowed(String),

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Token lifetime has elapsed.
    #[error("Token expired")]
    Expired,

    /// The request IP differs from the IP the token was issued to.
    #[error("Token IP binding mismatch")]
    IpMismatch,

    /// Token is on the revocation list or belongs to a superseded generation.
    #[error("Token revoked")]
    Blacklisted,

    /// The backing store could not give a definitive answer.
    ///
    /// Raised for timeouts and connection failures on the authentication
    /// path. The request is rejected, never admitted.
    #[error("Cache backend unavailable: {0}")]
    CacheBackendUnavailable(
        /// The underlying storage error.
        #[source]
        StorageError,
    ),

    /// The user referenced by the token no longer exists.
    #[error("User not found")]
    UserNotFound,

    /// The user exists but is not active.
    #[error("User inactive")]
    UserInactive,

    /// A token handed to logout or rotation belongs to a different user.
    #[error("Token does not belong to the requesting user")]
    TokenOwnerMismatch,
}

impl AuthError {
    /// Creates a `MalformedToken` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedToken(message.into())
    }

    /// Creates an `AlgorithmNotAllowed` error.
    #[must_use]
    pub fn algorithm_not_allowed(message: impl Into<String>) -> Self {
        Self::AlgorithmNotAllowed(message.into())
    }

    /// Stable, snake_case identifier for logs and audit records.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedToken(_) => "malformed_token",
            Self::AlgorithmNotAllowed(_) => "algorithm_not_allowed",
            Self::InvalidSignature => "invalid_signature",
            Self::Expired => "expired",
            Self::IpMismatch => "ip_mismatch",
            Self::Blacklisted => "blacklisted",
            Self::CacheBackendUnavailable(_) => "cache_backend_unavailable",
            Self::UserNotFound => "user_not_found",
            Self::UserInactive => "user_inactive",
            Self::TokenOwnerMismatch => "token_owner_mismatch",
        }
    }

    /// Message safe to return to the caller. Identical for every variant.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        PUBLIC_AUTH_FAILURE
    }

    /// Whether the failure came from store degradation rather than the token.
    #[must_use]
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::CacheBackendUnavailable(_))
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                AuthError::algorithm_not_allowed("algorithm rejected by verifier")
            },
            ErrorKind::InvalidToken => AuthError::malformed("invalid JWT structure"),
            ErrorKind::MissingRequiredClaim(claim) => {
                AuthError::malformed(format!("missing claim: {claim}"))
            },
            _ => AuthError::malformed(format!("JWT error: {err}")),
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::CacheBackendUnavailable(err)
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Client-facing view of an [`AuthError`].
///
/// `Display` always renders [`PUBLIC_AUTH_FAILURE`]; the wrapped error is
/// reachable only through [`PublicAuthError::internal`] for server-side logs.
pub struct PublicAuthError(AuthError);

impl PublicAuthError {
    /// Returns the internal error for logging.
    pub fn internal(&self) -> &AuthError {
        &self.0
    }

    /// Consumes the wrapper, returning the internal error.
    pub fn into_internal(self) -> AuthError {
        self.0
    }
}

impl From<AuthError> for PublicAuthError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl fmt::Display for PublicAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(PUBLIC_AUTH_FAILURE)
    }
}

impl fmt::Debug for PublicAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicAuthError").field(&PUBLIC_AUTH_FAILURE).finish()
    }
}

impl std::error::Error for PublicAuthError {}
