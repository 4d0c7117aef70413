//! Request authentication.
//!
//! [`AuthValidator`] is the composition root: it owns the codec, the
//! revocation list, the user cache, the activity detector and the session
//! invalidator, all sharing one store wrapped in a [`TimeoutBackend`].
//!
//! `authenticate` runs decode, blacklist (including session generation),
//! IP binding and cache lookup in that order. The first failing stage
//! decides the error; later stages are not consulted.

use std::{sync::Arc, time::Duration};

use medianest_storage::{ConfigError, KeyValueStore, ReadRetryPolicy, TimeoutBackend};
use zeroize::Zeroizing;

use crate::{
    activity::{ActivitySignal, SuspiciousActivityDetector},
    audit::{AuditAction, AuditEvent, SecurityAuditLog},
    blacklist::TokenBlacklist,
    cache_key::CacheScope,
    config::AuthConfig,
    error::AuthError,
    session::SessionInvalidator,
    store::{SessionStore, UserStore},
    token::{TokenClaims, TokenCodec},
    user_cache::UserAuthCache,
};

const BEARER_PREFIX: &str = "Bearer ";

/// Identity established by a successful [`AuthValidator::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Authenticated user.
    pub user_id: String,
    /// Session the token belongs to.
    pub session_id: String,
    /// The user's canonical role.
    pub role: String,
    /// The user's email.
    pub email: String,
}

/// Validates tokens and manages their revocation.
#[derive(Clone)]
pub struct AuthValidator {
    codec: TokenCodec,
    blacklist: TokenBlacklist,
    cache: UserAuthCache,
    detector: SuspiciousActivityDetector,
    invalidator: SessionInvalidator,
    audit: SecurityAuditLog,
    users: Arc<dyn UserStore>,
    max_token_lifetime: Duration,
}

impl AuthValidator {
    /// Builds a validator over `store`.
    ///
    /// Every store operation and user fetch issued by the validator is
    /// bounded by `config.store_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation or the secret is
    /// too short.
    pub fn new(
        config: &AuthConfig,
        secret: &Zeroizing<Vec<u8>>,
        store: Arc<dyn KeyValueStore>,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let codec = TokenCodec::with_policy(secret, config.algorithms()?, config.clock_skew)?;
        let store: Arc<dyn KeyValueStore> = Arc::new(TimeoutBackend::new(store, config.store_timeout)?);
        let read_retry = ReadRetryPolicy::from(config.read_retry);

        let audit = SecurityAuditLog::new(Arc::clone(&store), config.audit_max_entries);
        let blacklist = TokenBlacklist::new(
            Arc::clone(&store),
            audit.clone(),
            codec.clone(),
            read_retry,
            config.fallback_token_lifetime,
        );
        let cache = UserAuthCache::new(
            Arc::clone(&store),
            audit.clone(),
            config.cache_ttl,
            config.store_timeout,
            read_retry,
        );
        let detector = SuspiciousActivityDetector::new(Arc::clone(&store), audit.clone(), config.activity.clone());
        let invalidator = SessionInvalidator::new(
            blacklist.clone(),
            cache.clone(),
            audit.clone(),
            sessions,
            config.fallback_token_lifetime,
        );

        let max_token_lifetime = config.fallback_token_lifetime.saturating_add(config.clock_skew);
        Ok(Self { codec, blacklist, cache, detector, invalidator, audit, users, max_token_lifetime })
    }

    /// Authenticates `token` presented from `request_ip`.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] of the first failing stage. Wrap it in
    /// [`PublicAuthError`](crate::PublicAuthError) before showing it to the
    /// caller.
    #[tracing::instrument(skip(self, token))]
    pub async fn authenticate(&self, token: &str, request_ip: &str) -> Result<AuthContext, AuthError> {
        let result = self.run_stages(token, request_ip).await;
        match &result {
            Ok(context) => {
                tracing::debug!(user_id = %context.user_id, session_id = %context.session_id, "authenticated");
            },
            Err(err) if err.is_backend_failure() => {
                tracing::warn!(kind = err.kind(), error = %err, "authentication failed closed");
            },
            Err(err) => tracing::warn!(kind = err.kind(), "authentication rejected"),
        }
        result
    }

    /// Authenticates the token carried by an `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] unless the header is
    /// `Bearer <token>`, then anything [`authenticate`](Self::authenticate) returns.
    pub async fn authenticate_bearer(&self, header: &str, request_ip: &str) -> Result<AuthContext, AuthError> {
        let token = header
            .strip_prefix(BEARER_PREFIX)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::malformed("expected a Bearer authorization header"))?;
        self.authenticate(token, request_ip).await
    }

    async fn run_stages(&self, token: &str, request_ip: &str) -> Result<AuthContext, AuthError> {
        let claims = self.codec.verify(token)?;
        // Blacklist entries live at most this long.
        if claims.remaining_lifetime().is_some_and(|left| left > self.max_token_lifetime) {
            return Err(AuthError::malformed("token lifetime exceeds the accepted maximum"));
        }

        if self.blacklist.is_blacklisted(token).await? {
            self.audit_rejection(&claims, AuditAction::BlacklistedTokenUsed, request_ip).await;
            return Err(AuthError::Blacklisted);
        }
        if let Err(err) = self.blacklist.check_generation(&claims).await {
            if matches!(err, AuthError::Blacklisted) {
                self.audit_rejection(&claims, AuditAction::BlacklistedTokenUsed, request_ip).await;
            }
            return Err(err);
        }

        if claims.ip != request_ip {
            self.audit_rejection(&claims, AuditAction::IpMismatch, request_ip).await;
            return Err(AuthError::IpMismatch);
        }

        let scope = CacheScope::new(&*claims.sub, &*claims.sid, request_ip, &*claims.role);
        let snapshot = self.cache.get(&scope, self.users.as_ref()).await?;

        Ok(AuthContext {
            user_id: snapshot.user_id,
            session_id: claims.sid,
            role: snapshot.role,
            email: snapshot.email,
        })
    }

    async fn audit_rejection(&self, claims: &TokenClaims, action: AuditAction, request_ip: &str) {
        let event = AuditEvent::builder()
            .user_id(&*claims.sub)
            .action(action)
            .reason(action.to_string())
            .ip_address(request_ip)
            .build();
        self.audit.append_best_effort(&event).await;
    }

    /// Revokes `token` and drops the user's cached snapshots.
    ///
    /// # Errors
    ///
    /// See [`SessionInvalidator::logout`].
    pub async fn logout(&self, token: &str, user_id: &str) -> Result<(), AuthError> {
        self.invalidator.logout(token, user_id).await
    }

    /// Revokes every session of `user_id`. Returns the number revoked.
    ///
    /// # Errors
    ///
    /// See [`SessionInvalidator::invalidate_user_sessions`].
    pub async fn invalidate_user_sessions(&self, user_id: &str, reason: &str) -> Result<usize, AuthError> {
        self.invalidator.invalidate_user_sessions(user_id, reason).await
    }

    /// Revokes `old_token` and returns the session's new generation.
    ///
    /// # Errors
    ///
    /// See [`SessionInvalidator::rotate_token`].
    pub async fn rotate_token(&self, old_token: &str, user_id: &str) -> Result<u64, AuthError> {
        self.invalidator.rotate_token(old_token, user_id).await
    }

    /// Records an authentication attempt and scores the user's recent activity.
    ///
    /// # Errors
    ///
    /// See [`SuspiciousActivityDetector::record_and_evaluate`].
    pub async fn record_and_evaluate_activity(&self, user_id: &str, ip: &str) -> Result<ActivitySignal, AuthError> {
        self.detector.record_and_evaluate(user_id, ip).await
    }

    /// Appends a `login` audit event for a completed login.
    pub async fn record_login(&self, user_id: &str, ip: &str, user_agent: Option<&str>) {
        let event = AuditEvent::builder()
            .user_id(user_id)
            .action(AuditAction::Login)
            .ip_address(ip)
            .maybe_user_agent(user_agent)
            .build();
        self.audit.append_best_effort(&event).await;
    }

    /// The token codec, for minting tokens that this validator accepts.
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// The revocation list.
    pub fn blacklist(&self) -> &TokenBlacklist {
        &self.blacklist
    }

    /// The user snapshot cache.
    pub fn cache(&self) -> &UserAuthCache {
        &self.cache
    }

    /// The security audit log.
    pub fn audit(&self) -> &SecurityAuditLog {
        &self.audit
    }
}
