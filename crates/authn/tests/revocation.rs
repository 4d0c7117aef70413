//! Revocation and fail-closed tests.
//!
//! Covers logout finality, bulk session invalidation, token rotation with
//! session generations, invalidate-then-read freshness, and the guarantee that
//! a degraded store never turns into a successful authentication.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use medianest_authn::{
    AuditAction, AuthConfig, SessionRecord, SessionToken, TokenClaims, UserStatus, assert_auth_error,
    testutil::{TEST_IP, TestHarness, craft_raw_jwt},
    token_hash,
};
use medianest_storage::{MemoryBackend, testutil::FailingBackend};

fn failing_harness() -> (FailingBackend<MemoryBackend>, TestHarness) {
    let failing = FailingBackend::new(MemoryBackend::new());
    let harness = TestHarness::with_store(Arc::new(failing.clone()));
    (failing, harness)
}

// ---------------------------------------------------------------------------
// Blacklist finality
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_logout_is_final() {
    let h = TestHarness::new();
    let token = h.token_for("alice", "s1", TEST_IP);
    h.validator.authenticate(&token, TEST_IP).await.unwrap();

    h.validator.logout(&token, "alice").await.unwrap();

    for _ in 0..3 {
        assert_auth_error!(h.validator.authenticate(&token, TEST_IP).await, Blacklisted);
    }
    let actions: Vec<_> =
        h.validator.audit().recent("alice", 10).await.unwrap().into_iter().map(|e| e.action).collect();
    assert!(actions.contains(&AuditAction::Logout));
    assert!(actions.contains(&AuditAction::BlacklistedTokenUsed));
}

#[tokio::test]
async fn test_logout_leaves_other_sessions_alone() {
    let h = TestHarness::new();
    let phone = h.token_for("alice", "phone", TEST_IP);
    let laptop = h.token_for("alice", "laptop", TEST_IP);

    h.validator.logout(&phone, "alice").await.unwrap();

    assert_auth_error!(h.validator.authenticate(&phone, TEST_IP).await, Blacklisted);
    assert!(h.validator.authenticate(&laptop, TEST_IP).await.is_ok());
}

#[tokio::test]
async fn test_blacklist_entry_lives_as_long_as_the_token() {
    let h = TestHarness::new();
    let token = h.sign(&TokenClaims::new("alice", "s1", "user", TEST_IP, 600));
    h.validator.logout(&token, "alice").await.unwrap();

    let entry = h.validator.blacklist().entry(&token).await.unwrap().expect("entry stored");
    assert_eq!(entry.token_hash, token_hash(&token));
    let remaining = (entry.expires_at - entry.blacklisted_at).num_seconds();
    assert!((598..=600).contains(&remaining), "remaining {remaining}");
}

#[tokio::test]
async fn test_logout_rejects_forged_tokens() {
    let h = TestHarness::new();
    let unsigned = craft_raw_jwt(
        &serde_json::json!({"alg": "none", "typ": "JWT"}),
        &serde_json::json!({
            "sub": "alice", "sid": "s1", "role": "user", "ip": TEST_IP,
            "iat": 0, "exp": 9_000_000_000_000u64,
        }),
    );
    assert_auth_error!(h.validator.logout(&unsigned, "alice").await, AlgorithmNotAllowed);
    assert_eq!(h.validator.blacklist().entry(&unsigned).await.unwrap(), None);

    let genuine = h.token_for("alice", "s1", TEST_IP);
    let mut parts: Vec<&str> = genuine.split('.').collect();
    parts[2] = "c2lnbmF0dXJl";
    let resigned = parts.join(".");
    assert_auth_error!(h.validator.logout(&resigned, "alice").await, InvalidSignature);
    assert!(h.validator.audit().recent("alice", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_logout_of_another_users_token_is_refused() {
    let h = TestHarness::new();
    let token = h.token_for("alice", "s1", TEST_IP);

    assert_auth_error!(h.validator.logout(&token, "bob").await, TokenOwnerMismatch);
    assert!(h.validator.authenticate(&token, TEST_IP).await.is_ok());
}

// ---------------------------------------------------------------------------
// Bulk invalidation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_invalidate_user_sessions_revokes_every_session() {
    let h = TestHarness::new();
    let first = h.token_for("alice", "s1", TEST_IP);
    let second = h.token_for("alice", "s2", TEST_IP);
    h.sessions.add("alice", SessionRecord {
        session_id: "s1".to_owned(),
        token: SessionToken::Raw(first.clone()),
        ip_address: TEST_IP.to_owned(),
        expires_at: None,
    });
    h.sessions.add("alice", SessionRecord {
        session_id: "s2".to_owned(),
        token: SessionToken::Hash(token_hash(&second)),
        ip_address: TEST_IP.to_owned(),
        expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
    });
    let bob = h.token_for("bob", "s3", TEST_IP);

    let revoked = h.validator.invalidate_user_sessions("alice", "role_change").await.unwrap();
    assert_eq!(revoked, 2);

    assert_auth_error!(h.validator.authenticate(&first, TEST_IP).await, Blacklisted);
    assert_auth_error!(h.validator.authenticate(&second, TEST_IP).await, Blacklisted);
    assert!(h.validator.authenticate(&bob, TEST_IP).await.is_ok());
}

#[tokio::test]
async fn test_invalidate_then_read_sees_fresh_role() {
    let h = TestHarness::new();
    let token = h.token_for("alice", "s1", TEST_IP);
    assert_eq!(h.validator.authenticate(&token, TEST_IP).await.unwrap().role, "user");

    h.users.set_role("alice", "admin");
    h.validator.cache().invalidate_user_cache("alice", "role_change").await.unwrap();

    let context = h.validator.authenticate(&token, TEST_IP).await.unwrap();
    assert_eq!(context.role, "admin");
}

#[tokio::test]
async fn test_deactivation_takes_effect_after_invalidation() {
    let h = TestHarness::new();
    let token = h.token_for("alice", "s1", TEST_IP);
    h.validator.authenticate(&token, TEST_IP).await.unwrap();

    h.users.set_status("alice", UserStatus::Inactive);
    h.validator.cache().invalidate_user_cache("alice", "deactivated").await.unwrap();

    assert_auth_error!(h.validator.authenticate(&token, TEST_IP).await, UserInactive);
}

#[tokio::test]
async fn test_unknown_user_is_rejected() {
    let h = TestHarness::new();
    let token = h.token_for("ghost", "s1", TEST_IP);
    assert_auth_error!(h.validator.authenticate(&token, TEST_IP).await, UserNotFound);
}

// ---------------------------------------------------------------------------
// Rotation and generations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rotation_supersedes_older_generations() {
    let h = TestHarness::new();
    let gen0 = h.sign(&TokenClaims::new("alice", "s1", "user", TEST_IP, 3600).with_generation(0));
    let sibling = h.sign(&TokenClaims::new("alice", "s1", "user", TEST_IP, 1800).with_generation(0));
    h.validator.authenticate(&sibling, TEST_IP).await.unwrap();

    let next = h.validator.rotate_token(&gen0, "alice").await.unwrap();
    assert_eq!(next, 1);
    let gen1 = h.sign(&TokenClaims::new("alice", "s1", "user", TEST_IP, 3600).with_generation(next));

    assert_auth_error!(h.validator.authenticate(&gen0, TEST_IP).await, Blacklisted);
    assert_auth_error!(h.validator.authenticate(&sibling, TEST_IP).await, Blacklisted);
    assert!(h.validator.authenticate(&gen1, TEST_IP).await.is_ok());
}

#[tokio::test]
async fn test_tokens_without_generation_are_not_generation_checked() {
    let h = TestHarness::new();
    let rotated = h.sign(&TokenClaims::new("alice", "s1", "user", TEST_IP, 3600).with_generation(0));
    h.validator.rotate_token(&rotated, "alice").await.unwrap();

    let legacy = h.token_for("alice", "s1", TEST_IP);
    assert!(h.validator.authenticate(&legacy, TEST_IP).await.is_ok());
}

// ---------------------------------------------------------------------------
// Fail closed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_store_outage_fails_closed() {
    let (failing, h) = failing_harness();
    let token = h.token_for("alice", "s1", TEST_IP);
    h.validator.authenticate(&token, TEST_IP).await.unwrap();

    failing.fail_all();
    assert_auth_error!(h.validator.authenticate(&token, TEST_IP).await, CacheBackendUnavailable);

    failing.heal();
    assert!(h.validator.authenticate(&token, TEST_IP).await.is_ok());
}

#[tokio::test]
async fn test_blacklisted_token_stays_rejected_during_outage() {
    let (failing, h) = failing_harness();
    let token = h.token_for("alice", "s1", TEST_IP);
    h.validator.logout(&token, "alice").await.unwrap();

    failing.fail_all();
    let result = h.validator.authenticate(&token, TEST_IP).await;
    assert!(result.is_err(), "revoked token admitted during outage: {result:?}");
}

#[tokio::test]
async fn test_single_transient_read_failure_is_retried() {
    let (failing, h) = failing_harness();
    let token = h.token_for("alice", "s1", TEST_IP);

    failing.fail_next(1);
    assert!(h.validator.authenticate(&token, TEST_IP).await.is_ok());
}

#[tokio::test]
async fn test_slow_store_times_out_and_fails_closed() {
    let failing = FailingBackend::new(MemoryBackend::new());
    let config = AuthConfig::builder().store_timeout(Duration::from_millis(5)).build();
    let h = TestHarness::with_config(config, Arc::new(failing.clone()));
    let token = h.token_for("alice", "s1", TEST_IP);

    failing.set_delay(Duration::from_millis(100));
    assert_auth_error!(h.validator.authenticate(&token, TEST_IP).await, CacheBackendUnavailable);
}

#[tokio::test]
async fn test_logout_during_outage_reports_failure() {
    let (failing, h) = failing_harness();
    let token = h.token_for("alice", "s1", TEST_IP);

    failing.fail_writes();
    assert_auth_error!(h.validator.logout(&token, "alice").await, CacheBackendUnavailable);
}
