//! Security-focused authentication tests.
//!
//! These tests drive the full `authenticate` pipeline with hostile tokens:
//! algorithm substitution (`none` in any case), asymmetric-algorithm
//! confusion, wrong secrets, expired tokens and malformed structures.
//! Every rejection must also render as the same public message.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use medianest_authn::{
    PUBLIC_AUTH_FAILURE, PublicAuthError, TokenClaims, TokenCodec, assert_auth_error,
    testutil::{TEST_IP, TEST_SECRET, TestHarness, craft_raw_jwt, test_claims},
};
use rand_core::OsRng;
use serde_json::json;
use zeroize::Zeroizing;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Generate a test Ed25519 key pair and return (pkcs8_der, public_key_bytes).
fn generate_test_keypair() -> (Zeroizing<Vec<u8>>, [u8; 32]) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key_bytes = signing_key.verifying_key().to_bytes();

    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ]);
    pkcs8_der.extend_from_slice(&*private_bytes);

    (pkcs8_der, public_key_bytes)
}

fn payload_json() -> serde_json::Value {
    let now = Utc::now().timestamp();
    json!({
        "sub": "alice",
        "sid": "s1",
        "role": "user",
        "ip": TEST_IP,
        "iat": now,
        "exp": now + 3600,
    })
}

/// Signs `payload` with HMAC under `secret`, using `alg` in the header.
fn hmac_jwt(alg: Algorithm, secret: &[u8], payload: &serde_json::Value) -> String {
    jsonwebtoken::encode(&Header::new(alg), payload, &EncodingKey::from_secret(secret))
        .expect("encode test jwt")
}

// ---------------------------------------------------------------------------
// Algorithm substitution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_algorithm_none_rejected_in_every_case() {
    let h = TestHarness::new();
    for alg in ["none", "None", "NONE", "nOnE"] {
        let token = craft_raw_jwt(&json!({"alg": alg, "typ": "JWT"}), &payload_json());
        let result = h.validator.authenticate(&token, TEST_IP).await;
        assert_auth_error!(result, AlgorithmNotAllowed, alg);
    }
}

#[tokio::test]
async fn test_eddsa_signed_token_rejected() {
    let h = TestHarness::new();
    let (pkcs8_der, _) = generate_test_keypair();
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::EdDSA),
        &payload_json(),
        &EncodingKey::from_ed_der(&pkcs8_der),
    )
    .expect("encode eddsa jwt");

    let result = h.validator.authenticate(&token, TEST_IP).await;
    assert_auth_error!(result, AlgorithmNotAllowed);
}

#[tokio::test]
async fn test_public_key_as_hmac_secret_confusion_rejected() {
    let h = TestHarness::new();
    let (_, public_key) = generate_test_keypair();

    // An attacker who knows a public key signs with it as an HMAC secret and
    // labels the header with the asymmetric algorithm.
    let signed = hmac_jwt(Algorithm::HS256, &public_key, &payload_json());
    let (_, rest) = signed.split_once('.').expect("payload and signature");

    for alg in ["RS256", "ES256", "PS512", "EdDSA"] {
        let header_b64 = URL_SAFE_NO_PAD.encode(json!({"alg": alg, "typ": "JWT"}).to_string());
        let forged = format!("{header_b64}.{rest}");
        assert_auth_error!(h.validator.authenticate(&forged, TEST_IP).await, AlgorithmNotAllowed, alg);
    }
}

#[tokio::test]
async fn test_hmac_variant_outside_allow_list_rejected() {
    let h = TestHarness::new();
    let token = hmac_jwt(Algorithm::HS512, TEST_SECRET, &payload_json());
    assert_auth_error!(h.validator.authenticate(&token, TEST_IP).await, AlgorithmNotAllowed);
}

// ---------------------------------------------------------------------------
// Signature and expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_round_trip_authenticates() {
    let h = TestHarness::new();
    let token = h.sign(&test_claims("alice", "s1"));
    let context = h.validator.authenticate(&token, TEST_IP).await.unwrap();
    assert_eq!(context.user_id, "alice");
}

#[tokio::test]
async fn test_wrong_secret_is_invalid_signature() {
    let h = TestHarness::new();
    let other = TokenCodec::new(&Zeroizing::new(vec![b'z'; 48])).unwrap();
    let token = other.sign(&test_claims("alice", "s1")).unwrap();
    assert_auth_error!(h.validator.authenticate(&token, TEST_IP).await, InvalidSignature);
}

#[tokio::test]
async fn test_tampered_payload_is_invalid_signature() {
    let h = TestHarness::new();
    let token = h.sign(&test_claims("alice", "s1"));
    let [header, _, signature]: [&str; 3] =
        token.split('.').collect::<Vec<_>>().try_into().expect("three segments");

    let mut forged = payload_json();
    forged["sub"] = json!("bob");
    let forged_payload = URL_SAFE_NO_PAD.encode(forged.to_string());
    let tampered = format!("{header}.{forged_payload}.{signature}");

    assert_auth_error!(h.validator.authenticate(&tampered, TEST_IP).await, InvalidSignature);
}

#[tokio::test]
async fn test_expired_token_rejected() {
    let h = TestHarness::new();
    let now = Utc::now().timestamp() as u64;
    let claims = TokenClaims { iat: now - 7200, exp: now - 60, ..test_claims("alice", "s1") };
    let token = h.sign(&claims);
    assert_auth_error!(h.validator.authenticate(&token, TEST_IP).await, Expired);
}

#[tokio::test]
async fn test_expired_token_with_wrong_secret_reports_signature() {
    let h = TestHarness::new();
    let now = Utc::now().timestamp() as u64;
    let claims = TokenClaims { iat: now - 7200, exp: now - 60, ..test_claims("alice", "s1") };
    let other = TokenCodec::new(&Zeroizing::new(vec![b'q'; 32])).unwrap();
    let token = other.sign(&claims).unwrap();
    assert_auth_error!(h.validator.authenticate(&token, TEST_IP).await, InvalidSignature);
}

// ---------------------------------------------------------------------------
// Malformed structure and claims
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_malformed_structures_rejected() {
    let h = TestHarness::new();
    for token in ["", "abc", "a.b", "a.b.c.d", "!!!.???.***"] {
        assert_auth_error!(h.validator.authenticate(token, TEST_IP).await, MalformedToken, token);
    }
}

#[tokio::test]
async fn test_missing_required_claim_rejected() {
    let h = TestHarness::new();
    let mut payload = payload_json();
    payload.as_object_mut().expect("object").remove("sid");
    let token = hmac_jwt(Algorithm::HS256, TEST_SECRET, &payload);
    assert_auth_error!(h.validator.authenticate(&token, TEST_IP).await, MalformedToken);
}

#[tokio::test]
async fn test_missing_exp_rejected() {
    let h = TestHarness::new();
    let mut payload = payload_json();
    payload.as_object_mut().expect("object").remove("exp");
    let token = hmac_jwt(Algorithm::HS256, TEST_SECRET, &payload);
    assert_auth_error!(h.validator.authenticate(&token, TEST_IP).await, MalformedToken);
}

#[tokio::test]
async fn test_unknown_extra_claims_are_ignored() {
    let h = TestHarness::new();
    let mut payload = payload_json();
    payload["scope"] = json!("admin:everything");
    let token = hmac_jwt(Algorithm::HS256, TEST_SECRET, &payload);
    let context = h.validator.authenticate(&token, TEST_IP).await.unwrap();
    assert_eq!(context.role, "user");
}

// ---------------------------------------------------------------------------
// Public error rendering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_every_rejection_renders_identically() {
    let h = TestHarness::new();
    let attempts = [
        craft_raw_jwt(&json!({"alg": "none"}), &payload_json()),
        hmac_jwt(Algorithm::HS256, b"another-secret-another-secret-00", &payload_json()),
        "garbage".to_owned(),
        h.token_for("alice", "s1", "10.9.9.9"),
        h.token_for("mallory", "s1", TEST_IP),
    ];

    for token in attempts {
        let err = h.validator.authenticate(&token, TEST_IP).await.expect_err("must be rejected");
        let public = PublicAuthError::from(err);
        assert_eq!(public.to_string(), PUBLIC_AUTH_FAILURE);
        assert!(!format!("{public:?}").contains(public.internal().kind()));
    }
}
