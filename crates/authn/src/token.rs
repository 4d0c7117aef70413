//! Token signing, verification and claims.
//!
//! [`TokenCodec`] verifies tokens in a fixed order so that each rejection is
//! attributed to the earliest failing step:
//!
//! 1. structure (three segments, decodable header) → [`AuthError::MalformedToken`]
//! 2. header algorithm policy → [`AuthError::AlgorithmNotAllowed`]
//! 3. signature → [`AuthError::InvalidSignature`]
//! 4. expiry (`now > exp + skew`) → [`AuthError::Expired`]
//! 5. required claims present and non-empty → [`AuthError::MalformedToken`]
//!
//! # Example
//!
//! ```
//! use medianest_authn::token::{TokenClaims, TokenCodec};
//! use zeroize::Zeroizing;
//!
//! let codec = TokenCodec::new(&Zeroizing::new(vec![7u8; 32])).unwrap();
//! let claims = TokenClaims::new("user-1", "session-1", "user", "10.0.0.1", 3600);
//! let token = codec.sign(&claims).unwrap();
//!
//! assert_eq!(codec.verify(&token).unwrap().sub, "user-1");
//! ```

use std::{fmt, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use medianest_storage::ConfigError;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{error::AuthError, validation::validate_algorithm};

/// Shortest HMAC secret accepted by [`TokenCodec`].
pub const MIN_SECRET_LEN: usize = 32;

/// Claims carried by every session token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the user id.
    pub sub: String,
    /// Session id.
    pub sid: String,
    /// Role at issuance.
    pub role: String,
    /// IP address the token was issued to.
    pub ip: String,
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// Expiration time (seconds since epoch).
    pub exp: u64,
    /// Session generation at issuance. Tokens minted before a rotation carry
    /// a lower value and are rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#gen: Option<u64>,
}

impl TokenClaims {
    /// Builds claims issued now and expiring after `lifetime_secs`.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        role: impl Into<String>,
        ip: impl Into<String>,
        lifetime_secs: u64,
    ) -> Self {
        let now = Utc::now().timestamp().max(0) as u64;
        Self {
            sub: user_id.into(),
            sid: session_id.into(),
            role: role.into(),
            ip: ip.into(),
            iat: now,
            exp: now.saturating_add(lifetime_secs),
            r#gen: None,
        }
    }

    /// Sets the session generation claim.
    #[must_use]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.r#gen = Some(generation);
        self
    }

    /// Seconds until expiry, or `None` if the token has already expired.
    #[must_use]
    pub fn remaining_lifetime(&self) -> Option<Duration> {
        let now = Utc::now().timestamp().max(0) as u64;
        (self.exp > now).then(|| Duration::from_secs(self.exp - now))
    }

    fn require_non_empty(&self) -> Result<(), AuthError> {
        for (name, value) in
            [("sub", &self.sub), ("sid", &self.sid), ("role", &self.role), ("ip", &self.ip)]
        {
            if value.is_empty() {
                return Err(AuthError::malformed(format!("missing claim: {name}")));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

fn split_token(token: &str) -> Result<[&str; 3], AuthError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() => Ok([h, p, s]),
        _ => Err(AuthError::malformed("JWT must have 3 parts separated by dots")),
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str, what: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::malformed(format!("Failed to decode JWT {what}: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::malformed(format!("Failed to parse JWT {what}: {e}")))
}

/// Signs and verifies session tokens with a shared HMAC secret.
///
/// Pure: no I/O, safe to share across tasks.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    signing_algorithm: Algorithm,
    allowed_algorithms: Vec<Algorithm>,
    clock_skew: Duration,
}

impl TokenCodec {
    /// Creates a codec signing and accepting HS256 only, with no clock skew.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if the secret is shorter than
    /// [`MIN_SECRET_LEN`] bytes.
    pub fn new(secret: &Zeroizing<Vec<u8>>) -> Result<Self, ConfigError> {
        Self::with_policy(secret, vec![Algorithm::HS256], Duration::ZERO)
    }

    /// Creates a codec with an explicit allow-list and expiry leeway.
    ///
    /// The first allowed algorithm is used for signing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the secret is too short or `allowed` is empty.
    pub fn with_policy(
        secret: &Zeroizing<Vec<u8>>,
        allowed: Vec<Algorithm>,
        clock_skew: Duration,
    ) -> Result<Self, ConfigError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::BelowMinimum {
                field: "secret",
                value: format!("{} bytes", secret.len()),
                min: format!("{MIN_SECRET_LEN} bytes"),
            });
        }
        let Some(&signing_algorithm) = allowed.first() else {
            return Err(ConfigError::Invalid {
                field: "allowed_algorithms",
                reason: "at least one algorithm is required".to_owned(),
            });
        };

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            signing_algorithm,
            allowed_algorithms: allowed,
            clock_skew,
        })
    }

    /// Signs `claims`. Deterministic for equal inputs.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if the claims cannot be encoded.
    pub fn sign(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        let header = Header::new(self.signing_algorithm);
        jsonwebtoken::encode(&header, claims, &self.encoding_key).map_err(AuthError::from)
    }

    /// Verifies `token` and returns its claims.
    ///
    /// # Errors
    ///
    /// See the module documentation for the order of checks and the error
    /// each one produces.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.decode_checked(token, true)
    }

    /// Verifies `token` like [`verify`](Self::verify) but accepts an elapsed `exp`.
    ///
    /// Revocation paths use this: an expired token may still be revoked, a
    /// forged one may not.
    ///
    /// # Errors
    ///
    /// Same as [`verify`](Self::verify), except [`AuthError::Expired`] is
    /// never returned.
    pub fn verify_signature(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.decode_checked(token, false)
    }

    fn decode_checked(&self, token: &str, validate_exp: bool) -> Result<TokenClaims, AuthError> {
        let [header_segment, _, _] = split_token(token)?;
        let header: RawHeader = decode_segment(header_segment, "header")?;
        let algorithm = validate_algorithm(&header.alg, &self.allowed_algorithms)?;

        let mut validation = Validation::new(algorithm);
        validation.leeway = self.clock_skew.as_secs();
        validation.validate_exp = validate_exp;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        // Signature is checked before `exp`, so a forged expired token reports
        // InvalidSignature rather than Expired.
        let claims = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(AuthError::from)?
            .claims;

        claims.require_non_empty()?;
        Ok(claims)
    }

    /// Decodes the payload without verifying the signature or expiry.
    ///
    /// For tooling that inspects tokens. Never use the result to
    /// authenticate or revoke.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if the token cannot be parsed.
    pub fn decode_unverified(token: &str) -> Result<TokenClaims, AuthError> {
        let [_, payload_segment, _] = split_token(token)?;
        decode_segment(payload_segment, "payload")
    }

    /// Returns the allow-list this codec verifies against.
    pub fn allowed_algorithms(&self) -> &[Algorithm] {
        &self.allowed_algorithms
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("signing_algorithm", &self.signing_algorithm)
            .field("allowed_algorithms", &self.allowed_algorithms)
            .field("clock_skew", &self.clock_skew)
            .finish_non_exhaustive()
    }
}
