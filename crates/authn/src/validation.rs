//! JWT algorithm validation.
//!
//! Tokens are verified with a shared HMAC secret, so only the HMAC family can
//! ever verify correctly. The policy is an explicit allow-list drawn from that
//! family; everything else is rejected before any key material is touched.
//!
//! # Security
//!
//! - `none` is always rejected, in any letter case
//! - Asymmetric algorithms (RS*, PS*, ES*, EdDSA) are always rejected, which
//!   closes the public-key-as-HMAC-secret confusion attack
//! - The header algorithm must appear in the configured allow-list

use jsonwebtoken::Algorithm;
use medianest_storage::ConfigError;

use crate::error::AuthError;

/// Algorithms that are never accepted, compared case-insensitively.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none"];

/// Algorithm names the verifier can implement with a shared secret.
pub const SUPPORTED_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512"];

/// Default allow-list.
pub const DEFAULT_ALLOWED_ALGORITHMS: &[&str] = &["HS256"];

fn is_asymmetric(alg: &str) -> bool {
    alg == "EdDSA" || ["RS", "PS", "ES"].iter().any(|prefix| alg.starts_with(prefix))
}

fn hmac_algorithm(alg: &str) -> Option<Algorithm> {
    match alg {
        "HS256" => Some(Algorithm::HS256),
        "HS384" => Some(Algorithm::HS384),
        "HS512" => Some(Algorithm::HS512),
        _ => None,
    }
}

/// Validate a JWT header algorithm against the security policy and an allow-list.
///
/// # Errors
///
/// Returns [`AuthError::AlgorithmNotAllowed`] if:
/// - Algorithm is `none` (any case)
/// - Algorithm is asymmetric
/// - Algorithm is not in `allowed`
///
/// # Examples
///
/// ```
/// use jsonwebtoken::Algorithm;
/// use medianest_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("HS256", &[Algorithm::HS256]).is_ok());
/// assert!(validate_algorithm("none", &[Algorithm::HS256]).is_err());
/// assert!(validate_algorithm("RS256", &[Algorithm::HS256]).is_err());
/// ```
pub fn validate_algorithm(alg: &str, allowed: &[Algorithm]) -> Result<Algorithm, AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|f| f.eq_ignore_ascii_case(alg)) {
        return Err(AuthError::algorithm_not_allowed(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if is_asymmetric(alg) {
        return Err(AuthError::algorithm_not_allowed(format!(
            "Asymmetric algorithm '{alg}' cannot be verified with a shared secret"
        )));
    }

    match hmac_algorithm(alg) {
        Some(parsed) if allowed.contains(&parsed) => Ok(parsed),
        _ => Err(AuthError::algorithm_not_allowed(format!(
            "Algorithm '{alg}' is not in the accepted list"
        ))),
    }
}

/// Parses configured algorithm names into an allow-list.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the list is empty or names an
/// algorithm outside [`SUPPORTED_ALGORITHMS`].
pub fn parse_allowed_algorithms(names: &[String]) -> Result<Vec<Algorithm>, ConfigError> {
    if names.is_empty() {
        return Err(ConfigError::Invalid {
            field: "allowed_algorithms",
            reason: "at least one algorithm is required".to_owned(),
        });
    }

    names
        .iter()
        .map(|name| {
            hmac_algorithm(name).ok_or_else(|| ConfigError::Invalid {
                field: "allowed_algorithms",
                reason: format!("'{name}' is not a supported algorithm"),
            })
        })
        .collect()
}
