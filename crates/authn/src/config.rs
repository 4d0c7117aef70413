//! Configuration for the session-security core.
//!
//! [`AuthConfig`] holds every tunable of the validator: accepted algorithms,
//! cache lifetime, store deadlines, audit retention and the activity
//! thresholds. It deserializes from TOML with human-readable durations
//! (`"30s"`, `"15m"`). The signing secret is deliberately not part of it;
//! pass it to [`AuthValidator`](crate::AuthValidator) separately.
//!
//! # Example
//!
//! ```
//! use medianest_authn::AuthConfig;
//!
//! let config = AuthConfig::from_toml_str(r#"
//!     cache_ttl = "45s"
//!     store_timeout = "25ms"
//!
//!     [activity]
//!     max_attempts = 20
//! "#).unwrap();
//!
//! assert_eq!(config.cache_ttl.as_secs(), 45);
//! assert_eq!(config.activity.max_attempts, 20);
//! assert_eq!(config.activity.max_distinct_ips, 5);
//! ```

use std::time::Duration;

use jsonwebtoken::Algorithm;
use medianest_storage::{ConfigError, ReadRetryPolicy};
use serde::{Deserialize, Serialize};

use crate::validation::{DEFAULT_ALLOWED_ALGORITHMS, parse_allowed_algorithms};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);
const DEFAULT_AUDIT_MAX_ENTRIES: usize = 1000;
const DEFAULT_FALLBACK_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// JWT algorithms accepted in token headers. HMAC family only.
    #[serde(default = "default_allowed_algorithms")]
    #[builder(default = default_allowed_algorithms())]
    pub allowed_algorithms: Vec<String>,

    /// Leeway applied to `exp`.
    #[serde(with = "humantime_serde", default)]
    #[builder(default)]
    pub clock_skew: Duration,

    /// Lifetime of cached user snapshots.
    #[serde(with = "humantime_serde", default = "default_cache_ttl")]
    #[builder(default = DEFAULT_CACHE_TTL)]
    pub cache_ttl: Duration,

    /// Deadline for each store operation.
    #[serde(with = "humantime_serde", default = "default_store_timeout")]
    #[builder(default = DEFAULT_STORE_TIMEOUT)]
    pub store_timeout: Duration,

    /// Retry policy for store reads on the authentication path.
    #[serde(default)]
    #[builder(default)]
    pub read_retry: ReadRetryConfig,

    /// Maximum audit events retained per user.
    #[serde(default = "default_audit_max_entries")]
    #[builder(default = DEFAULT_AUDIT_MAX_ENTRIES)]
    pub audit_max_entries: usize,

    /// Longest lifetime an accepted token may have.
    ///
    /// Caps blacklist entries and session generation counters, and is the
    /// blacklist lifetime used when a session record carries no expiry.
    #[serde(with = "humantime_serde", default = "default_fallback_token_lifetime")]
    #[builder(default = DEFAULT_FALLBACK_TOKEN_LIFETIME)]
    pub fallback_token_lifetime: Duration,

    /// Suspicious-activity thresholds.
    #[serde(default)]
    #[builder(default)]
    pub activity: ActivityConfig,
}

fn default_allowed_algorithms() -> Vec<String> {
    DEFAULT_ALLOWED_ALGORITHMS.iter().map(|s| (*s).to_owned()).collect()
}

fn default_cache_ttl() -> Duration {
    DEFAULT_CACHE_TTL
}

fn default_store_timeout() -> Duration {
    DEFAULT_STORE_TIMEOUT
}

fn default_audit_max_entries() -> usize {
    DEFAULT_AUDIT_MAX_ENTRIES
}

fn default_fallback_token_lifetime() -> Duration {
    DEFAULT_FALLBACK_TOKEN_LIFETIME
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AuthConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for syntax errors or unknown fields,
    /// and any error reported by [`validate`](Self::validate).
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)
            .map_err(|e| ConfigError::Invalid { field: "config", reason: e.message().to_owned() })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first offending field as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_allowed_algorithms(&self.allowed_algorithms)?;
        if self.cache_ttl < Duration::from_secs(1) {
            return Err(ConfigError::BelowMinimum {
                field: "cache_ttl",
                value: format!("{}ms", self.cache_ttl.as_millis()),
                min: "1s".to_owned(),
            });
        }
        if self.store_timeout < Duration::from_millis(1) {
            return Err(ConfigError::BelowMinimum {
                field: "store_timeout",
                value: format!("{}us", self.store_timeout.as_micros()),
                min: "1ms".to_owned(),
            });
        }
        if self.audit_max_entries == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "audit_max_entries",
                value: "0".to_owned(),
                min: "1".to_owned(),
            });
        }
        if self.fallback_token_lifetime < Duration::from_secs(1) {
            return Err(ConfigError::BelowMinimum {
                field: "fallback_token_lifetime",
                value: format!("{}ms", self.fallback_token_lifetime.as_millis()),
                min: "1s".to_owned(),
            });
        }
        self.activity.validate()
    }

    /// The allow-list as parsed algorithms.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unsupported names.
    pub fn algorithms(&self) -> Result<Vec<Algorithm>, ConfigError> {
        parse_allowed_algorithms(&self.allowed_algorithms)
    }
}

/// Serializable read retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct ReadRetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    #[builder(default = default_max_retries())]
    pub max_retries: u32,

    /// Fixed delay between attempts.
    #[serde(with = "humantime_serde", default = "default_backoff")]
    #[builder(default = default_backoff())]
    pub backoff: Duration,
}

fn default_max_retries() -> u32 {
    1
}

fn default_backoff() -> Duration {
    Duration::from_millis(10)
}

impl Default for ReadRetryConfig {
    fn default() -> Self {
        Self { max_retries: default_max_retries(), backoff: default_backoff() }
    }
}

impl From<ReadRetryConfig> for ReadRetryPolicy {
    fn from(config: ReadRetryConfig) -> Self {
        ReadRetryPolicy { max_retries: config.max_retries, backoff: config.backoff }
    }
}

/// Thresholds for [`SuspiciousActivityDetector`](crate::SuspiciousActivityDetector).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct ActivityConfig {
    /// Sliding window over which attempts are counted.
    #[serde(with = "humantime_serde", default = "default_window")]
    #[builder(default = default_window())]
    pub window: Duration,

    /// In-window attempts above this count are rapid.
    #[serde(default = "default_max_attempts")]
    #[builder(default = default_max_attempts())]
    pub max_attempts: usize,

    /// Distinct in-window IPs above this count are suspicious.
    #[serde(default = "default_max_distinct_ips")]
    #[builder(default = default_max_distinct_ips())]
    pub max_distinct_ips: usize,

    /// Score contribution of rapid attempts.
    #[serde(default = "default_rapid_weight")]
    #[builder(default = default_rapid_weight())]
    pub rapid_attempts_weight: u32,

    /// Score contribution of multiple IPs.
    #[serde(default = "default_multi_ip_weight")]
    #[builder(default = default_multi_ip_weight())]
    pub multiple_ips_weight: u32,

    /// Scores strictly above this are suspicious.
    #[serde(default = "default_threshold")]
    #[builder(default = default_threshold())]
    pub suspicious_threshold: u32,

    /// Hard cap on stored entries per user.
    #[serde(default = "default_max_tracked")]
    #[builder(default = default_max_tracked())]
    pub max_tracked_entries: usize,
}

fn default_window() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_max_attempts() -> usize {
    10
}

fn default_max_distinct_ips() -> usize {
    5
}

fn default_rapid_weight() -> u32 {
    50
}

fn default_multi_ip_weight() -> u32 {
    30
}

fn default_threshold() -> u32 {
    40
}

fn default_max_tracked() -> usize {
    256
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ActivityConfig {
    /// Checks field ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if the window is under one second
    /// or the entry cap cannot hold `max_attempts + 1` entries (the rapid
    /// signal could then never fire).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window < Duration::from_secs(1) {
            return Err(ConfigError::BelowMinimum {
                field: "activity.window",
                value: format!("{}ms", self.window.as_millis()),
                min: "1s".to_owned(),
            });
        }
        let min_tracked = self.max_attempts.max(self.max_distinct_ips).saturating_add(1);
        if self.max_tracked_entries < min_tracked {
            return Err(ConfigError::BelowMinimum {
                field: "activity.max_tracked_entries",
                value: self.max_tracked_entries.to_string(),
                min: min_tracked.to_string(),
            });
        }
        Ok(())
    }
}
