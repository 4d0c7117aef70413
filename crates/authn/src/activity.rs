//! Sliding-window suspicious-activity detection.
//!
//! Each authentication attempt is prepended to `activity:{user_id}`. On every
//! evaluation the list is pruned to the attempts inside the window (and a hard
//! entry cap), and the remaining entries are scored. The result is a signal
//! only; nothing here rejects a request.

use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use medianest_storage::{KeyValueStore, StorageError};
use serde::{Deserialize, Serialize};

use crate::{
    audit::{AuditAction, AuditEvent, SecurityAuditLog},
    config::ActivityConfig,
    error::AuthError,
};

/// Reason reported when the in-window attempt count exceeds the limit.
pub const REASON_RAPID_ATTEMPTS: &str = "rapid_authentication_attempts";
/// Reason reported when the in-window distinct IP count exceeds the limit.
pub const REASON_MULTIPLE_IPS: &str = "multiple_ip_addresses";

#[derive(Debug, Serialize, Deserialize)]
struct Attempt {
    at_ms: i64,
    ip: String,
}

fn activity_key(user_id: &str) -> Vec<u8> {
    format!("activity:{user_id}").into_bytes()
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivitySignal {
    /// Whether the score crossed the threshold.
    pub is_suspicious: bool,
    /// Triggered reasons, in evaluation order.
    pub reasons: Vec<String>,
    /// Sum of the weights of the triggered reasons.
    pub risk_score: u32,
}

/// Per-user attempt tracker.
#[derive(Clone)]
pub struct SuspiciousActivityDetector {
    store: Arc<dyn KeyValueStore>,
    audit: SecurityAuditLog,
    config: ActivityConfig,
}

impl SuspiciousActivityDetector {
    /// Creates a detector with the given thresholds.
    pub fn new(store: Arc<dyn KeyValueStore>, audit: SecurityAuditLog, config: ActivityConfig) -> Self {
        Self { store, audit, config }
    }

    /// The thresholds in use.
    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }

    /// Records an attempt by `user_id` from `ip` and scores the window.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CacheBackendUnavailable`] if the record cannot be
    /// read or written.
    #[tracing::instrument(skip(self))]
    pub async fn record_and_evaluate(&self, user_id: &str, ip: &str) -> Result<ActivitySignal, AuthError> {
        let key = activity_key(user_id);
        let now_ms = Utc::now().timestamp_millis();
        let attempt = serde_json::to_vec(&Attempt { at_ms: now_ms, ip: ip.to_owned() })
            .map_err(|e| StorageError::serialization_with_source("failed to encode activity entry", e))?;
        self.store.list_push(&key, attempt).await?;

        let cap = self.config.max_tracked_entries;
        let raw = self.store.list_range(&key, 0, cap as isize - 1).await?;

        let window_ms = i64::try_from(self.config.window.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_ms.saturating_sub(window_ms);
        // Newest first, so the in-window entries form a prefix.
        let in_window: Vec<Attempt> = raw
            .iter()
            .map_while(|bytes| serde_json::from_slice::<Attempt>(bytes).ok())
            .take_while(|a| a.at_ms > cutoff)
            .collect();

        if in_window.len() < raw.len() || raw.len() == cap {
            self.store.list_trim(&key, 0, in_window.len() as isize - 1).await?;
        }
        self.store.expire(&key, self.config.window).await?;

        let signal = self.score(&in_window);
        if signal.is_suspicious {
            tracing::warn!(
                user_id,
                ip,
                risk_score = signal.risk_score,
                reasons = ?signal.reasons,
                "suspicious authentication activity"
            );
            let event = AuditEvent::builder()
                .user_id(user_id)
                .action(AuditAction::SuspiciousActivity)
                .reason(signal.reasons.join(","))
                .ip_address(ip)
                .build();
            self.audit.append_best_effort(&event).await;
        }
        Ok(signal)
    }

    fn score(&self, attempts: &[Attempt]) -> ActivitySignal {
        let mut signal = ActivitySignal::default();

        if attempts.len() > self.config.max_attempts {
            signal.reasons.push(REASON_RAPID_ATTEMPTS.to_owned());
            signal.risk_score = signal.risk_score.saturating_add(self.config.rapid_attempts_weight);
        }

        let distinct_ips: HashSet<&str> = attempts.iter().map(|a| a.ip.as_str()).collect();
        if distinct_ips.len() > self.config.max_distinct_ips {
            signal.reasons.push(REASON_MULTIPLE_IPS.to_owned());
            signal.risk_score = signal.risk_score.saturating_add(self.config.multiple_ips_weight);
        }

        signal.is_suspicious = signal.risk_score > self.config.suspicious_threshold;
        signal
    }
}
