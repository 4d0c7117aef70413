//! Bounded retry for idempotent store reads.
//!
//! Writes are never retried here: list pushes and increments are not
//! idempotent, and a duplicated write is worse than a surfaced error.

use std::{future::Future, time::Duration};

use tracing::debug;

use crate::error::StorageResult;

/// Retry policy applied to read operations on the authentication path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for ReadRetryPolicy {
    fn default() -> Self {
        Self { max_retries: 1, backoff: Duration::from_millis(10) }
    }
}

impl ReadRetryPolicy {
    /// A policy that performs exactly one attempt.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { max_retries: 0, backoff: Duration::ZERO }
    }
}

/// Runs `op` and retries it on transient errors according to `policy`.
///
/// Non-transient errors (and the final transient one) are returned as-is.
pub async fn with_read_retry<T, F, Fut>(policy: ReadRetryPolicy, op_name: &'static str, mut op: F) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                debug!(op = op_name, attempt, error = %err, "retrying transient store read");
                tokio::time::sleep(policy.backoff).await;
            },
            other => return other,
        }
    }
}
