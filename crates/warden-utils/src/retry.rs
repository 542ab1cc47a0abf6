use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use warden_types::{WardenError, WardenResult};

/// Exponential backoff schedule for optimistic-concurrency retries.
///
/// The delay before attempt `n` (1-based) is `base_ms × multiplier^(n-1)`,
/// capped at `max_ms`. Attempt 0 runs immediately.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_ms: 100,
            max_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Schedule used by the patcher: 150 ms base, 5 attempts.
    pub fn patcher() -> Self {
        Self {
            base_ms: 150,
            ..Self::default()
        }
    }

    /// Schedule used by the audit logger: 100 ms base, 5 attempts.
    pub fn audit() -> Self {
        Self::default()
    }

    /// Backoff before the given retry attempt (0 = first retry).
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = (self.base_ms as f64 * self.multiplier.powi(attempt as i32))
            .min(self.max_ms as f64) as u64;
        Duration::from_millis(ms)
    }
}

/// Run a read-mutate-write closure until it succeeds or the conflict budget
/// is exhausted.
///
/// The closure is responsible for performing a fresh read on every
/// invocation; this helper only owns the retry envelope. Only
/// [`WardenError::Conflict`] triggers a retry — every other error is
/// returned immediately.
pub async fn with_conflict_retry<T, F, Fut>(
    resource: &str,
    policy: &BackoffPolicy,
    mut operation: F,
) -> WardenResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = WardenResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(resource, attempt, "write succeeded after conflict retries");
                }
                return Ok(value);
            }
            Err(WardenError::Conflict { .. }) if attempt + 1 < policy.max_attempts => {
                let delay = policy.delay(attempt);
                warn!(
                    resource,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "write conflict, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if matches!(e, WardenError::Conflict { .. }) {
                    warn!(
                        resource,
                        attempts = policy.max_attempts,
                        "write conflict budget exhausted"
                    );
                }
                return Err(e);
            }
        }
    }
}
