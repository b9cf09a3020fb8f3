//! Centralized retry policy shared by the platform HTTP client and the
//! long-polling runner (Design Notes — retry helper): attempt count, base
//! delay, max delay, ±10% jitter, and a `retryable(cause)` classifier.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use gateway_core::{RETRY_BASE_DELAY_MS, RETRY_JITTER_FRACTION, RETRY_MAX_ATTEMPTS, RETRY_MAX_DELAY_MS};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_delay_ms: RETRY_BASE_DELAY_MS,
            max_delay_ms: RETRY_MAX_DELAY_MS,
            jitter_fraction: RETRY_JITTER_FRACTION,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff starting at `base_delay_ms`, doubling each
    /// attempt, capped at `max_delay_ms`, with ±`jitter_fraction` jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(20));
        let capped = exp.min(self.max_delay_ms) as f64;
        let jitter = rand::thread_rng().gen_range(-self.jitter_fraction..=self.jitter_fraction);
        let jittered = (capped * (1.0 + jitter)).max(0.0);
        Duration::from_millis(jittered as u64)
    }

    /// Run `op` with retry on [`RetryDecision::Retry`] outcomes, up to
    /// `max_attempts` total tries.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, RetryOutcome<E>>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(RetryOutcome::Permanent(e)) => return Err(e),
                Err(RetryOutcome::Transient(e)) => {
                    if attempt >= self.max_attempts {
                        return Err(e);
                    }
                    let delay = self.delay_for_attempt(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying after transient error");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Classification of a single attempt's outcome for the retry loop.
pub enum RetryOutcome<E> {
    Transient(E),
    Permanent(E),
}
