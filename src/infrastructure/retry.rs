//! Classification-aware retry wrapper.
//!
//! The single retry helper for outbound calls. Adapter methods are never
//! internally retried; this wrapper lives at the layer that owns the
//! business meaning of the call. Retry happens only for outcomes the
//! taxonomy marks retryable: transient network, exchange throttling, 5xx.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use crate::error::Result;

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    /// Symmetric jitter ratio, e.g. 0.2 for ±20%.
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            factor: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries; useful where the caller owns scheduling.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.base_delay.as_millis() as f64 * self.factor.powi(exponent as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let unit: f64 = rand::thread_rng().gen();
        let spread = 1.0 - self.jitter + (2.0 * self.jitter * unit);
        Duration::from_millis((capped * spread).max(0.0) as u64)
    }
}

/// Run an operation, retrying per policy when the classified outcome allows.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted or immediately for a
/// non-retryable classification.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after classified failure"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
