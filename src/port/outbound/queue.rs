//! Job queue facade port.
//!
//! Durable enqueue keyed by a deduplication identifier, plus a consumer
//! surface with explicit acknowledge/fail and a classification-aware retry
//! schedule. Delivery is at-least-once; duplicate processing is prevented
//! upstream by job-table uniqueness and downstream by deterministic client
//! order identifiers.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Error;

/// Which worker pool consumes a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKind {
    Execute,
    Reconcile,
}

impl WorkKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Reconcile => "reconcile",
        }
    }
}

/// Payload referencing the durable work to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkPayload {
    /// Execute the alert committed as this job.
    Execute { job_id: String, alert_id: String },
    /// Run one reconciliation cycle for this account.
    Reconcile { account_id: String },
}

impl WorkPayload {
    #[must_use]
    pub const fn kind(&self) -> WorkKind {
        match self {
            Self::Execute { .. } => WorkKind::Execute,
            Self::Reconcile { .. } => WorkKind::Reconcile,
        }
    }

    /// Deduplication key: only one message per key may be queued or
    /// in-flight at a time.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        match self {
            Self::Execute { alert_id, .. } => format!("execute:{alert_id}"),
            Self::Reconcile { account_id } => format!("reconcile:{account_id}"),
        }
    }
}

/// A message handed to an enqueue call.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub payload: WorkPayload,
    /// Lower runs earlier among ready messages.
    pub priority: u8,
    /// Initial delivery delay.
    pub delay: Duration,
}

impl WorkItem {
    #[must_use]
    pub fn new(payload: WorkPayload) -> Self {
        Self {
            payload,
            priority: 0,
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// One at-least-once delivery of a queued message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub payload: WorkPayload,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Exponential backoff schedule with jitter, capped.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    /// Jitter ratio applied symmetrically, e.g. 0.2 for ±20%.
    pub jitter: f64,
    pub max_delay: Duration,
}

impl RetrySchedule {
    /// Schedule for execution jobs: base 2s, factor 2, ±20% jitter,
    /// capped at 60s, 5 attempts.
    #[must_use]
    pub fn execution() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            factor: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Schedule for reconciliation jobs: 2 attempts under the same backoff.
    #[must_use]
    pub fn reconciliation() -> Self {
        Self {
            max_attempts: 2,
            ..Self::execution()
        }
    }

    /// True when the error class and attempt count admit another try.
    #[must_use]
    pub fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Backoff delay before the given 1-based attempt is redelivered.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, jitter_unit: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.base_delay.as_millis() as f64 * self.factor.powi(exponent as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        // jitter_unit in [0, 1): spread the delay across ±jitter.
        let spread = 1.0 - self.jitter + (2.0 * self.jitter * jitter_unit);
        Duration::from_millis((capped * spread).max(0.0) as u64)
    }
}

/// Durable FIFO-per-priority queue with retries, backoff, and dedup keys.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (`Send + Sync`); one facade instance
/// is shared by the gateway, the executor, and the reconciler.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a message. Returns `false` when a message with the same
    /// dedup key is already queued or in flight.
    async fn enqueue(&self, item: WorkItem) -> crate::error::Result<bool>;

    /// Receive the next delivery for a worker pool. Returns `None` when the
    /// queue has shut down.
    async fn next(&self, kind: WorkKind) -> Option<Delivery>;

    /// Acknowledge successful processing; releases the dedup key.
    async fn ack(&self, delivery: &Delivery);

    /// Report failed processing. The facade reschedules per the retry
    /// schedule when the error is retryable and attempts remain; otherwise
    /// the message is dropped and the dedup key released.
    async fn nack(&self, delivery: &Delivery, error: &Error);

    /// Messages currently queued (not in flight) for a pool.
    fn depth(&self, kind: WorkKind) -> usize;
}
