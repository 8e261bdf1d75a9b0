//! Per-key circuit breakers for outbound exchange calls.
//!
//! Typical keys are `exchange-place-order-{exchange}` and
//! `exchange-ticker-{exchange}`. State is process-local: replicas may hold
//! divergent breaker states and that is acceptable.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Breaker tuning, adjustable at construction.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Sliding window over which failures are counted.
    pub window: Duration,
    /// Failures within the window that trip the breaker.
    pub failure_threshold: u32,
    /// Optional failure-rate trip: trips when at least `min_calls` were made
    /// in the window and this fraction of them failed.
    pub failure_rate: Option<f64>,
    /// Calls required before the rate condition is considered.
    pub min_calls: u32,
    /// How long the breaker stays open before probing.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            failure_threshold: 10,
            failure_rate: None,
            min_calls: 10,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Normal operation; calls are allowed.
    Closed,
    /// Tripped; calls fail fast until the cooldown expires.
    Open { until: Instant },
    /// Cooled down; the next outcome decides Closed or back to Open.
    HalfOpen,
}

struct Inner {
    state: State,
    /// (instant, failed) outcomes within the sliding window.
    outcomes: VecDeque<(Instant, bool)>,
}

/// A single keyed circuit breaker.
pub struct CircuitBreaker {
    key: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(key: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                outcomes: VecDeque::new(),
            }),
        }
    }

    /// Check admission. While open, fails fast with `circuit/open`.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed | State::HalfOpen => Ok(()),
            State::Open { until } => {
                if Instant::now() >= until {
                    debug!(key = %self.key, "Circuit breaker half-open");
                    inner.state = State::HalfOpen;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen(self.key.clone()))
                }
            }
        }
    }

    /// Record a successful call. One success in half-open closes the
    /// breaker.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::HalfOpen => {
                debug!(key = %self.key, "Circuit breaker closed");
                inner.state = State::Closed;
                inner.outcomes.clear();
            }
            State::Closed => {
                let now = Instant::now();
                inner.outcomes.push_back((now, false));
                self.prune(&mut inner, now);
            }
            State::Open { .. } => {}
        }
    }

    /// Record a failed call. The threshold-th failure within the window
    /// opens the breaker; any failure in half-open reopens it.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            State::HalfOpen => self.open(&mut inner, now),
            State::Closed => {
                inner.outcomes.push_back((now, true));
                self.prune(&mut inner, now);
                if self.tripped(&inner) {
                    self.open(&mut inner, now);
                }
            }
            State::Open { .. } => {}
        }
    }

    /// Run a call through the breaker.
    ///
    /// Only errors that indicate dependency ill-health (transient,
    /// throttled, unclassified) accumulate as breaker failures; business
    /// rejections pass through without affecting the state machine.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.try_acquire()?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if Self::counts_as_failure(&err) {
                    self.record_failure();
                }
                Err(err)
            }
        }
    }

    /// True while the breaker rejects calls.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.inner.lock().state, State::Open { until } if Instant::now() < until)
    }

    fn counts_as_failure(err: &Error) -> bool {
        matches!(
            err,
            Error::ExchangeTransient(_)
                | Error::ExchangeThrottled(_)
                | Error::Io(_)
                | Error::Internal(_)
        )
    }

    fn open(&self, inner: &mut Inner, now: Instant) {
        warn!(key = %self.key, cooldown_secs = self.config.cooldown.as_secs(), "Circuit breaker opened");
        inner.state = State::Open {
            until: now + self.config.cooldown,
        };
        inner.outcomes.clear();
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        // The whole window fits since process start: nothing to prune yet.
        let Some(horizon) = now.checked_sub(self.config.window) else {
            return;
        };
        while let Some(&(at, _)) = inner.outcomes.front() {
            if at < horizon {
                inner.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn tripped(&self, inner: &Inner) -> bool {
        let failures = inner.outcomes.iter().filter(|(_, failed)| *failed).count() as u32;
        if failures >= self.config.failure_threshold {
            return true;
        }
        if let Some(rate) = self.config.failure_rate {
            let total = inner.outcomes.len() as u32;
            if total >= self.config.min_calls {
                return f64::from(failures) / f64::from(total) >= rate;
            }
        }
        false
    }
}

/// Process-wide registry of breakers, one per key.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Get or create the breaker for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.config.clone())))
            .clone()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
