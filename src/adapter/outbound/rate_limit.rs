//! Sliding-window rate limiter.
//!
//! Two windows per key (per-minute, per-hour); the more restrictive
//! decision wins and a limited request never consumes capacity. Counters
//! live in process memory here; a shared cache substrate would sit behind
//! the same port with expiry matched to the window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::domain::webhook::RatePolicy;
use crate::port::outbound::rate_limit::{RateDecision, RateLimiter};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

pub struct SlidingWindowRateLimiter {
    windows: DashMap<String, Mutex<VecDeque<Instant>>>,
}

impl SlidingWindowRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Check at an explicit instant. Exposed so window-boundary behavior is
    /// testable without sleeping.
    pub fn check_at(&self, key: &str, policy: &RatePolicy, now: Instant) -> RateDecision {
        let entry = self.windows.entry(key.to_string()).or_default();
        let mut hits = entry.lock();

        // Drop hits older than the longest window.
        while let Some(&front) = hits.front() {
            if now.duration_since(front) >= HOUR {
                hits.pop_front();
            } else {
                break;
            }
        }

        let minute_hits = hits
            .iter()
            .filter(|&&at| now.duration_since(at) < MINUTE)
            .count() as u32;
        let hour_hits = hits.len() as u32;

        let minute_exhausted = minute_hits >= policy.max_per_minute;
        let hour_exhausted = hour_hits >= policy.max_per_hour;

        if minute_exhausted || hour_exhausted {
            // Retry once the oldest hit in the exhausted window ages out;
            // when both windows are exhausted the longer wait wins.
            let minute_wait = minute_exhausted
                .then(|| {
                    hits.iter()
                        .find(|&&at| now.duration_since(at) < MINUTE)
                        .map(|&at| MINUTE.saturating_sub(now.duration_since(at)))
                        .unwrap_or(MINUTE)
                })
                .unwrap_or(Duration::ZERO);
            let hour_wait = hour_exhausted
                .then(|| {
                    hits.front()
                        .map(|&at| HOUR.saturating_sub(now.duration_since(at)))
                        .unwrap_or(HOUR)
                })
                .unwrap_or(Duration::ZERO);
            let wait = minute_wait.max(hour_wait);

            return RateDecision::Limited {
                retry_after_secs: wait.as_secs().max(1),
            };
        }

        hits.push_back(now);
        RateDecision::Allowed
    }
}

impl Default for SlidingWindowRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter for SlidingWindowRateLimiter {
    fn check(&self, key: &str, policy: &RatePolicy) -> RateDecision {
        self.check_at(key, policy, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(per_minute: u32, per_hour: u32) -> RatePolicy {
        RatePolicy {
            max_per_minute: per_minute,
            max_per_hour: per_hour,
        }
    }

    #[test]
    fn allows_up_to_the_minute_cap() {
        let limiter = SlidingWindowRateLimiter::new();
        let policy = policy(3, 100);
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at("wh-1", &policy, now).is_allowed());
        }
        assert!(!limiter.check_at("wh-1", &policy, now).is_allowed());
    }

    #[test]
    fn window_boundary_resets_exactly() {
        let limiter = SlidingWindowRateLimiter::new();
        let policy = policy(2, 100);
        let start = Instant::now();

        // Two hits at t and t+window-1ms both count in one window.
        assert!(limiter.check_at("wh-1", &policy, start).is_allowed());
        assert!(limiter
            .check_at("wh-1", &policy, start + MINUTE - Duration::from_millis(1))
            .is_allowed());
        assert!(!limiter
            .check_at("wh-1", &policy, start + MINUTE - Duration::from_millis(1))
            .is_allowed());

        // Just past the window, the first hit has aged out.
        assert!(limiter
            .check_at("wh-1", &policy, start + MINUTE + Duration::from_millis(1))
            .is_allowed());
    }

    #[test]
    fn hour_window_binds_when_more_restrictive() {
        let limiter = SlidingWindowRateLimiter::new();
        let policy = policy(100, 2);
        let now = Instant::now();

        assert!(limiter.check_at("wh-1", &policy, now).is_allowed());
        assert!(limiter.check_at("wh-1", &policy, now).is_allowed());

        let decision = limiter.check_at("wh-1", &policy, now + Duration::from_secs(120));
        match decision {
            RateDecision::Limited { retry_after_secs } => {
                // The hour window still holds both hits.
                assert!(retry_after_secs > 60);
            }
            RateDecision::Allowed => panic!("hour cap should bind"),
        }
    }

    #[test]
    fn limited_requests_do_not_consume_capacity() {
        let limiter = SlidingWindowRateLimiter::new();
        let policy = policy(1, 100);
        let start = Instant::now();

        assert!(limiter.check_at("wh-1", &policy, start).is_allowed());
        // Hammer the limiter while exhausted.
        for _ in 0..10 {
            assert!(!limiter.check_at("wh-1", &policy, start).is_allowed());
        }
        // The single stored hit still ages out on schedule.
        assert!(limiter
            .check_at("wh-1", &policy, start + MINUTE + Duration::from_millis(1))
            .is_allowed());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = SlidingWindowRateLimiter::new();
        let policy = policy(1, 10);
        let now = Instant::now();

        assert!(limiter.check_at("wh-1", &policy, now).is_allowed());
        assert!(limiter.check_at("wh-2", &policy, now).is_allowed());
        assert!(!limiter.check_at("wh-1", &policy, now).is_allowed());
    }
}
