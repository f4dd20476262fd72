//! Token bucket primitive.
//!
//! Continuous-drip refill: tokens accrue fractionally with elapsed time
//! rather than in whole-window steps, so a 60/min bucket releases one token
//! every second instead of sixty at the top of the minute.

use std::time::{Duration, Instant};

use crate::config::RateLimitSpec;

/// A single refillable bucket.
#[derive(Debug)]
pub struct TokenBucket {
    /// Current tokens, fractional between refills
    tokens: f64,
    /// Maximum tokens
    capacity: f64,
    /// Refill rate in tokens per second
    refill_per_sec: f64,
    /// Last refill time
    last_refill: Instant,
    /// Last acquire attempt, drives idle eviction
    last_access: Instant,
}

impl TokenBucket {
    /// Create a full bucket from a per-minute spec.
    pub fn new(spec: RateLimitSpec) -> Self {
        let now = Instant::now();
        Self {
            tokens: spec.capacity,
            capacity: spec.capacity,
            refill_per_sec: spec.refill_per_minute / 60.0,
            last_refill: now,
            last_access: now,
        }
    }

    /// Try to consume one token.
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Try to consume one token, with the clock supplied by the caller.
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.last_access = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available.
    pub fn remaining(&mut self) -> u64 {
        self.refill(Instant::now());
        self.tokens as u64
    }

    /// Time since the bucket was last asked for a token.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access)
    }

    /// Time until one token is available.
    pub fn time_until_available(&self) -> Duration {
        if self.tokens >= 1.0 || self.refill_per_sec <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(capacity: f64, per_minute: f64) -> RateLimitSpec {
        RateLimitSpec {
            capacity,
            refill_per_minute: per_minute,
        }
    }

    #[test]
    fn test_starts_full_and_drains() {
        let mut bucket = TokenBucket::new(spec(2.0, 60.0));
        let now = Instant::now();

        assert!(bucket.try_acquire_at(now));
        assert!(bucket.try_acquire_at(now));
        assert!(!bucket.try_acquire_at(now));
    }

    #[test]
    fn test_continuous_refill() {
        let mut bucket = TokenBucket::new(spec(2.0, 60.0));
        let start = Instant::now();

        assert!(bucket.try_acquire_at(start));
        assert!(bucket.try_acquire_at(start));
        assert!(!bucket.try_acquire_at(start));

        // 60/min refills one token per second; half a second is not enough.
        assert!(!bucket.try_acquire_at(start + Duration::from_millis(500)));
        assert!(bucket.try_acquire_at(start + Duration::from_millis(1600)));
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let mut bucket = TokenBucket::new(spec(3.0, 60.0));
        let start = Instant::now();

        assert!(bucket.try_acquire_at(start));

        // A long idle period must not overfill.
        let later = start + Duration::from_secs(3600);
        assert!(bucket.try_acquire_at(later));
        assert!(bucket.try_acquire_at(later));
        assert!(bucket.try_acquire_at(later));
        assert!(!bucket.try_acquire_at(later));
    }

    #[test]
    fn test_remaining_floors_fractional_tokens() {
        let mut bucket = TokenBucket::new(spec(5.0, 60.0));
        let start = Instant::now();

        assert!(bucket.try_acquire_at(start));
        assert_eq!(bucket.remaining(), 4);
    }

    #[test]
    fn test_time_until_available() {
        let mut bucket = TokenBucket::new(spec(1.0, 60.0));
        let start = Instant::now();

        assert_eq!(bucket.time_until_available(), Duration::ZERO);
        assert!(bucket.try_acquire_at(start));

        let wait = bucket.time_until_available();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(1));
    }

    #[test]
    fn test_idle_tracking() {
        let mut bucket = TokenBucket::new(spec(1.0, 60.0));
        let start = Instant::now();

        bucket.try_acquire_at(start);
        assert_eq!(bucket.idle_for(start + Duration::from_secs(90)), Duration::from_secs(90));
    }
}
