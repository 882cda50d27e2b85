//! Continuously refilling token bucket.
//!
//! Refill is lazy: tokens are topped up from the elapsed time whenever the
//! bucket is touched, so no timer is needed per key.

/// A token bucket with a continuous (floating-point) token count.
///
/// Invariant: `0.0 <= tokens <= capacity`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u64,
    tokens: f64,
    refill_rate_per_sec: f64,
    last_refill: f64,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u64, refill_rate_per_sec: f64, now: f64) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate_per_sec,
            last_refill: now,
        }
    }

    /// A bucket that holds `per_minute` tokens and refills them over a minute.
    pub fn per_minute(per_minute: u64, now: f64) -> Self {
        Self::new(per_minute, per_minute as f64 / 60.0, now)
    }

    /// Top up tokens for the time elapsed since the last refill.
    ///
    /// A clock that moved backwards refills nothing; `last_refill` still
    /// follows `now` so the next forward step is measured from here.
    pub fn refill(&mut self, now: f64) {
        let elapsed = (now - self.last_refill).max(0.0);
        self.tokens = (self.tokens + elapsed * self.refill_rate_per_sec).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Take `n` tokens if available. Tokens are unchanged on denial.
    pub fn consume(&mut self, n: u64, now: f64) -> bool {
        self.refill(now);
        if self.has(n) {
            self.tokens -= n as f64;
            true
        } else {
            false
        }
    }

    /// Refill, then report whether `n` tokens could be taken without taking them.
    pub fn can_consume(&mut self, n: u64, now: f64) -> bool {
        self.refill(now);
        self.has(n)
    }

    fn has(&self, n: u64) -> bool {
        self.tokens >= n as f64
    }

    /// Whole seconds until one token is available (at least 1 when empty).
    pub fn retry_after(&self) -> u64 {
        let missing = 1.0 - self.tokens;
        if missing <= 0.0 {
            return 0;
        }
        if self.refill_rate_per_sec <= 0.0 {
            return u64::MAX;
        }
        ((missing / self.refill_rate_per_sec).ceil() as u64).max(1)
    }

    /// Whole tokens currently available.
    pub fn remaining(&self) -> u64 {
        self.tokens.floor() as u64
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn last_refill(&self) -> f64 {
        self.last_refill
    }
}
