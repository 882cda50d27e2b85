//! Time sources for rate limiting.
//!
//! Every algorithm in this crate takes `now` explicitly as seconds (`f64`).
//! The engine reads its clock once per request so all dimensions of a single
//! decision observe the same instant.

use parking_lot::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of the current time, in seconds.
pub trait Clock: Send + Sync {
    /// Current time in seconds.
    fn now(&self) -> f64;
}

/// Wall-clock time in seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64()
    }
}

/// A clock that only moves when told to.
///
/// Useful for tests and for embedders that drive time themselves.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    /// Create a clock starting at `start` seconds.
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward (or backward, for a negative value).
    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }

    /// Jump to an absolute time.
    pub fn set(&self, secs: f64) {
        *self.now.lock() = secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_epoch() {
        assert!(SystemClock.now() > 1_600_000_000.0);
    }

    #[test]
    fn test_manual_clock_moves_only_on_request() {
        let clock = ManualClock::new(100.0);
        assert_eq!(clock.now(), 100.0);

        clock.advance(2.5);
        assert_eq!(clock.now(), 102.5);

        clock.set(50.0);
        assert_eq!(clock.now(), 50.0);
    }
}
