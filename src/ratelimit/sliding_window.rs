//! Exact sliding-log rate limit counter.
//!
//! Unlike a fixed-bucket approximation, every admitted request keeps its
//! timestamp until it leaves the window, so bursts straddling a window
//! boundary are counted exactly.

use std::collections::VecDeque;

/// A sliding window over the timestamps of admitted requests.
///
/// Invariant: after any eviction all timestamps are `>= now - window_secs`,
/// and `len() <= max_requests` whenever requests are only recorded through
/// [`SlidingWindowCounter::is_allowed`] or after a passing
/// [`SlidingWindowCounter::would_allow`].
#[derive(Debug, Clone)]
pub struct SlidingWindowCounter {
    window_secs: u64,
    max_requests: u64,
    timestamps: VecDeque<f64>,
}

impl SlidingWindowCounter {
    pub fn new(window_secs: u64, max_requests: u64) -> Self {
        Self {
            window_secs,
            max_requests,
            timestamps: VecDeque::new(),
        }
    }

    /// Drop timestamps that have left the window. The cutoff is inclusive:
    /// a timestamp leaves at exactly `timestamp + window_secs`, the instant
    /// `retry_after` reaches 0, so a zero retry always means a free slot.
    ///
    /// Only the front is inspected. After a backward clock jump the newest
    /// entries may lie "in the future"; they are kept rather than reordered.
    pub fn evict(&mut self, now: f64) {
        let cutoff = now - self.window_secs as f64;
        while let Some(&oldest) = self.timestamps.front() {
            if oldest <= cutoff {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Evict, then record `now` if a slot is free.
    pub fn is_allowed(&mut self, now: f64) -> bool {
        if self.would_allow(now) {
            self.record(now);
            true
        } else {
            false
        }
    }

    /// Evict, then report whether a slot is free without recording.
    pub fn would_allow(&mut self, now: f64) -> bool {
        self.evict(now);
        (self.timestamps.len() as u64) < self.max_requests
    }

    /// Record a request at `now`.
    ///
    /// Timestamps stay ordered: a `now` earlier than the newest entry (clock
    /// went backwards) is stored as that newest entry instead.
    pub fn record(&mut self, now: f64) {
        let at = match self.timestamps.back() {
            Some(&newest) if newest > now => newest,
            _ => now,
        };
        self.timestamps.push_back(at);
    }

    /// Seconds until the oldest recorded request leaves the window.
    pub fn retry_after(&self, now: f64) -> f64 {
        match self.timestamps.front() {
            Some(&oldest) => (oldest + self.window_secs as f64 - now).max(0.0),
            None => 0.0,
        }
    }

    /// Free slots, as of the last eviction.
    pub fn remaining(&self) -> u64 {
        self.max_requests.saturating_sub(self.timestamps.len() as u64)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }
}
