//! Repeat-offender detection.
//!
//! Every outcome reported by the dispatch boundary lands in a bounded
//! per-client history. Each time a 429 is recorded the tracker counts the
//! client's recent 429s, and past the threshold blocks the client for the
//! rule's cooldown.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use super::identity::ClientKey;
use super::rules::RateLimitRule;
use super::store::RateLimitStore;

/// Status code that counts towards quarantine.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// One completed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: f64,
    pub endpoint: String,
    pub status_code: u16,
}

/// Bounded, oldest-first request history for one client.
#[derive(Debug, Clone)]
pub struct RequestHistory {
    capacity: usize,
    records: VecDeque<RequestRecord>,
}

impl RequestHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::new(),
        }
    }

    /// Append a record, evicting the oldest when full.
    ///
    /// A timestamp older than the newest record is clamped to it, keeping
    /// the history ordered after a backward clock jump.
    pub fn push(&mut self, mut record: RequestRecord) {
        if let Some(newest) = self.records.back() {
            record.timestamp = record.timestamp.max(newest.timestamp);
        }
        while self.records.len() >= self.capacity.max(1) {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Count records with `status_code` at or after `since`.
    pub fn count_status_since(&self, status_code: u16, since: f64) -> usize {
        self.records
            .iter()
            .rev()
            .take_while(|r| r.timestamp >= since)
            .filter(|r| r.status_code == status_code)
            .count()
    }

    /// Drop records older than `cutoff`, returning how many were dropped.
    pub fn prune_before(&mut self, cutoff: f64) -> usize {
        let before = self.records.len();
        while matches!(self.records.front(), Some(r) if r.timestamp < cutoff) {
            self.records.pop_front();
        }
        before - self.records.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &RequestRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A temporary block on a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub client_key: ClientKey,
    pub unblock_at: f64,
}

/// Detects clients that keep getting rejected and blocks them.
pub struct QuarantineTracker {
    store: Arc<RateLimitStore>,
    /// Blocks once the number of recent 429s exceeds this
    threshold: usize,
    /// How far back 429s are counted
    window_secs: u64,
}

impl QuarantineTracker {
    pub fn new(store: Arc<RateLimitStore>, threshold: usize, window_secs: u64) -> Self {
        Self {
            store,
            threshold,
            window_secs,
        }
    }

    /// The unblock time of an active block, clearing an expired one.
    pub fn active_block(&self, key: &ClientKey, now: f64) -> Option<f64> {
        let unblock_at = self.store.block_expiry(key)?;
        if now < unblock_at {
            return Some(unblock_at);
        }

        if self.store.remove_expired_block(key, now) {
            debug!(client = %key, "Quarantine expired");
        }
        None
    }

    /// Record a request outcome and quarantine the client if warranted.
    ///
    /// Returns the new block when one was issued. A client that is already
    /// blocked is not re-evaluated, so a block is never extended while active.
    pub fn record_outcome(
        &self,
        key: &ClientKey,
        rule: &RateLimitRule,
        endpoint: &str,
        status_code: u16,
        now: f64,
    ) -> Option<BlockEntry> {
        self.store.record_request(
            key,
            RequestRecord {
                timestamp: now,
                endpoint: endpoint.to_string(),
                status_code,
            },
        );

        if status_code != TOO_MANY_REQUESTS || self.active_block(key, now).is_some() {
            return None;
        }

        if !self.should_quarantine(key, now) {
            return None;
        }

        let entry = BlockEntry {
            client_key: key.clone(),
            unblock_at: now + rule.cooldown_seconds as f64,
        };
        if !self.store.insert_block(entry.clone(), now) {
            return None;
        }

        warn!(
            client = %key,
            scope = %rule.scope,
            cooldown_secs = rule.cooldown_seconds,
            "Client quarantined after repeated rate limit violations"
        );
        Some(entry)
    }

    /// Whether the client's recent 429 count exceeds the threshold.
    pub fn should_quarantine(&self, key: &ClientKey, now: f64) -> bool {
        let since = now - self.window_secs as f64;
        self.store.count_status_since(key, TOO_MANY_REQUESTS, since) > self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::store::StoreSettings;

    fn record(timestamp: f64, status_code: u16) -> RequestRecord {
        RequestRecord {
            timestamp,
            endpoint: "/api/items".to_string(),
            status_code,
        }
    }

    fn tracker() -> (Arc<RateLimitStore>, QuarantineTracker) {
        let store = Arc::new(RateLimitStore::new(StoreSettings::default()));
        let tracker = QuarantineTracker::new(Arc::clone(&store), 10, 300);
        (store, tracker)
    }

    fn rule() -> RateLimitRule {
        RateLimitRule::new(60, 1000, 10, 10, 60).with_scope("default")
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = RequestHistory::new(3);
        for i in 0..5 {
            history.push(record(f64::from(i), 200));
        }

        assert_eq!(history.len(), 3);
        let first = history.records().next().unwrap();
        assert_eq!(first.timestamp, 2.0);
    }

    #[test]
    fn test_count_status_since() {
        let mut history = RequestHistory::new(100);
        history.push(record(0.0, 429));
        history.push(record(10.0, 200));
        history.push(record(20.0, 429));
        history.push(record(30.0, 429));

        assert_eq!(history.count_status_since(429, 0.0), 3);
        assert_eq!(history.count_status_since(429, 15.0), 2);
        assert_eq!(history.count_status_since(200, 15.0), 0);
    }

    #[test]
    fn test_backward_clock_keeps_denials_countable() {
        let mut history = RequestHistory::new(100);
        history.push(record(100.0, 429));
        history.push(record(50.0, 429));
        history.push(record(101.0, 429));

        assert_eq!(history.count_status_since(429, 90.0), 3);
        let stamps: Vec<f64> = history.records().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![100.0, 100.0, 101.0]);
    }

    #[test]
    fn test_prune_before() {
        let mut history = RequestHistory::new(100);
        history.push(record(0.0, 200));
        history.push(record(5.0, 200));
        history.push(record(10.0, 200));

        assert_eq!(history.prune_before(6.0), 2);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_quarantine_after_threshold_exceeded() {
        let (_store, tracker) = tracker();
        let key = ClientKey::user("7");

        for i in 0..10 {
            assert!(tracker
                .record_outcome(&key, &rule(), "/api/items", 429, f64::from(i))
                .is_none());
        }

        let block = tracker
            .record_outcome(&key, &rule(), "/api/items", 429, 10.0)
            .expect("11th denial should quarantine");
        assert_eq!(block.unblock_at, 70.0);
        assert_eq!(tracker.active_block(&key, 10.0), Some(70.0));
    }

    #[test]
    fn test_successes_do_not_count() {
        let (_store, tracker) = tracker();
        let key = ClientKey::user("7");

        for i in 0..50 {
            tracker.record_outcome(&key, &rule(), "/api/items", 200, f64::from(i));
        }
        assert!(!tracker.should_quarantine(&key, 50.0));
    }

    #[test]
    fn test_old_denials_fall_out_of_window() {
        let (_store, tracker) = tracker();
        let key = ClientKey::user("7");

        for i in 0..10 {
            tracker.record_outcome(&key, &rule(), "/api/items", 429, f64::from(i));
        }
        // Ten minutes later the earlier denials no longer count
        assert!(tracker
            .record_outcome(&key, &rule(), "/api/items", 429, 600.0)
            .is_none());
    }

    #[test]
    fn test_block_expires_lazily() {
        let (store, tracker) = tracker();
        let key = ClientKey::user("7");

        for i in 0..11 {
            tracker.record_outcome(&key, &rule(), "/api/items", 429, f64::from(i));
        }
        assert_eq!(store.stats().blocked_clients, 1);

        assert!(tracker.active_block(&key, 69.9).is_some());
        assert!(tracker.active_block(&key, 70.0).is_none());
        assert_eq!(store.stats().blocked_clients, 0);
    }

    #[test]
    fn test_active_block_is_not_extended() {
        let (_store, tracker) = tracker();
        let key = ClientKey::user("7");

        for i in 0..11 {
            tracker.record_outcome(&key, &rule(), "/api/items", 429, f64::from(i));
        }
        for i in 11..40 {
            assert!(tracker
                .record_outcome(&key, &rule(), "/api/items", 429, f64::from(i))
                .is_none());
        }
        assert_eq!(tracker.active_block(&key, 40.0), Some(70.0));
    }
}
