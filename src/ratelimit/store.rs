//! Process-wide container for per-client rate limit state.
//!
//! All maps are sharded (`DashMap`), so different clients do not contend on
//! a global lock. Each client's quota state sits behind its own mutex, which
//! makes check-and-mutate atomic per key.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::clock::Clock;
use super::identity::ClientKey;
use super::quarantine::{BlockEntry, RequestHistory, RequestRecord};
use super::rules::RateLimitRule;
use super::sliding_window::SlidingWindowCounter;
use super::token_bucket::TokenBucket;

/// Seconds in the hour window.
const HOUR_SECS: u64 = 3600;

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tracking limit of {limit} clients reached")]
    CapacityExceeded { limit: usize },
}

/// Retention and sizing settings for the store.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Quota state untouched for this long is swept
    pub bucket_idle_secs: u64,
    /// Request records older than this are swept
    pub history_retention_secs: u64,
    /// Maximum records kept per client
    pub history_capacity: usize,
    /// Soft bound on tracked quota entries and on clients with history
    pub max_tracked_clients: Option<usize>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            bucket_idle_secs: 3600,
            history_retention_secs: 86_400,
            history_capacity: 1000,
            max_tracked_clients: None,
        }
    }
}

/// Identifies one client's quota state within one rule scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimitsKey {
    pub client: ClientKey,
    pub scope: String,
}

impl LimitsKey {
    pub fn new(client: &ClientKey, scope: &str) -> Self {
        Self {
            client: client.clone(),
            scope: scope.to_string(),
        }
    }
}

/// The three quota dimensions of one client under one rule.
#[derive(Debug, Clone)]
pub struct ClientLimits {
    pub minute: TokenBucket,
    pub hour: SlidingWindowCounter,
    pub burst: SlidingWindowCounter,
}

impl ClientLimits {
    pub fn new(rule: &RateLimitRule, now: f64) -> Self {
        Self {
            minute: TokenBucket::per_minute(rule.requests_per_minute, now),
            hour: SlidingWindowCounter::new(HOUR_SECS, rule.requests_per_hour),
            burst: SlidingWindowCounter::new(rule.burst_window_seconds, rule.burst_limit),
        }
    }

    /// Idle when the bucket has not been touched for `idle_secs` and both
    /// windows are empty. Recreating an idle entry loses nothing.
    fn is_idle(&mut self, now: f64, idle_secs: u64) -> bool {
        if now - self.minute.last_refill() < idle_secs as f64 {
            return false;
        }
        self.hour.evict(now);
        self.burst.evict(now);
        self.hour.is_empty() && self.burst.is_empty()
    }
}

/// Shared handle to one client's quota state.
pub type SharedLimits = Arc<Mutex<ClientLimits>>;

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub limits_removed: usize,
    pub records_pruned: usize,
    pub histories_removed: usize,
    pub blocks_removed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Entry counts, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub tracked_limits: usize,
    pub tracked_histories: usize,
    pub blocked_clients: usize,
}

/// Owns all per-client state: quotas, blocks and request history.
pub struct RateLimitStore {
    settings: StoreSettings,
    limits: DashMap<LimitsKey, SharedLimits>,
    blocks: DashMap<ClientKey, BlockEntry>,
    history: DashMap<ClientKey, RequestHistory>,
}

impl RateLimitStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            settings,
            limits: DashMap::new(),
            blocks: DashMap::new(),
            history: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Get or lazily create the quota state for a client under a rule.
    ///
    /// Idempotent under races: concurrent callers for the same key receive
    /// the same handle. The handle is cloned while the shard lock is held,
    /// which is what lets [`RateLimitStore::sweep`] tell in-flight state apart.
    pub fn limits_for(
        &self,
        client: &ClientKey,
        rule: &RateLimitRule,
        now: f64,
    ) -> Result<SharedLimits, StoreError> {
        let key = LimitsKey::new(client, &rule.scope);
        if let Some(existing) = self.limits.get(&key) {
            return Ok(Arc::clone(existing.value()));
        }

        if let Some(limit) = self.settings.max_tracked_clients {
            if self.limits.len() >= limit {
                return Err(StoreError::CapacityExceeded { limit });
            }
        }

        let entry = self.limits.entry(key).or_insert_with(|| {
            debug!(
                client = %client,
                scope = %rule.scope,
                per_minute = rule.requests_per_minute,
                per_hour = rule.requests_per_hour,
                "Creating rate limit state"
            );
            Arc::new(Mutex::new(ClientLimits::new(rule, now)))
        });
        Ok(Arc::clone(entry.value()))
    }

    /// Unblock time of the client's block entry, expired or not.
    pub fn block_expiry(&self, client: &ClientKey) -> Option<f64> {
        self.blocks.get(client).map(|entry| entry.unblock_at)
    }

    /// Insert a block unless an unexpired one exists. Returns whether inserted.
    pub fn insert_block(&self, entry: BlockEntry, now: f64) -> bool {
        let mut inserted = false;
        self.blocks
            .entry(entry.client_key.clone())
            .and_modify(|existing| {
                if existing.unblock_at <= now {
                    *existing = entry.clone();
                    inserted = true;
                }
            })
            .or_insert_with(|| {
                inserted = true;
                entry.clone()
            });
        inserted
    }

    /// Remove the client's block if it has expired. Returns whether removed.
    pub fn remove_expired_block(&self, client: &ClientKey, now: f64) -> bool {
        self.blocks
            .remove_if(client, |_, entry| entry.unblock_at <= now)
            .is_some()
    }

    /// Append to the client's bounded request history.
    ///
    /// New clients are not tracked once `max_tracked_clients` histories
    /// exist; returns whether the record was kept.
    pub fn record_request(&self, client: &ClientKey, record: RequestRecord) -> bool {
        if let Some(mut history) = self.history.get_mut(client) {
            history.push(record);
            return true;
        }

        if let Some(limit) = self.settings.max_tracked_clients {
            if self.history.len() >= limit {
                debug!(client = %client, limit, "History capacity reached, record dropped");
                return false;
            }
        }

        let capacity = self.settings.history_capacity;
        self.history
            .entry(client.clone())
            .or_insert_with(|| RequestHistory::new(capacity))
            .push(record);
        true
    }

    /// Count the client's records with `status_code` at or after `since`.
    pub fn count_status_since(&self, client: &ClientKey, status_code: u16, since: f64) -> usize {
        self.history
            .get(client)
            .map(|history| history.count_status_since(status_code, since))
            .unwrap_or(0)
    }

    /// Snapshot of the client's request history, oldest first.
    pub fn history(&self, client: &ClientKey) -> Vec<RequestRecord> {
        self.history
            .get(client)
            .map(|history| history.records().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove idle quota state, stale history and expired blocks.
    ///
    /// Quota entries are only removed while the map holds the sole handle to
    /// them, checked under the shard lock. A request that fetched a handle
    /// before the sweep keeps using live state, and a key seen again after
    /// removal is recreated by [`RateLimitStore::limits_for`].
    pub fn sweep(&self, now: f64) -> SweepReport {
        let mut report = SweepReport::default();
        let idle_secs = self.settings.bucket_idle_secs;

        self.limits.retain(|_, shared| {
            if Arc::strong_count(shared) > 1 {
                return true;
            }
            let idle = match shared.try_lock() {
                Some(mut limits) => limits.is_idle(now, idle_secs),
                None => false,
            };
            if idle {
                report.limits_removed += 1;
            }
            !idle
        });

        let cutoff = now - self.settings.history_retention_secs as f64;
        self.history.retain(|_, history| {
            report.records_pruned += history.prune_before(cutoff);
            if history.is_empty() {
                report.histories_removed += 1;
                false
            } else {
                true
            }
        });

        self.blocks.retain(|_, entry| {
            let expired = entry.unblock_at <= now;
            if expired {
                report.blocks_removed += 1;
            }
            !expired
        });

        report
    }

    /// Run [`RateLimitStore::sweep`] every `every`, off the request path.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration, clock: Arc<dyn Clock>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let report = self.sweep(clock.now());
                if report.is_empty() {
                    debug!("Rate limit sweep found nothing to remove");
                } else {
                    info!(
                        limits_removed = report.limits_removed,
                        records_pruned = report.records_pruned,
                        histories_removed = report.histories_removed,
                        blocks_removed = report.blocks_removed,
                        "Rate limit sweep completed"
                    );
                }
            }
        })
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            tracked_limits: self.limits.len(),
            tracked_histories: self.history.len(),
            blocked_clients: self.blocks.len(),
        }
    }

    /// Drop all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.limits.clear();
        self.blocks.clear();
        self.history.clear();
    }
}

impl Default for RateLimitStore {
    fn default() -> Self {
        Self::new(StoreSettings::default())
    }
}
