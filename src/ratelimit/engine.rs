//! Admission decision engine.
//!
//! The engine is the only component the dispatch boundary talks to. For each
//! request it derives the client key, resolves the rule, and produces one
//! [`Decision`]; after the response it records the outcome so repeat
//! offenders can be quarantined.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::clock::Clock;
use super::decision::{ceil_secs, Decision, LimitingDimension};
use super::identity::{identify, ClientKey, RequestMetadata};
use super::quarantine::{BlockEntry, QuarantineTracker};
use super::rules::{RateLimitRule, RuleResolver};
use super::store::{ClientLimits, RateLimitStore};

/// The result of evaluating one request.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub client_key: ClientKey,
    pub rule: RateLimitRule,
    pub decision: Decision,
}

/// Orchestrates identification, rule resolution, quarantine and quota checks.
pub struct AdmissionEngine {
    resolver: RuleResolver,
    store: Arc<RateLimitStore>,
    quarantine: QuarantineTracker,
    clock: Arc<dyn Clock>,
}

impl AdmissionEngine {
    /// Create an engine. `quarantine` should share `store`.
    pub fn new(
        resolver: RuleResolver,
        store: Arc<RateLimitStore>,
        quarantine: QuarantineTracker,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            store,
            quarantine,
            clock,
        }
    }

    /// Identify the caller, resolve its rule and decide.
    pub fn evaluate(&self, request: &RequestMetadata) -> Evaluation {
        let client_key = identify(request);
        let rule = self.resolver.resolve(&request.path, request.roles());
        let decision = self.decide(&client_key, rule);

        Evaluation {
            client_key,
            rule: rule.clone(),
            decision,
        }
    }

    /// Decide for a known client and rule.
    ///
    /// Order is fixed: quarantine, then minute, hour and burst. The first
    /// failing check names the limiting dimension and nothing is consumed;
    /// quota is committed to all three dimensions only when all pass.
    pub fn decide(&self, client_key: &ClientKey, rule: &RateLimitRule) -> Decision {
        let now = self.clock.now();

        if let Some(unblock_at) = self.quarantine.active_block(client_key, now) {
            let retry_after = ceil_secs(unblock_at - now);
            debug!(client = %client_key, retry_after, "Request rejected, client quarantined");
            return Decision::quarantined(retry_after);
        }

        let shared = match self.store.limits_for(client_key, rule, now) {
            Ok(shared) => shared,
            Err(e) => {
                warn!(client = %client_key, error = %e, "Rate limit state unavailable, denying");
                return Decision::overloaded();
            }
        };

        let decision = {
            let mut limits = shared.lock();
            admit(&mut limits, now)
        };

        if decision.allowed {
            trace!(
                client = %client_key,
                scope = %rule.scope,
                remaining_minute = decision.remaining_minute,
                remaining_hour = decision.remaining_hour,
                "Request admitted"
            );
        } else {
            debug!(
                client = %client_key,
                scope = %rule.scope,
                dimension = %decision.limiting_dimension,
                retry_after = decision.retry_after_seconds,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Record the final status of a request for abuse detection.
    ///
    /// Returns the block issued if this outcome quarantined the client.
    pub fn record(
        &self,
        client_key: &ClientKey,
        rule: &RateLimitRule,
        endpoint: &str,
        status_code: u16,
    ) -> Option<BlockEntry> {
        let now = self.clock.now();
        self.quarantine
            .record_outcome(client_key, rule, endpoint, status_code, now)
    }

    pub fn resolver(&self) -> &RuleResolver {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<RateLimitStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Dry-check every dimension, then commit once. Caller holds the key's lock.
fn admit(limits: &mut ClientLimits, now: f64) -> Decision {
    if !limits.minute.can_consume(1, now) {
        limits.hour.evict(now);
        return Decision::deny(
            LimitingDimension::Minute,
            limits.minute.retry_after(),
            limits.minute.remaining(),
            limits.hour.remaining(),
        );
    }

    if !limits.hour.would_allow(now) {
        return Decision::deny(
            LimitingDimension::Hour,
            ceil_secs(limits.hour.retry_after(now)),
            limits.minute.remaining(),
            0,
        );
    }

    if !limits.burst.would_allow(now) {
        return Decision::deny(
            LimitingDimension::Burst,
            ceil_secs(limits.burst.retry_after(now)),
            limits.minute.remaining(),
            limits.hour.remaining(),
        );
    }

    // can_consume refilled at `now`, so this cannot fail
    limits.minute.consume(1, now);
    limits.hour.record(now);
    limits.burst.record(now);

    Decision::allow(limits.minute.remaining(), limits.hour.remaining())
}
