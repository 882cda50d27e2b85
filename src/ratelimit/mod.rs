//! Admission control: identification, rule resolution, quota state and decisions.

mod clock;
mod decision;
mod engine;
mod identity;
mod quarantine;
mod rules;
mod sliding_window;
mod store;
mod token_bucket;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::{Decision, LimitingDimension};
pub use engine::{AdmissionEngine, Evaluation};
pub use identity::{identify, ClientIdentity, ClientKey, RequestMetadata};
pub use quarantine::{BlockEntry, QuarantineTracker, RequestHistory, RequestRecord, TOO_MANY_REQUESTS};
pub use rules::{EndpointRule, RateLimitRule, RoleRule, RuleResolver, RulesConfig};
pub use sliding_window::SlidingWindowCounter;
pub use store::{
    ClientLimits, LimitsKey, RateLimitStore, SharedLimits, StoreError, StoreSettings, StoreStats,
    SweepReport,
};
pub use token_bucket::TokenBucket;
