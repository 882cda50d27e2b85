//! Admission decisions.

use serde::{Deserialize, Serialize};

/// The check that denied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitingDimension {
    /// Nothing limited the request
    None,
    /// Per-minute token bucket
    Minute,
    /// Per-hour sliding window
    Hour,
    /// Burst sliding window
    Burst,
    /// Client is temporarily blocked
    Quarantine,
    /// State for the client could not be allocated
    Overload,
}

impl LimitingDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitingDimension::None => "none",
            LimitingDimension::Minute => "minute",
            LimitingDimension::Hour => "hour",
            LimitingDimension::Burst => "burst",
            LimitingDimension::Quarantine => "quarantine",
            LimitingDimension::Overload => "overload",
        }
    }
}

impl std::fmt::Display for LimitingDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating one request. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub limiting_dimension: LimitingDimension,
    pub retry_after_seconds: u64,
    pub remaining_minute: u64,
    pub remaining_hour: u64,
}

impl Decision {
    pub fn allow(remaining_minute: u64, remaining_hour: u64) -> Self {
        Self {
            allowed: true,
            limiting_dimension: LimitingDimension::None,
            retry_after_seconds: 0,
            remaining_minute,
            remaining_hour,
        }
    }

    pub fn deny(
        dimension: LimitingDimension,
        retry_after_seconds: u64,
        remaining_minute: u64,
        remaining_hour: u64,
    ) -> Self {
        Self {
            allowed: false,
            limiting_dimension: dimension,
            retry_after_seconds,
            remaining_minute,
            remaining_hour,
        }
    }

    pub fn quarantined(retry_after_seconds: u64) -> Self {
        Self::deny(LimitingDimension::Quarantine, retry_after_seconds, 0, 0)
    }

    /// Deny when state is unavailable. Denying is always safe.
    pub fn overloaded() -> Self {
        Self::deny(LimitingDimension::Overload, 1, 0, 0)
    }

    /// Error code reported to denied clients.
    pub fn error_code(&self) -> &'static str {
        match self.limiting_dimension {
            LimitingDimension::Quarantine => "client_blocked",
            _ => "rate_limit_exceeded",
        }
    }
}

/// Round a non-negative duration in seconds up to whole seconds.
pub(crate) fn ceil_secs(secs: f64) -> u64 {
    if secs <= 0.0 {
        0
    } else {
        secs.ceil() as u64
    }
}
