//! Rate limit rules configuration and resolution.
//!
//! Rules are loaded once at startup and never mutated. Resolution picks, in
//! strict priority order, the first endpoint rule whose prefix matches the
//! request path, then the first role-tier rule the caller holds, then the
//! default rule.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::error::{FloodgateError, Result};

/// Limits applied to one client within one rule scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Partition for per-client state. Rules sharing a scope share quota.
    /// Filled in from the rule's position when left empty.
    #[serde(default)]
    pub scope: String,
    /// Token bucket capacity, refilled over one minute
    pub requests_per_minute: u64,
    /// Sliding window limit over one hour
    pub requests_per_hour: u64,
    /// Sliding window limit over `burst_window_seconds`
    pub burst_limit: u64,
    /// Burst window length in seconds
    pub burst_window_seconds: u64,
    /// How long a quarantined client stays blocked
    pub cooldown_seconds: u64,
}

impl RateLimitRule {
    pub fn new(
        requests_per_minute: u64,
        requests_per_hour: u64,
        burst_limit: u64,
        burst_window_seconds: u64,
        cooldown_seconds: u64,
    ) -> Self {
        Self {
            scope: String::new(),
            requests_per_minute,
            requests_per_hour,
            burst_limit,
            burst_window_seconds,
            cooldown_seconds,
        }
    }

    /// Set the scope this rule's state is partitioned under.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Whether both rules size quota state identically.
    ///
    /// State is shared per scope, so rules sharing a scope must agree.
    fn same_quota(&self, other: &RateLimitRule) -> bool {
        self.requests_per_minute == other.requests_per_minute
            && self.requests_per_hour == other.requests_per_hour
            && self.burst_limit == other.burst_limit
            && self.burst_window_seconds == other.burst_window_seconds
    }

    fn validate(&self) -> Result<()> {
        let checks = [
            ("requests_per_minute", self.requests_per_minute),
            ("requests_per_hour", self.requests_per_hour),
            ("burst_limit", self.burst_limit),
            ("burst_window_seconds", self.burst_window_seconds),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(FloodgateError::Config(format!(
                    "rule '{}': {} must be positive",
                    self.scope, field
                )));
            }
        }
        Ok(())
    }
}

/// A rule applied to every path starting with `prefix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRule {
    pub prefix: String,
    #[serde(flatten)]
    pub rule: RateLimitRule,
}

/// A rule applied to callers holding `role`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRule {
    pub role: String,
    #[serde(flatten)]
    pub rule: RateLimitRule,
}

/// The rules file.
///
/// ```yaml
/// default:
///   requests_per_minute: 30
///   requests_per_hour: 500
///   burst_limit: 10
///   burst_window_seconds: 10
///   cooldown_seconds: 300
/// endpoints:            # first match wins, list specific prefixes first
///   - prefix: /api/auth
///     requests_per_minute: 10
///     ...
/// roles:                # priority order, highest first
///   - role: admin
///     requests_per_minute: 1000
///     ...
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    pub default: RateLimitRule,
    #[serde(default)]
    pub endpoints: Vec<EndpointRule>,
    #[serde(default)]
    pub roles: Vec<RoleRule>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        let role = |role: &str, rule: RateLimitRule| RoleRule {
            role: role.to_string(),
            rule,
        };

        Self {
            default: RateLimitRule::new(30, 500, 10, 10, 300),
            endpoints: vec![EndpointRule {
                prefix: "/api/auth".to_string(),
                rule: RateLimitRule::new(10, 50, 5, 60, 900),
            }],
            roles: vec![
                role("admin", RateLimitRule::new(1000, 50_000, 200, 10, 30)),
                role("premium", RateLimitRule::new(300, 10_000, 50, 10, 60)),
                role("standard", RateLimitRule::new(60, 1000, 10, 10, 60)),
                role("free", RateLimitRule::new(20, 200, 5, 10, 300)),
            ],
        }
    }
}

impl RulesConfig {
    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse rate limit rules: {}", e)))
    }
}

/// Maps a request to its single applicable rule.
#[derive(Debug, Clone)]
pub struct RuleResolver {
    endpoints: Vec<EndpointRule>,
    roles: Vec<RoleRule>,
    default: RateLimitRule,
}

impl RuleResolver {
    /// Validate the rules and assign scopes to unnamed rules.
    ///
    /// Fails on non-positive limits, empty prefixes or roles, duplicate roles,
    /// endpoint rules shadowed by an earlier, broader prefix, and a scope
    /// shared by rules with different limits.
    pub fn new(config: RulesConfig) -> Result<Self> {
        let RulesConfig {
            mut default,
            mut endpoints,
            mut roles,
        } = config;

        if default.scope.is_empty() {
            default.scope = "default".to_string();
        }
        default.validate()?;

        for (i, endpoint) in endpoints.iter().enumerate() {
            if endpoint.prefix.is_empty() {
                return Err(FloodgateError::Config(format!(
                    "endpoint rule #{} has an empty prefix",
                    i
                )));
            }
            if let Some(earlier) = endpoints[..i]
                .iter()
                .find(|e| endpoint.prefix.starts_with(&e.prefix))
            {
                return Err(FloodgateError::Config(format!(
                    "endpoint rule '{}' is shadowed by earlier rule '{}'",
                    endpoint.prefix, earlier.prefix
                )));
            }
        }
        for endpoint in &mut endpoints {
            if endpoint.rule.scope.is_empty() {
                endpoint.rule.scope = format!("endpoint:{}", endpoint.prefix);
            }
            endpoint.rule.validate()?;
        }

        let mut seen = HashSet::new();
        for role in &mut roles {
            if role.role.is_empty() {
                return Err(FloodgateError::Config("role rule has an empty role".to_string()));
            }
            if !seen.insert(role.role.clone()) {
                return Err(FloodgateError::Config(format!(
                    "role '{}' is configured more than once",
                    role.role
                )));
            }
            if role.rule.scope.is_empty() {
                role.rule.scope = format!("role:{}", role.role);
            }
            role.rule.validate()?;
        }

        let mut scopes: HashMap<&str, &RateLimitRule> = HashMap::new();
        let all_rules = std::iter::once(&default)
            .chain(endpoints.iter().map(|e| &e.rule))
            .chain(roles.iter().map(|r| &r.rule));
        for rule in all_rules {
            match scopes.get(rule.scope.as_str()) {
                Some(existing) if !existing.same_quota(rule) => {
                    return Err(FloodgateError::Config(format!(
                        "scope '{}' is shared by rules with different limits",
                        rule.scope
                    )));
                }
                Some(_) => {}
                None => {
                    scopes.insert(rule.scope.as_str(), rule);
                }
            }
        }

        info!(
            endpoints = endpoints.len(),
            roles = roles.len(),
            "Rate limit rules loaded"
        );

        Ok(Self {
            endpoints,
            roles,
            default,
        })
    }

    /// Resolve the rule for a request path and the caller's roles.
    pub fn resolve(&self, path: &str, roles: &[String]) -> &RateLimitRule {
        if let Some(endpoint) = self.endpoints.iter().find(|e| path.starts_with(&e.prefix)) {
            return &endpoint.rule;
        }

        if let Some(role) = self
            .roles
            .iter()
            .find(|r| roles.iter().any(|held| held == &r.role))
        {
            return &role.rule;
        }

        &self.default
    }

    pub fn default_rule(&self) -> &RateLimitRule {
        &self.default
    }
}
