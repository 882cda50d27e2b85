//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::{FloodgateError, Result};
use crate::ratelimit::{
    AdmissionEngine, Clock, QuarantineTracker, RateLimitStore, RuleResolver, RulesConfig,
    StoreSettings,
};

/// Environment variable prefix, e.g. `FLOODGATE__SERVER__HTTP_ADDR`.
const ENV_PREFIX: &str = "FLOODGATE";

/// Main configuration for the Floodgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to the rate limit rules file; built-in rules when unset
    pub rules_path: Option<String>,

    /// How often idle state is swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Quota state idle for this long is swept
    #[serde(default = "default_bucket_idle")]
    pub bucket_idle_secs: u64,

    /// Request history older than this is swept
    #[serde(default = "default_history_retention")]
    pub history_retention_secs: u64,

    /// Request records kept per client
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Clients are quarantined once recent 429s exceed this count
    #[serde(default = "default_quarantine_threshold")]
    pub quarantine_threshold: usize,

    /// Window over which 429s are counted, in seconds
    #[serde(default = "default_quarantine_window")]
    pub quarantine_window_secs: u64,

    /// Soft bound on tracked quota entries and on clients with history
    #[serde(default)]
    pub max_tracked_clients: Option<usize>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            sweep_interval_secs: default_sweep_interval(),
            bucket_idle_secs: default_bucket_idle(),
            history_retention_secs: default_history_retention(),
            history_capacity: default_history_capacity(),
            quarantine_threshold: default_quarantine_threshold(),
            quarantine_window_secs: default_quarantine_window(),
            max_tracked_clients: None,
        }
    }
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_bucket_idle() -> u64 {
    3600
}

fn default_history_retention() -> u64 {
    86_400
}

fn default_history_capacity() -> usize {
    1000
}

fn default_quarantine_threshold() -> usize {
    10
}

fn default_quarantine_window() -> u64 {
    300
}

impl RateLimitingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            bucket_idle_secs: self.bucket_idle_secs,
            history_retention_secs: self.history_retention_secs,
            history_capacity: self.history_capacity,
            max_tracked_clients: self.max_tracked_clients,
        }
    }

    /// Rules from `rules_path`, or the built-in rules.
    pub fn rules(&self) -> Result<RulesConfig> {
        match &self.rules_path {
            Some(path) => RulesConfig::from_file(path),
            None => Ok(RulesConfig::default()),
        }
    }
}

impl FloodgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: FloodgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| FloodgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file, then `FLOODGATE__*`
    /// environment variables, which take precedence.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

        let config: FloodgateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.rate_limiting;
        if limits.sweep_interval_secs == 0 {
            return Err(FloodgateError::Config(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        if limits.history_capacity == 0 {
            return Err(FloodgateError::Config(
                "history_capacity must be positive".to_string(),
            ));
        }
        if limits.quarantine_window_secs == 0 {
            return Err(FloodgateError::Config(
                "quarantine_window_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the admission engine: rules, store and quarantine tracker.
    ///
    /// Any rule error is fatal here, before traffic is served.
    pub fn build_engine(&self, clock: Arc<dyn Clock>) -> Result<AdmissionEngine> {
        let limits = &self.rate_limiting;
        let resolver = RuleResolver::new(limits.rules()?)?;
        let store = Arc::new(RateLimitStore::new(limits.store_settings()));
        let quarantine = QuarantineTracker::new(
            Arc::clone(&store),
            limits.quarantine_threshold,
            limits.quarantine_window_secs,
        );

        info!(
            sweep_interval_secs = limits.sweep_interval_secs,
            quarantine_threshold = limits.quarantine_threshold,
            "Admission engine configured"
        );
        Ok(AdmissionEngine::new(resolver, store, quarantine, clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{ManualClock, RequestMetadata};
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("floodgate-{}-{}", std::process::id(), name));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = FloodgateConfig::default();
        assert_eq!(config.server.http_addr.port(), 8080);
        assert_eq!(config.rate_limiting.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.rate_limiting.quarantine_threshold, 10);
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let path = write_temp(
            "partial.yaml",
            r#"
server:
  http_addr: "0.0.0.0:9000"
rate_limiting:
  quarantine_threshold: 3
"#,
        );

        let config = FloodgateConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.rate_limiting.quarantine_threshold, 3);
        assert_eq!(config.rate_limiting.history_capacity, 1000);
    }

    #[test]
    fn test_load_from_layered_file() {
        let path = write_temp(
            "layered.yaml",
            r#"
rate_limiting:
  sweep_interval_secs: 60
"#,
        );

        let config = FloodgateConfig::load(path.to_str()).unwrap();
        assert_eq!(config.rate_limiting.sweep_interval_secs, 60);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let mut config = FloodgateConfig::default();
        config.rate_limiting.sweep_interval_secs = 0;
        assert!(matches!(config.validate(), Err(FloodgateError::Config(_))));

        let mut config = FloodgateConfig::default();
        config.rate_limiting.history_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_engine_with_rules_file() {
        let rules = write_temp(
            "rules.yaml",
            r#"
default:
  requests_per_minute: 1
  requests_per_hour: 10
  burst_limit: 1
  burst_window_seconds: 10
  cooldown_seconds: 60
"#,
        );
        let mut config = FloodgateConfig::default();
        config.rate_limiting.rules_path = rules.to_str().map(str::to_string);

        let engine = tokio_test::assert_ok!(config.build_engine(Arc::new(ManualClock::new(0.0))));
        let request = RequestMetadata::new("/api/items").with_origin("10.0.0.1", "ua");
        assert!(engine.evaluate(&request).decision.allowed);
        assert!(!engine.evaluate(&request).decision.allowed);
    }

    #[test]
    fn test_build_engine_rejects_bad_rules() {
        let rules = write_temp(
            "bad-rules.yaml",
            r#"
default:
  requests_per_minute: 0
  requests_per_hour: 10
  burst_limit: 1
  burst_window_seconds: 10
  cooldown_seconds: 60
"#,
        );
        let mut config = FloodgateConfig::default();
        config.rate_limiting.rules_path = rules.to_str().map(str::to_string);

        assert!(config.build_engine(Arc::new(ManualClock::new(0.0))).is_err());
    }
}
