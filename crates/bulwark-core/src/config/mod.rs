//! Client configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Later sources override earlier ones:
//!
//! 1. **Compiled defaults**: serde default functions on every field
//! 2. **Config file**: TOML file named by the `BULWARK_CONFIG` env var
//! 3. **Environment variables**: `BULWARK__SECTION__FIELD` overrides single fields
//!
//! # Validation
//!
//! [`BulwarkConfig::validate`] rejects any configuration the pipeline cannot run with. The
//! runtime builder calls it before constructing anything, so invalid configuration aborts
//! initialization instead of degrading silently.
//!
//! # Example
//!
//! ```toml
//! [[endpoints]]
//! name = "primary"
//! address = "https://rpc.example.com"
//! weight = 3
//! max_concurrency = 32
//!
//! [endpoints.rate_limit]
//! capacity = 100
//! refill_per_second = 40.0
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! cooldown_ms = 10000
//!
//! [methods]
//! batchable = ["getAccountInfo"]
//! hedgeable = ["getSlot", "getBalance"]
//! non_idempotent = ["sendTransaction"]
//! ```

use crate::{
    batch::BatchConfig,
    cache::CacheConfig,
    upstream::{
        circuit_breaker::CircuitBreakerConfig, health::HealthCheckConfig, hedging::HedgeConfig,
        token_bucket::RateLimitConfig,
    },
};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::Path, time::Duration};
use thiserror::Error;

/// Errors raised while loading or validating configuration. All are fatal.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("duplicate endpoint name: {0}")]
    DuplicateEndpoint(String),

    #[error("invalid endpoint {name}: {reason}")]
    InvalidEndpoint { name: String, reason: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.into() }
}

/// One backend endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Unique label used in logs, metrics and events.
    pub name: String,

    /// Address handed to the transport.
    pub address: String,

    /// Tie-break weight among equally loaded endpoints. Higher wins (default: 1)
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Maximum concurrent in-flight calls (default: 16)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-call timeout ceiling for this endpoint in milliseconds (default: 10000)
    #[serde(default = "default_endpoint_timeout_ms")]
    pub timeout_ms: u64,

    /// Overrides the global rate limit for this endpoint.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

fn default_weight() -> u32 {
    1
}

fn default_max_concurrency() -> usize {
    16
}

fn default_endpoint_timeout_ms() -> u64 {
    10_000
}

impl EndpointConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            weight: default_weight(),
            max_concurrency: default_max_concurrency(),
            timeout_ms: default_endpoint_timeout_ms(),
            rate_limit: None,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Queueing and global admission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued calls per endpoint (default: 256)
    #[serde(default = "default_max_queue_size")]
    pub max_size: usize,

    /// Maximum calls executing across all endpoints (default: 512)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Queue instead of failing when an endpoint is out of tokens (default: true)
    #[serde(default = "default_true")]
    pub queue_on_rate_limit: bool,

    /// Interval of the drain loop's periodic pass, in milliseconds (default: 25)
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,

    /// Interval of the expired-entry sweep, in milliseconds (default: 100)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Deadline applied when a call sets no timeout, in milliseconds (default: 10000)
    #[serde(default = "default_call_timeout_ms")]
    pub default_timeout_ms: u64,
}

fn default_max_queue_size() -> usize {
    256
}

fn default_max_in_flight() -> usize {
    512
}

fn default_true() -> bool {
    true
}

fn default_drain_interval_ms() -> u64 {
    25
}

fn default_sweep_interval_ms() -> u64 {
    100
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_queue_size(),
            max_in_flight: default_max_in_flight(),
            queue_on_rate_limit: default_true(),
            drain_interval_ms: default_drain_interval_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            default_timeout_ms: default_call_timeout_ms(),
        }
    }
}

/// Retry of transient failures on other endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per idempotent call, including the first (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts() }
    }
}

/// Per-method routing policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodsConfig {
    /// Methods combined into batch calls.
    #[serde(default)]
    pub batchable: Vec<String>,

    /// Idempotent read-only methods eligible for hedging.
    #[serde(default)]
    pub hedgeable: Vec<String>,

    /// Methods with side effects: never cached, coalesced, hedged or retried.
    #[serde(default)]
    pub non_idempotent: Vec<String>,
}

/// Logging output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json` (default: "pretty")
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Record pipeline metrics through the `metrics` facade (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Install a Prometheus recorder on startup (default: false)
    #[serde(default)]
    pub prometheus: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true, prometheus: false }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulwarkConfig {
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,

    /// Default rate limit for endpoints without their own.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub hedging: HedgeConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub methods: MethodsConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl BulwarkConfig {
    /// Loads configuration from a TOML file (optional) plus `BULWARK__*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a source cannot be read or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("BULWARK").prefix_separator("__").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Loads from the path in `BULWARK_CONFIG`, defaulting to `config/bulwark.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("BULWARK_CONFIG").unwrap_or_else(|_| "config/bulwark.toml".to_string());
        Self::from_file(config_path)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML or mismatched types.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Rate limit in force for `endpoint`.
    #[must_use]
    pub fn rate_limit_for(&self, endpoint: &EndpointConfig) -> RateLimitConfig {
        endpoint.rate_limit.unwrap_or(self.rate_limit)
    }

    /// Checks every constraint the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }

        let mut names = HashSet::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            let endpoint_error = |reason: &str| ConfigError::InvalidEndpoint {
                name: endpoint.name.clone(),
                reason: reason.to_string(),
            };

            if endpoint.name.trim().is_empty() {
                return Err(endpoint_error("name must not be empty"));
            }
            if !names.insert(endpoint.name.as_str()) {
                return Err(ConfigError::DuplicateEndpoint(endpoint.name.clone()));
            }
            if endpoint.address.trim().is_empty() {
                return Err(endpoint_error("address must not be empty"));
            }
            if endpoint.weight == 0 {
                return Err(endpoint_error("weight must be at least 1"));
            }
            if endpoint.max_concurrency == 0 {
                return Err(endpoint_error("max_concurrency must be at least 1"));
            }
            if endpoint.timeout_ms == 0 {
                return Err(endpoint_error("timeout_ms must be greater than 0"));
            }
            let limit = self.rate_limit_for(endpoint);
            if limit.capacity == 0 {
                return Err(endpoint_error("rate limit capacity must be greater than 0"));
            }
            if !(limit.refill_per_second > 0.0 && limit.refill_per_second.is_finite()) {
                return Err(endpoint_error("rate limit refill must be a positive number"));
            }
        }

        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 {
            return Err(invalid("circuit_breaker.failure_threshold", "must be at least 1"));
        }
        if !(0.0..1.0).contains(&breaker.jitter_fraction) {
            return Err(invalid("circuit_breaker.jitter_fraction", "must be in [0, 1)"));
        }
        if !(breaker.backoff_multiplier >= 1.0 && breaker.backoff_multiplier.is_finite()) {
            return Err(invalid("circuit_breaker.backoff_multiplier", "must be at least 1.0"));
        }

        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries", "must be at least 1"));
        }

        if self.batch.max_batch_size == 0 {
            return Err(invalid("batch.max_batch_size", "must be at least 1"));
        }

        let hedging = &self.hedging;
        if !(hedging.delay_factor > 0.0 && hedging.delay_factor.is_finite()) {
            return Err(invalid("hedging.delay_factor", "must be a positive number"));
        }
        if !(hedging.latency_quantile > 0.0 && hedging.latency_quantile <= 1.0) {
            return Err(invalid("hedging.latency_quantile", "must be in (0, 1]"));
        }
        if hedging.min_delay_ms > hedging.max_delay_ms {
            return Err(invalid("hedging.min_delay_ms", "must not exceed max_delay_ms"));
        }

        if self.queue.max_size == 0 {
            return Err(invalid("queue.max_size", "must be at least 1"));
        }
        if self.queue.max_in_flight == 0 {
            return Err(invalid("queue.max_in_flight", "must be at least 1"));
        }
        if self.queue.default_timeout_ms == 0 {
            return Err(invalid("queue.default_timeout_ms", "must be greater than 0"));
        }
        if self.queue.drain_interval_ms == 0 || self.queue.sweep_interval_ms == 0 {
            return Err(invalid("queue", "drain and sweep intervals must be greater than 0"));
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }

        if self.health_check.enabled && self.health_check.interval_ms == 0 {
            return Err(invalid("health_check.interval_ms", "must be greater than 0"));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(invalid("logging.format", "must be \"pretty\" or \"json\""));
        }

        Ok(())
    }
}
