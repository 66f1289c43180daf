//! Request coalescing and short-lived result caching.
//!
//! Identical calls (same method, parameters and consistency level) share one execution:
//! callers arriving while it runs wait on the same pending result, and callers arriving
//! shortly after get the completed result until its TTL expires. Failed outcomes are only
//! kept when `cache_failures` is set, and never when the failure came from local policy.

pub mod coalescer;

pub use coalescer::{CacheStats, RequestCoalescer};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::types::ConsistencyLevel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Coalesce and cache identical calls (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Lifetime of a successful result in milliseconds; `0` coalesces without caching
    /// (default: 1000)
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Completed entries kept before least-recently-used eviction (default: 10000)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Keep failed upstream outcomes too (default: false)
    #[serde(default)]
    pub cache_failures: bool,

    /// Lifetime of a cached failure in milliseconds (default: 250)
    #[serde(default = "default_failure_ttl_ms")]
    pub failure_ttl_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_ttl_ms() -> u64 {
    1000
}

fn default_max_entries() -> usize {
    10_000
}

fn default_failure_ttl_ms() -> u64 {
    250
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl_ms: default_ttl_ms(),
            max_entries: default_max_entries(),
            cache_failures: false,
            failure_ttl_ms: default_failure_ttl_ms(),
        }
    }
}

/// Identity of a call for coalescing.
///
/// Parameters are stored in canonical JSON text. Object keys serialize in sorted order, so
/// parameter maps that differ only in key order produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: Arc<str>,
    consistency: ConsistencyLevel,
    params: String,
}

impl RequestKey {
    #[must_use]
    pub fn new(method: &str, params: &Value, consistency: ConsistencyLevel) -> Self {
        Self { method: Arc::from(method), consistency, params: params.to_string() }
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency
    }
}
