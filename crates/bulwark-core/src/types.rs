use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{borrow::Cow, fmt, sync::Arc, time::Duration};

/// JSON-RPC protocol version string used on the wire.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outgoing JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    pub params: Value,
    pub id: Arc<Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value, id: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method: method.into(),
            params,
            id: Arc::new(id),
        }
    }
}

/// Incoming JSON-RPC 2.0 response. Exactly one of `result` or `error` is set by a
/// well-behaved server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "default_jsonrpc_version")]
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub id: Arc<Value>,
}

fn default_jsonrpc_version() -> Cow<'static, str> {
    Cow::Borrowed(JSONRPC_VERSION)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Caller-supplied priority class. Higher values are dispatched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const LOW: Self = Self(10);
    pub const NORMAL: Self = Self(50);
    pub const HIGH: Self = Self(90);
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read consistency requested by the caller. Part of the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl ConsistencyLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

/// Per-call options for [`crate::orchestrator::Orchestrator::call`].
///
/// Unset fields fall back to the configured defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    pub priority: Option<Priority>,
    pub timeout: Option<Duration>,
    pub consistency: Option<ConsistencyLevel>,
}

impl CallOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_timeout_ms(self, timeout_ms: u64) -> Self {
        self.with_timeout(Duration::from_millis(timeout_ms))
    }

    #[must_use]
    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = Some(consistency);
        self
    }
}

/// Point-in-time view of one endpoint, returned by
/// [`crate::upstream::registry::EndpointRegistry::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub name: Arc<str>,
    pub address: String,
    pub active: bool,
    pub healthy: bool,
    pub breaker_state: &'static str,
    pub consecutive_failures: u32,
    pub in_flight: usize,
    pub concurrency_limit: usize,
    pub queue_depth: usize,
    pub tokens_available: f64,
    pub latency_p50_ms: Option<u64>,
    pub latency_p95_ms: Option<u64>,
    pub latency_p99_ms: Option<u64>,
}
