//! # Metrics
//!
//! Pipeline metrics are recorded through the `metrics` facade, so any installed recorder
//! receives them. [`install_prometheus_recorder`] installs a Prometheus recorder once per
//! process and returns a handle for rendering the exposition text.
//!
//! Two paths feed the recorder:
//!
//! - **Hot path**: the connection core, coalescer and batch manager call
//!   [`MetricsCollector`] methods directly for per-request counters and histograms.
//! - **Event path**: [`MetricsCollector`] is an [`EventSink`], so breaker transitions,
//!   backpressure, deadline expiry and hedge outcomes are counted from the event stream.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `bulwark_upstream_requests_total` | counter | endpoint, method, outcome |
//! | `bulwark_upstream_latency_seconds` | histogram | endpoint, method |
//! | `bulwark_calls_total` | counter | method, outcome |
//! | `bulwark_circuit_breaker_state` | gauge | endpoint |
//! | `bulwark_circuit_breaker_transitions_total` | counter | endpoint, to |
//! | `bulwark_queue_depth` | gauge | endpoint |
//! | `bulwark_backpressure_rejections_total` | counter | endpoint |
//! | `bulwark_deadline_expired_total` | counter | endpoint |
//! | `bulwark_rate_limited_total` | counter | endpoint |
//! | `bulwark_hedge_launched_total` | counter | primary, backup |
//! | `bulwark_hedge_wins_total` | counter | endpoint, role |
//! | `bulwark_cache_requests_total` | counter | outcome |
//! | `bulwark_batch_size` | histogram | endpoint, method |
//! | `bulwark_endpoint_healthy` | gauge | endpoint |

use crate::{
    config::MetricsConfig,
    events::{BulwarkEvent, EventSink},
    upstream::errors::UpstreamError,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{sync::OnceLock, time::Duration};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// How a cache lookup was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Coalesced,
}

impl CacheOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Coalesced => "coalesced",
        }
    }
}

/// Installs the global Prometheus recorder on first use.
///
/// Later calls return the same handle. If another recorder is already installed, a
/// detached recorder is used instead and its handle returned, so rendering still works.
pub fn install_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                tracing::info!("prometheus recorder installed");
                handle
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install prometheus recorder, using a detached one");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Renders the Prometheus exposition text, if a recorder was installed.
#[must_use]
pub fn render_prometheus() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

fn breaker_gauge_value(event: &BulwarkEvent) -> Option<(f64, &'static str)> {
    match event {
        BulwarkEvent::CircuitClosed { .. } => Some((0.0, "closed")),
        BulwarkEvent::CircuitHalfOpened { .. } => Some((0.5, "half_open")),
        BulwarkEvent::CircuitOpened { .. } => Some((1.0, "open")),
        _ => None,
    }
}

/// Records pipeline metrics. Cheap to clone; a disabled collector records nothing.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCollector {
    enabled: bool,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl MetricsCollector {
    #[must_use]
    pub fn new(config: &MetricsConfig) -> Self {
        if config.enabled && config.prometheus {
            install_prometheus_recorder();
        }
        Self { enabled: config.enabled }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// One call against one endpoint, as classified by the connection core.
    pub fn record_upstream(
        &self,
        endpoint: &str,
        method: &str,
        result: Result<(), &UpstreamError>,
        latency: Duration,
    ) {
        if !self.enabled {
            return;
        }
        let outcome = match result {
            Ok(()) => "success",
            Err(e) => e.as_str(),
        };
        counter!(
            "bulwark_upstream_requests_total",
            "endpoint" => endpoint.to_string(),
            "method" => method.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!(
            "bulwark_upstream_latency_seconds",
            "endpoint" => endpoint.to_string(),
            "method" => method.to_string()
        )
        .record(latency.as_secs_f64());
    }

    /// Final outcome delivered to a caller; `outcome` is `"success"` or an error label.
    pub fn record_call(&self, method: &str, outcome: &'static str) {
        if !self.enabled {
            return;
        }
        counter!("bulwark_calls_total", "method" => method.to_string(), "outcome" => outcome)
            .increment(1);
    }

    pub fn record_cache(&self, outcome: CacheOutcome) {
        if !self.enabled {
            return;
        }
        counter!("bulwark_cache_requests_total", "outcome" => outcome.as_str()).increment(1);
    }

    pub fn record_batch(&self, endpoint: &str, method: &str, size: usize) {
        if !self.enabled {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let size = size as f64;
        histogram!(
            "bulwark_batch_size",
            "endpoint" => endpoint.to_string(),
            "method" => method.to_string()
        )
        .record(size);
    }

    pub fn record_queue_depth(&self, endpoint: &str, depth: usize) {
        if !self.enabled {
            return;
        }
        #[allow(clippy::cast_precision_loss)]
        let depth = depth as f64;
        gauge!("bulwark_queue_depth", "endpoint" => endpoint.to_string()).set(depth);
    }
}

impl EventSink for MetricsCollector {
    fn emit(&self, event: &BulwarkEvent) {
        if !self.enabled {
            return;
        }
        let endpoint = event.endpoint().to_string();

        if let Some((value, to)) = breaker_gauge_value(event) {
            gauge!("bulwark_circuit_breaker_state", "endpoint" => endpoint.clone()).set(value);
            counter!(
                "bulwark_circuit_breaker_transitions_total",
                "endpoint" => endpoint,
                "to" => to
            )
            .increment(1);
            return;
        }

        match event {
            BulwarkEvent::RateLimited { .. } => {
                counter!("bulwark_rate_limited_total", "endpoint" => endpoint).increment(1);
            }
            BulwarkEvent::RequestQueued { depth, .. } => {
                self.record_queue_depth(&endpoint, *depth);
            }
            BulwarkEvent::BackpressureTriggered { .. } => {
                counter!("bulwark_backpressure_rejections_total", "endpoint" => endpoint)
                    .increment(1);
            }
            BulwarkEvent::DeadlineExpired { .. } => {
                counter!("bulwark_deadline_expired_total", "endpoint" => endpoint).increment(1);
            }
            BulwarkEvent::HedgeLaunched { primary, backup, .. } => {
                counter!(
                    "bulwark_hedge_launched_total",
                    "primary" => primary.to_string(),
                    "backup" => backup.to_string()
                )
                .increment(1);
            }
            BulwarkEvent::HedgeWon { primary, .. } => {
                let role = if *primary { "primary" } else { "backup" };
                counter!("bulwark_hedge_wins_total", "endpoint" => endpoint, "role" => role)
                    .increment(1);
            }
            BulwarkEvent::EndpointHealthChanged { healthy, .. } => {
                gauge!("bulwark_endpoint_healthy", "endpoint" => endpoint)
                    .set(if *healthy { 1.0 } else { 0.0 });
            }
            _ => {}
        }
    }
}
