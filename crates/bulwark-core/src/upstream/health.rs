use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{sync::broadcast, time::Instant};

use crate::{
    events::{BulwarkEvent, EventDispatcher},
    transport::Transport,
    upstream::{endpoint::Endpoint, errors::UpstreamError, registry::EndpointRegistry},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Run the background health checker (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Time between probe rounds in milliseconds (default: 10000)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Method called as the probe (default: "getHealth")
    #[serde(default = "default_method")]
    pub method: String,

    /// Probe timeout in milliseconds (default: 2000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Consecutive failed probes before an endpoint is marked unhealthy (default: 3)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive successful probes before it is marked healthy again (default: 1)
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,
}

fn default_interval_ms() -> u64 {
    10_000
}

fn default_method() -> String {
    "getHealth".to_string()
}

fn default_timeout_ms() -> u64 {
    2000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_threshold() -> u32 {
    1
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_interval_ms(),
            method: default_method(),
            timeout_ms: default_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            recovery_threshold: default_recovery_threshold(),
        }
    }
}

/// Periodically probes every endpoint and flips its health flag.
///
/// Probes go straight to the transport: they bypass rate limiting and the circuit breaker and
/// do not occupy concurrency slots. Probe latency stays out of the endpoint's latency window,
/// which sizes hedge delays from real traffic only.
pub struct HealthChecker {
    registry: Arc<EndpointRegistry>,
    transport: Arc<dyn Transport>,
    config: HealthCheckConfig,
    events: EventDispatcher,
}

impl HealthChecker {
    #[must_use]
    pub fn new(
        registry: Arc<EndpointRegistry>,
        transport: Arc<dyn Transport>,
        config: HealthCheckConfig,
        events: EventDispatcher,
    ) -> Self {
        Self { registry, transport, config, events }
    }

    #[must_use]
    pub fn start_with_shutdown(self, mut shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_millis(self.config.interval_ms.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let healthy = self.check_all().await;
                        tracing::debug!(healthy, total = self.registry.len(), "health check round complete");
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("health checker shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Probes every active endpoint concurrently. Returns how many are healthy afterwards.
    pub async fn check_all(&self) -> usize {
        let probes = self.registry.all().iter().filter(|endpoint| endpoint.is_active()).map(|endpoint| self.check(endpoint));
        join_all(probes).await;
        self.registry.all().iter().filter(|endpoint| endpoint.is_healthy()).count()
    }

    /// Probes one endpoint and applies the thresholds. Returns the probe outcome.
    pub async fn check(&self, endpoint: &Endpoint) -> Result<(), UpstreamError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            timeout,
            self.transport.execute(endpoint.address(), &self.config.method, &json!([]), timeout),
        )
        .await
        {
            Ok(result) => result.map(|_| ()).map_err(UpstreamError::classify),
            Err(_elapsed) => Err(UpstreamError::Timeout),
        };

        let streak = endpoint.record_health_probe(outcome.is_ok());
        let changed = match &outcome {
            Ok(()) => {
                tracing::trace!(endpoint = %endpoint.name(), latency_ms = started.elapsed().as_millis(), "health probe ok");
                streak >= self.config.recovery_threshold && endpoint.set_healthy(true)
            }
            Err(e) => {
                tracing::debug!(endpoint = %endpoint.name(), error = %e, streak, "health probe failed");
                streak >= self.config.failure_threshold && endpoint.set_healthy(false)
            }
        };

        if changed {
            let healthy = outcome.is_ok();
            if healthy {
                tracing::info!(endpoint = %endpoint.name(), "endpoint recovered");
            } else {
                tracing::warn!(endpoint = %endpoint.name(), failures = streak, "endpoint marked unhealthy");
            }
            self.events.emit(BulwarkEvent::EndpointHealthChanged {
                endpoint: endpoint.name().clone(),
                healthy,
                at: Utc::now(),
            });
        }
        outcome
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker").field("config", &self.config).finish_non_exhaustive()
    }
}
