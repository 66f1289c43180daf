//! Request hedging for tail latency.
//!
//! The primary attempt starts immediately on the selected endpoint. If it has not resolved
//! when the hedge delay elapses, backup attempts start on other endpoints. The first success
//! wins; every other attempt is aborted and joined before returning, releasing its slot and
//! breaker permit. If every attempt fails, the error of the last one to fail is returned.
//! A non-transient failure (a client error or a malformed response) ends the race at once:
//! sending the same request elsewhere cannot change the answer.
//!
//! Only idempotent, read-only methods are hedged; the orchestrator never hedges retries.

use crate::{
    events::{BulwarkEvent, EventDispatcher},
    upstream::{
        connection::ConnectionCore,
        endpoint::{Endpoint, EndpointLease},
        errors::UpstreamError,
        latency_tracker::LatencyTracker,
        selector::EndpointSelector,
    },
};
use arc_swap::ArcSwap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinSet, time::Instant};
use tracing::{debug, info, warn};

/// Result of a hedged execution, plus every endpoint whose attempt failed.
///
/// Retries exclude `failed` so they never land on an endpoint that just failed the call.
#[derive(Debug)]
pub struct HedgeOutcome {
    pub result: Result<Value, UpstreamError>,
    pub failed: Vec<Arc<str>>,
}

/// How the hedge delay is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HedgeDelayMode {
    /// Observed latency quantile of the primary endpoint times `delay_factor`.
    #[default]
    Percentile,
    /// Always `default_delay_ms`.
    Fixed,
}

/// Configuration for hedged request execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeConfig {
    /// Whether hedging is enabled
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub delay_mode: HedgeDelayMode,

    /// Latency percentile to use as hedge trigger (0.0-1.0, default: 0.95)
    #[serde(default = "default_latency_quantile")]
    pub latency_quantile: f64,

    /// Multiplier applied to the observed percentile (default: 0.75)
    #[serde(default = "default_delay_factor")]
    pub delay_factor: f64,

    /// Fixed delay, and fallback when too few samples exist, in milliseconds (default: 100)
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,

    /// Samples needed before the percentile is trusted (default: 20)
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Minimum derived delay in milliseconds (default: 10)
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Maximum derived delay in milliseconds (default: 2000)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum parallel attempts including primary (default: 2)
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_latency_quantile() -> f64 {
    0.95
}

fn default_delay_factor() -> f64 {
    0.75
}

fn default_delay_ms() -> u64 {
    100
}

fn default_min_samples() -> usize {
    20
}

fn default_min_delay_ms() -> u64 {
    10
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_max_parallel() -> usize {
    2
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_mode: HedgeDelayMode::Percentile,
            latency_quantile: default_latency_quantile(),
            delay_factor: default_delay_factor(),
            default_delay_ms: default_delay_ms(),
            min_samples: default_min_samples(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_parallel: default_max_parallel(),
        }
    }
}

impl HedgeConfig {
    /// Hedges early and wide: P90 × 0.5, up to two backups.
    #[must_use]
    pub fn low_latency() -> Self {
        Self {
            enabled: true,
            latency_quantile: 0.90,
            delay_factor: 0.5,
            default_delay_ms: 50,
            min_delay_ms: 5,
            max_delay_ms: 500,
            max_parallel: 3,
            ..Self::default()
        }
    }

    /// Hedges only clear outliers: P99 × 1.0, one backup.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            enabled: true,
            latency_quantile: 0.99,
            delay_factor: 1.0,
            default_delay_ms: 250,
            min_samples: 50,
            min_delay_ms: 50,
            max_delay_ms: 5000,
            max_parallel: 2,
            ..Self::default()
        }
    }

    /// Hedge delay for an endpoint with the given latency history.
    #[must_use]
    pub fn delay_for(&self, latency: &LatencyTracker) -> Duration {
        let fallback = Duration::from_millis(self.default_delay_ms);
        if self.delay_mode == HedgeDelayMode::Fixed || latency.sample_count() < self.min_samples {
            return fallback;
        }
        let Some(percentile_ms) = latency.percentile(self.latency_quantile) else {
            return fallback;
        };

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = (percentile_ms as f64 * self.delay_factor).round().max(0.0) as u64;
        let delay_ms = scaled.max(self.min_delay_ms).min(self.max_delay_ms.max(self.min_delay_ms));
        Duration::from_millis(delay_ms)
    }
}

type AttemptOutcome = (Arc<str>, bool, Result<Value, UpstreamError>);

/// Executes hedged requests with latency-based triggering.
///
/// Configuration sits behind an `ArcSwap`, so reads on the hot path never lock and
/// [`HedgeExecutor::update_config`] takes effect for the next call.
pub struct HedgeExecutor {
    config: ArcSwap<HedgeConfig>,
    selector: Arc<EndpointSelector>,
    connection: Arc<ConnectionCore>,
    events: EventDispatcher,
}

impl HedgeExecutor {
    #[must_use]
    pub fn new(
        config: HedgeConfig,
        selector: Arc<EndpointSelector>,
        connection: Arc<ConnectionCore>,
        events: EventDispatcher,
    ) -> Self {
        Self { config: ArcSwap::from_pointee(config), selector, connection, events }
    }

    pub fn update_config(&self, config: HedgeConfig) {
        self.config.store(Arc::new(config));
        info!("hedge executor configuration updated");
    }

    #[must_use]
    pub fn config(&self) -> HedgeConfig {
        (**self.config.load()).clone()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.load().enabled
    }

    #[must_use]
    pub fn hedge_delay(&self, endpoint: &Endpoint) -> Duration {
        self.config.load().delay_for(endpoint.latency())
    }

    /// Runs `method` on the leased primary endpoint, hedging onto other endpoints once the
    /// hedge delay passes.
    ///
    /// # Errors
    ///
    /// The outcome holds the error of the attempt that failed last when no attempt succeeds,
    /// or the first non-transient error.
    pub async fn execute(
        &self,
        primary: EndpointLease,
        method: &str,
        params: Arc<Value>,
        deadline: Instant,
    ) -> HedgeOutcome {
        let config = self.config.load_full();
        let max_backups = config.max_parallel.saturating_sub(1);

        if !config.enabled || max_backups == 0 {
            let name = primary.endpoint.name().clone();
            let timeout = remaining(&primary.endpoint, deadline);
            let result = self.connection.execute_leased(primary, method, &params, timeout).await;
            let failed = if result.is_err() { vec![name] } else { Vec::new() };
            return HedgeOutcome { result, failed };
        }

        let primary_name = primary.endpoint.name().clone();
        let delay = config.delay_for(primary.endpoint.latency());
        debug!(
            primary = %primary_name,
            hedge_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            max_parallel = config.max_parallel,
            "executing hedged request"
        );

        let mut attempts: JoinSet<AttemptOutcome> = JoinSet::new();
        let mut running: Vec<(Arc<str>, bool)> = vec![(primary_name.clone(), true)];
        let mut excluding: Vec<Arc<str>> = vec![primary_name.clone()];
        self.spawn_attempt(&mut attempts, primary, true, method, &params, deadline);

        let mut launched = 0usize;
        let mut hedge_at = Some(Instant::now() + delay);
        let mut last_error: Option<UpstreamError> = None;
        let mut failed: Vec<Arc<str>> = Vec::new();

        loop {
            let timer_at = hedge_at;
            let timer = async move {
                match timer_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let launch_now = tokio::select! {
                joined = attempts.join_next() => {
                    let Some(joined) = joined else { break };
                    let (endpoint, is_primary, result) = match joined {
                        Ok(outcome) => outcome,
                        Err(join_error) => {
                            warn!(error = %join_error, "hedge attempt task failed");
                            last_error = Some(UpstreamError::BatchAborted(join_error.to_string()));
                            continue;
                        }
                    };
                    running.retain(|(name, _)| *name != endpoint);

                    match result {
                        Ok(value) => {
                            self.finish(&mut attempts, &running, &endpoint, is_primary, launched).await;
                            return HedgeOutcome { result: Ok(value), failed };
                        }
                        Err(e) if !e.is_transient() => {
                            warn!(endpoint = %endpoint, primary = is_primary, error = %e, "hedge attempt failed, not retryable");
                            attempts.abort_all();
                            while attempts.join_next().await.is_some() {}
                            failed.push(endpoint);
                            return HedgeOutcome { result: Err(e), failed };
                        }
                        Err(e) => {
                            warn!(endpoint = %endpoint, primary = is_primary, error = %e, "hedge attempt failed");
                            last_error = Some(e);
                            failed.push(endpoint);
                            // Nothing left racing: start the next backup without waiting.
                            attempts.is_empty() && launched < max_backups
                        }
                    }
                }
                () = timer => {
                    hedge_at = None;
                    launched < max_backups
                }
            };

            if launch_now {
                if let Some(backup) = self.launch_backup(&mut attempts, &mut excluding, method, &params, deadline) {
                    launched += 1;
                    running.push((backup.clone(), false));
                    self.events.emit(BulwarkEvent::HedgeLaunched {
                        primary: primary_name.clone(),
                        backup,
                        delay,
                        at: Utc::now(),
                    });
                    if launched < max_backups {
                        hedge_at = Some(Instant::now() + delay);
                    }
                } else {
                    hedge_at = None;
                }
            }

            if attempts.is_empty() {
                break;
            }
        }

        warn!(primary = %primary_name, backups = launched, "all hedged attempts failed");
        let error = last_error.unwrap_or_else(|| UpstreamError::CircuitBreakerOpen(primary_name.to_string()));
        HedgeOutcome { result: Err(error), failed }
    }

    /// Aborts and joins the losers, then reports the outcome.
    async fn finish(
        &self,
        attempts: &mut JoinSet<AttemptOutcome>,
        losers: &[(Arc<str>, bool)],
        winner: &Arc<str>,
        winner_is_primary: bool,
        launched: usize,
    ) {
        attempts.abort_all();
        while attempts.join_next().await.is_some() {}

        if launched == 0 {
            return;
        }
        debug!(endpoint = %winner, primary = winner_is_primary, cancelled = losers.len(), "hedged request won");
        self.events.emit(BulwarkEvent::HedgeWon {
            endpoint: winner.clone(),
            primary: winner_is_primary,
            at: Utc::now(),
        });
        for (loser, is_primary) in losers {
            self.events.emit(BulwarkEvent::HedgeLost {
                endpoint: loser.clone(),
                primary: *is_primary,
                at: Utc::now(),
            });
        }
    }

    /// Starts one backup on the best endpoint not yet used. Returns its name, or `None` when
    /// no other endpoint can take the call right now.
    fn launch_backup(
        &self,
        attempts: &mut JoinSet<AttemptOutcome>,
        excluding: &mut Vec<Arc<str>>,
        method: &str,
        params: &Arc<Value>,
        deadline: Instant,
    ) -> Option<Arc<str>> {
        while let Some(endpoint) = self.selector.select(excluding) {
            excluding.push(endpoint.name().clone());
            match endpoint.try_lease() {
                Ok(lease) => {
                    let name = endpoint.name().clone();
                    self.spawn_attempt(attempts, lease, false, method, params, deadline);
                    return Some(name);
                }
                Err(reason) => {
                    debug!(endpoint = %endpoint.name(), reason = ?reason, "hedge backup refused");
                }
            }
        }
        debug!("no endpoint available for hedge backup");
        None
    }

    fn spawn_attempt(
        &self,
        attempts: &mut JoinSet<AttemptOutcome>,
        lease: EndpointLease,
        primary: bool,
        method: &str,
        params: &Arc<Value>,
        deadline: Instant,
    ) {
        let connection = self.connection.clone();
        let method = method.to_string();
        let params = params.clone();
        let name = lease.endpoint.name().clone();

        attempts.spawn(async move {
            let timeout = remaining(&lease.endpoint, deadline);
            let result = connection.execute_leased(lease, &method, &params, timeout).await;
            (name, primary, result)
        });
    }
}

fn remaining(endpoint: &Endpoint, deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now()).min(endpoint.config().timeout())
}

impl std::fmt::Debug for HedgeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HedgeExecutor").field("config", &self.config()).finish_non_exhaustive()
    }
}
