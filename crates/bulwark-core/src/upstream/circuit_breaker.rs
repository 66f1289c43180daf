use crate::{
    events::{BulwarkEvent, EventDispatcher},
    upstream::errors::UpstreamError,
};
use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::Instant;

/// Circuit breaker thresholds shared by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit (default: 5)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Base time spent `Open` before a probe is admitted, in milliseconds (default: 30000)
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Random spread applied to every cooldown, as a fraction of its length (default: 0.2)
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,

    /// Cooldown growth factor after each failed probe; `1.0` disables backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for the backed-off cooldown in milliseconds (default: 300000)
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_jitter_fraction() -> f64 {
    0.2
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_cooldown_ms() -> u64 {
    300_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            jitter_fraction: default_jitter_fraction(),
            backoff_multiplier: default_backoff_multiplier(),
            max_cooldown_ms: default_max_cooldown_ms(),
        }
    }
}

/// Circuit breaker state machine.
///
/// - `Closed` -> `Open`: consecutive failures reach the threshold
/// - `Open` -> `HalfOpen`: the jittered cooldown has elapsed and a caller asks for admission
/// - `HalfOpen` -> `Closed`: the single probe succeeds
/// - `HalfOpen` -> `Open`: the probe fails (cooldown grows by the backoff multiplier)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreakerState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// How a finished call affects the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    /// The endpoint was never really exercised (local rejection, remote throttling).
    Neutral,
}

impl Outcome {
    fn of<T>(result: &Result<T, UpstreamError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) if e.should_trip_breaker() => Self::Failure,
            Err(UpstreamError::ClientError { .. }) => Self::Success,
            Err(_) => Self::Neutral,
        }
    }
}

/// All mutable state under one lock so transitions are atomic.
#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    consecutive_failures: u32,
    last_transition: Instant,
    /// Jittered cooldown drawn when the circuit last opened.
    cooldown: Duration,
    /// Failed probes since the circuit first opened; drives cooldown backoff.
    reopen_count: u32,
    probe_in_flight: bool,
}

/// Per-endpoint failure isolation.
///
/// Admission goes through [`CircuitBreaker::try_acquire`], which hands out a
/// [`BreakerPermit`]. At most one probe permit exists while `HalfOpen`; dropping a probe
/// permit without recording an outcome (for example when a hedge loser is cancelled) frees the
/// probe slot again.
pub struct CircuitBreaker {
    name: Arc<str>,
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
    events: EventDispatcher,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: Arc<str>, config: CircuitBreakerConfig, events: EventDispatcher) -> Self {
        Self {
            name,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                consecutive_failures: 0,
                last_transition: Instant::now(),
                cooldown: Duration::from_millis(config.cooldown_ms),
                reopen_count: 0,
                probe_in_flight: false,
            }),
            config,
            events,
        }
    }

    /// Cooldown for the given number of failed probes, before jitter.
    fn base_cooldown(&self, reopen_count: u32) -> Duration {
        let base = Duration::from_millis(self.config.cooldown_ms);
        if reopen_count == 0 || self.config.backoff_multiplier <= 1.0 {
            return base;
        }
        let exponent = i32::try_from(reopen_count).unwrap_or(i32::MAX);
        let scaled = base.as_secs_f64() * self.config.backoff_multiplier.powi(exponent);
        let max = Duration::from_millis(self.config.max_cooldown_ms.max(self.config.cooldown_ms));
        if scaled.is_finite() {
            Duration::from_secs_f64(scaled).min(max)
        } else {
            max
        }
    }

    /// Draws `cooldown * (1 ± jitter)` afresh for each transition.
    fn jittered(&self, cooldown: Duration) -> Duration {
        let jitter = self.config.jitter_fraction.clamp(0.0, 0.99);
        if jitter == 0.0 {
            return cooldown;
        }
        let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
        cooldown.mul_f64(factor)
    }

    fn open(&self, inner: &mut BreakerInner, now: Instant) -> BulwarkEvent {
        inner.state = CircuitBreakerState::Open;
        inner.last_transition = now;
        inner.cooldown = self.jittered(self.base_cooldown(inner.reopen_count));
        inner.probe_in_flight = false;
        BulwarkEvent::CircuitOpened {
            endpoint: self.name.clone(),
            consecutive_failures: inner.consecutive_failures,
            cooldown: inner.cooldown,
            at: Utc::now(),
        }
    }

    /// Asks for permission to call the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::CircuitBreakerOpen`] while the cooldown runs, or while another
    /// caller holds the `HalfOpen` probe slot.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, UpstreamError> {
        let now = Instant::now();
        let mut event = None;

        let result = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitBreakerState::Closed => Ok(false),
                CircuitBreakerState::Open => {
                    if now.saturating_duration_since(inner.last_transition) >= inner.cooldown {
                        inner.state = CircuitBreakerState::HalfOpen;
                        inner.last_transition = now;
                        inner.probe_in_flight = true;
                        event = Some(BulwarkEvent::CircuitHalfOpened {
                            endpoint: self.name.clone(),
                            at: Utc::now(),
                        });
                        Ok(true)
                    } else {
                        Err(UpstreamError::CircuitBreakerOpen(self.name.to_string()))
                    }
                }
                CircuitBreakerState::HalfOpen => {
                    if inner.probe_in_flight {
                        Err(UpstreamError::CircuitBreakerOpen(self.name.to_string()))
                    } else {
                        inner.probe_in_flight = true;
                        Ok(true)
                    }
                }
            }
        };

        if let Some(event) = event {
            tracing::warn!(endpoint = %self.name, "circuit breaker transitioning to half-open state");
            self.events.emit(event);
        }

        result.map(|probe| BreakerPermit { breaker: Arc::clone(self), probe, settled: false })
    }

    /// Runs `f` under the breaker and records its outcome.
    ///
    /// `f` is not invoked when admission is refused.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::CircuitBreakerOpen`] on refusal, otherwise whatever `f` returns.
    pub async fn execute<F, Fut, T>(self: &Arc<Self>, f: F) -> Result<T, UpstreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let permit = self.try_acquire()?;
        let result = f().await;
        permit.record(&result);
        result
    }

    fn settle(&self, probe: bool, outcome: Outcome) {
        let now = Instant::now();
        let mut event = None;

        {
            let mut inner = self.inner.lock();
            if probe {
                inner.probe_in_flight = false;
            }

            match (inner.state, outcome) {
                (_, Outcome::Neutral) => {}
                (CircuitBreakerState::Closed, Outcome::Success) => {
                    inner.consecutive_failures = 0;
                }
                (CircuitBreakerState::Closed, Outcome::Failure) => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.reopen_count = 0;
                        event = Some(self.open(&mut inner, now));
                    }
                }
                (CircuitBreakerState::HalfOpen, Outcome::Success) if probe => {
                    inner.state = CircuitBreakerState::Closed;
                    inner.last_transition = now;
                    inner.consecutive_failures = 0;
                    inner.reopen_count = 0;
                    event = Some(BulwarkEvent::CircuitClosed {
                        endpoint: self.name.clone(),
                        at: Utc::now(),
                    });
                }
                (CircuitBreakerState::HalfOpen, Outcome::Failure) if probe => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    inner.reopen_count = inner.reopen_count.saturating_add(1);
                    event = Some(self.open(&mut inner, now));
                }
                // Late results of calls admitted before the circuit opened.
                (_, Outcome::Failure) => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                }
                (_, Outcome::Success) => {}
            }
        }

        match event {
            Some(event @ BulwarkEvent::CircuitOpened { consecutive_failures, cooldown, .. }) => {
                tracing::warn!(
                    endpoint = %self.name,
                    threshold = self.config.failure_threshold,
                    consecutive_failures,
                    cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX),
                    "circuit breaker opened"
                );
                self.events.emit(event);
            }
            Some(event) => {
                tracing::info!(endpoint = %self.name, "circuit breaker closed after successful probe");
                self.events.emit(event);
            }
            None => {}
        }
    }

    /// Non-mutating admission check used by endpoint selection.
    ///
    /// `true` when a call would currently be admitted: `Closed`, `Open` with the cooldown
    /// elapsed, or `HalfOpen` with the probe slot free.
    #[must_use]
    pub fn is_call_permitted(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => {
                Instant::now().saturating_duration_since(inner.last_transition) >= inner.cooldown
            }
            CircuitBreakerState::HalfOpen => !inner.probe_in_flight,
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Cooldown drawn for the current (or most recent) `Open` period.
    #[must_use]
    pub fn current_cooldown(&self) -> Duration {
        self.inner.lock().cooldown
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Forces the breaker back to `Closed`.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitBreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.reopen_count = 0;
        inner.probe_in_flight = false;
        inner.last_transition = Instant::now();
        tracing::info!(endpoint = %self.name, "circuit breaker manually reset");
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`].
///
/// Record the call's result with [`BreakerPermit::record`]. A dropped, unrecorded permit counts
/// as neutral.
#[must_use = "an unrecorded permit does not report the call outcome"]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    settled: bool,
}

impl BreakerPermit {
    /// `true` if this permit is the single `HalfOpen` probe.
    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record<T>(mut self, result: &Result<T, UpstreamError>) {
        self.settled = true;
        self.breaker.settle(self.probe, Outcome::of(result));
    }
}

impl std::fmt::Debug for BreakerPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerPermit")
            .field("endpoint", &self.breaker.name)
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.probe, Outcome::Neutral);
        }
    }
}
