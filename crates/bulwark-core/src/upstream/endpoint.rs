use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::{
    config::{BulwarkConfig, EndpointConfig},
    events::EventDispatcher,
    orchestrator::{
        queue::{QueueSnapshot, RequestQueue},
        PendingCall,
    },
    types::EndpointStats,
    upstream::{
        circuit_breaker::{BreakerPermit, CircuitBreaker},
        errors::UpstreamError,
        latency_tracker::LatencyTracker,
        token_bucket::TokenBucket,
    },
};

/// Why [`Endpoint::try_lease`] refused a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseError {
    /// The token bucket is empty.
    RateLimited,
    /// The circuit breaker refused admission.
    CircuitOpen(UpstreamError),
    /// Every concurrency slot is taken.
    AtCapacity,
}

/// One occupied concurrency slot.
///
/// Dropping the guard frees the slot and wakes the queue drain loop.
pub struct InFlightGuard {
    _permit: OwnedSemaphorePermit,
    semaphore: Arc<Semaphore>,
    capacity_freed: Arc<Notify>,
}

impl InFlightGuard {
    fn new(permit: OwnedSemaphorePermit, semaphore: Arc<Semaphore>, capacity_freed: Arc<Notify>) -> Self {
        Self { _permit: permit, semaphore, capacity_freed }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        // The permit field drops after this body; count it as already returned.
        tracing::trace!(
            available_permits = self.semaphore.available_permits() + 1,
            "in-flight slot released"
        );
        self.capacity_freed.notify_one();
    }
}

impl std::fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightGuard").finish_non_exhaustive()
    }
}

/// Everything needed to dispatch one call on one endpoint: a rate-limit token (already spent),
/// breaker admission and a concurrency slot.
#[derive(Debug)]
pub struct EndpointLease {
    pub endpoint: Arc<Endpoint>,
    pub permit: BreakerPermit,
    pub slot: InFlightGuard,
}

impl EndpointLease {
    /// Gives the lease back unused: the token is refunded and the breaker permit is dropped
    /// without recording an outcome.
    pub fn release(self) {
        self.endpoint.bucket.refund(1);
    }
}

/// A backend endpoint and all of its per-endpoint resiliency state.
///
/// Created once from configuration and never destroyed; [`Endpoint::deactivate`] takes it out
/// of rotation instead.
pub struct Endpoint {
    name: Arc<str>,
    config: EndpointConfig,
    breaker: Arc<CircuitBreaker>,
    bucket: TokenBucket,
    latency: LatencyTracker,
    concurrency: Arc<Semaphore>,
    capacity_freed: Arc<Notify>,
    active: AtomicBool,
    healthy: AtomicBool,
    health_failures: AtomicU32,
    health_successes: AtomicU32,
    requests: AtomicU64,
    failures: AtomicU64,
    queue: Mutex<RequestQueue<PendingCall>>,
}

impl Endpoint {
    #[must_use]
    pub fn from_config(
        config: &BulwarkConfig,
        endpoint: EndpointConfig,
        capacity_freed: Arc<Notify>,
        events: EventDispatcher,
    ) -> Self {
        let name: Arc<str> = Arc::from(endpoint.name.as_str());
        let rate_limit = config.rate_limit_for(&endpoint);
        let breaker = Arc::new(CircuitBreaker::new(
            name.clone(),
            config.circuit_breaker.clone(),
            events,
        ));

        Self {
            concurrency: Arc::new(Semaphore::new(endpoint.max_concurrency)),
            bucket: TokenBucket::from_config(&rate_limit),
            latency: LatencyTracker::default(),
            queue: Mutex::new(RequestQueue::new(config.queue.max_size)),
            active: AtomicBool::new(true),
            healthy: AtomicBool::new(true),
            health_failures: AtomicU32::new(0),
            health_successes: AtomicU32::new(0),
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            name,
            config: endpoint,
            breaker,
            capacity_freed,
        }
    }

    #[must_use]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.config.address
    }

    #[must_use]
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    #[must_use]
    pub fn weight(&self) -> u32 {
        self.config.weight
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    #[must_use]
    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    #[must_use]
    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    pub(crate) fn queue(&self) -> &Mutex<RequestQueue<PendingCall>> {
        &self.queue
    }

    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.config.max_concurrency
    }

    /// Calls currently holding a concurrency slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrency.saturating_sub(self.concurrency.available_permits())
    }

    /// `(in_flight, limit)`; compare ratios by cross-multiplying.
    #[must_use]
    pub fn load(&self) -> (usize, usize) {
        (self.in_flight(), self.config.max_concurrency)
    }

    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.concurrency.available_permits() > 0
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// In rotation and healthy, and the breaker would admit a call now. Concurrency is not
    /// considered, so a usable endpoint without free slots can still take queued work.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.is_active() && self.is_healthy() && self.breaker.is_call_permitted()
    }

    /// Usable with at least one free concurrency slot.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.is_usable() && self.has_capacity()
    }

    pub fn activate(&self) {
        if !self.active.swap(true, Ordering::AcqRel) {
            tracing::info!(endpoint = %self.name, "endpoint activated");
            self.capacity_freed.notify_one();
        }
    }

    pub fn deactivate(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            tracing::info!(endpoint = %self.name, "endpoint deactivated");
        }
    }

    /// Sets the health flag, returning `true` if it changed.
    pub fn set_healthy(&self, healthy: bool) -> bool {
        let changed = self.healthy.swap(healthy, Ordering::AcqRel) != healthy;
        if changed && healthy {
            self.capacity_freed.notify_one();
        }
        changed
    }

    /// Records a health probe result and returns the consecutive count of that kind.
    pub(crate) fn record_health_probe(&self, success: bool) -> u32 {
        if success {
            self.health_failures.store(0, Ordering::Release);
            self.health_successes.fetch_add(1, Ordering::AcqRel).saturating_add(1)
        } else {
            self.health_successes.store(0, Ordering::Release);
            self.health_failures.fetch_add(1, Ordering::AcqRel).saturating_add(1)
        }
    }

    /// Takes a free concurrency slot without waiting.
    #[must_use]
    pub fn try_acquire_slot(&self) -> Option<InFlightGuard> {
        let permit = self.concurrency.clone().try_acquire_owned().ok()?;
        Some(InFlightGuard::new(permit, self.concurrency.clone(), self.capacity_freed.clone()))
    }

    /// Waits for a concurrency slot.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::ConcurrencyLimit`] if the semaphore was closed.
    pub async fn acquire_slot(&self) -> Result<InFlightGuard, UpstreamError> {
        let permit = self
            .concurrency
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| UpstreamError::ConcurrencyLimit(self.name.to_string()))?;
        Ok(InFlightGuard::new(permit, self.concurrency.clone(), self.capacity_freed.clone()))
    }

    /// Acquires everything one dispatch needs, in pipeline order: a rate-limit token, breaker
    /// admission, then a concurrency slot. Partial acquisitions are rolled back on refusal.
    ///
    /// # Errors
    ///
    /// Returns the first [`LeaseError`] encountered.
    pub fn try_lease(self: &Arc<Self>) -> Result<EndpointLease, LeaseError> {
        if !self.bucket.try_consume(1) {
            return Err(LeaseError::RateLimited);
        }

        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                self.bucket.refund(1);
                return Err(LeaseError::CircuitOpen(e));
            }
        };

        let Some(slot) = self.try_acquire_slot() else {
            self.bucket.refund(1);
            drop(permit);
            return Err(LeaseError::AtCapacity);
        };

        Ok(EndpointLease { endpoint: Arc::clone(self), permit, slot })
    }

    pub(crate) fn record_outcome(&self, success: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.queue.lock().snapshot(self.name.clone(), Instant::now())
    }

    #[must_use]
    pub fn stats(&self) -> EndpointStats {
        let latency = self.latency.stats();
        EndpointStats {
            name: self.name.clone(),
            address: self.config.address.clone(),
            active: self.is_active(),
            healthy: self.is_healthy(),
            breaker_state: self.breaker.state().as_str(),
            consecutive_failures: self.breaker.consecutive_failures(),
            in_flight: self.in_flight(),
            concurrency_limit: self.config.max_concurrency,
            queue_depth: self.queue_depth(),
            tokens_available: self.bucket.available(),
            latency_p50_ms: latency.p50_ms,
            latency_p95_ms: latency.p95_ms,
            latency_p99_ms: latency.p99_ms,
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("address", &self.config.address)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}
