//! The single entry point for calls.
//!
//! # Pipeline
//!
//! ```text
//! call ─→ validate ─→ coalescer ─→ select endpoint ─→ lease (token → breaker → slot)
//!                        │                               │
//!                        │            no capacity ───────┴──→ endpoint queue ─→ drain loop
//!                        │                                                         │
//!                        └──────────── batch | hedge | direct ←────────────────────┘
//! ```
//!
//! Identical idempotent calls share one execution through the coalescer, so cache hits never
//! consume rate-limit tokens. A call that cannot be dispatched immediately waits on the best
//! candidate endpoint's bounded priority queue. A full queue rejects at once with
//! [`CallError::Backpressure`]; queued calls whose deadline passes resolve with
//! [`CallError::DeadlineExceeded`] without ever being dispatched.
//!
//! Transient upstream failures of idempotent calls are retried on endpoints not yet tried while
//! attempts and deadline remain. Policy errors are returned as-is.

pub mod errors;
pub mod queue;

pub use errors::CallError;
pub use queue::{QueueCounters, QueueEntry, QueueSnapshot, RequestQueue};

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use ahash::AHashSet;
use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use serde_json::{json, Value};
use tokio::{
    sync::{broadcast, oneshot, Notify, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    batch::BatchManager,
    cache::{RequestCoalescer, RequestKey},
    config::{BulwarkConfig, ConfigError, MethodsConfig, QueueConfig, RetryConfig},
    events::{BulwarkEvent, EventDispatcher},
    metrics::MetricsCollector,
    transport::Transport,
    types::{CallOptions, ConsistencyLevel, EndpointStats, Priority},
    upstream::{
        connection::ConnectionCore,
        endpoint::{Endpoint, EndpointLease, LeaseError},
        errors::UpstreamError,
        hedging::HedgeExecutor,
        registry::EndpointRegistry,
        selector::EndpointSelector,
    },
};

/// One validated call, shared between the caller, the queue and retries.
#[derive(Debug)]
struct CallRequest {
    method: String,
    params: Arc<Value>,
    priority: Priority,
    deadline: Instant,
    idempotent: bool,
    batchable: bool,
    hedgeable: bool,
}

/// A call waiting in an endpoint queue, with the channel its result goes back on.
pub(crate) struct PendingCall {
    request: Arc<CallRequest>,
    attempt: u32,
    excluded: Vec<Arc<str>>,
    reply: oneshot::Sender<Result<Value, CallError>>,
}

/// One slot of the global in-flight limit held by a dispatched call. Dropping it wakes the
/// drain loop.
struct GlobalSlot {
    _permit: OwnedSemaphorePermit,
    capacity_freed: Arc<Notify>,
}

impl Drop for GlobalSlot {
    fn drop(&mut self) {
        self.capacity_freed.notify_one();
    }
}

enum Admission {
    Dispatch(EndpointLease, OwnedSemaphorePermit),
    Enqueue(Arc<Endpoint>),
}

/// Method routing derived from [`MethodsConfig`].
#[derive(Debug, Default)]
struct MethodPolicy {
    batchable: AHashSet<String>,
    hedgeable: AHashSet<String>,
    non_idempotent: AHashSet<String>,
}

impl MethodPolicy {
    fn from_config(config: &MethodsConfig) -> Self {
        Self {
            batchable: config.batchable.iter().cloned().collect(),
            hedgeable: config.hedgeable.iter().cloned().collect(),
            non_idempotent: config.non_idempotent.iter().cloned().collect(),
        }
    }
}

fn remaining(deadline: Instant, endpoint: &Endpoint) -> Duration {
    deadline.saturating_duration_since(Instant::now()).min(endpoint.config().timeout())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Composes selection, admission, caching, batching, hedging and queueing for every call.
///
/// Owned through an `Arc`: queued calls are dispatched from background tasks that hold a
/// reference. [`crate::runtime::BulwarkRuntime`] starts those tasks and shuts them down.
pub struct Orchestrator {
    registry: Arc<EndpointRegistry>,
    selector: Arc<EndpointSelector>,
    connection: Arc<ConnectionCore>,
    coalescer: RequestCoalescer,
    batcher: Arc<BatchManager>,
    hedger: HedgeExecutor,
    methods: MethodPolicy,
    queue: QueueConfig,
    retry: RetryConfig,
    global: Arc<Semaphore>,
    events: EventDispatcher,
    metrics: MetricsCollector,
    shutting_down: AtomicBool,
}

impl Orchestrator {
    /// Validates `config` and builds every component.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found; nothing is built in that case.
    pub fn new(
        config: &BulwarkConfig,
        transport: Arc<dyn Transport>,
        events: EventDispatcher,
        metrics: MetricsCollector,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let registry = Arc::new(EndpointRegistry::from_config(config, &events));
        let selector = Arc::new(EndpointSelector::new(registry.clone()));
        let connection = Arc::new(ConnectionCore::new(transport, metrics));
        let batcher = Arc::new(BatchManager::new(config.batch.clone(), connection.clone(), metrics));
        let hedger =
            HedgeExecutor::new(config.hedging.clone(), selector.clone(), connection.clone(), events.clone());

        tracing::info!(
            endpoints = registry.len(),
            max_in_flight = config.queue.max_in_flight,
            queue_size = config.queue.max_size,
            hedging = config.hedging.enabled,
            "orchestrator initialized"
        );

        Ok(Self {
            coalescer: RequestCoalescer::new(config.cache.clone(), metrics),
            methods: MethodPolicy::from_config(&config.methods),
            queue: config.queue.clone(),
            retry: config.retry.clone(),
            global: Arc::new(Semaphore::new(config.queue.max_in_flight)),
            registry,
            selector,
            connection,
            batcher,
            hedger,
            events,
            metrics,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Executes `method` with `params` against the best available endpoint.
    ///
    /// `params` must be a JSON array or `null`. Unset options fall back to configured defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`]: policy rejections immediately, upstream failures after any
    /// retries are exhausted.
    pub async fn call(self: &Arc<Self>, method: &str, params: Value, options: CallOptions) -> Result<Value, CallError> {
        let result = self.call_inner(method, params, options).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.as_str(),
        };
        self.metrics.record_call(method, outcome);
        result
    }

    async fn call_inner(self: &Arc<Self>, method: &str, params: Value, options: CallOptions) -> Result<Value, CallError> {
        if self.is_shutting_down() {
            return Err(CallError::ShuttingDown);
        }
        let request = Arc::new(self.prepare(method, params, options)?);

        if !request.idempotent {
            return self.run(request, 1, Vec::new(), None).await;
        }

        let key = RequestKey::new(method, &request.params, options.consistency.unwrap_or_default());
        let this = Arc::clone(self);
        self.coalescer.get_or_compute(key, move || async move { this.run(request, 1, Vec::new(), None).await }).await
    }

    fn prepare(&self, method: &str, params: Value, options: CallOptions) -> Result<CallRequest, CallError> {
        if method.trim().is_empty() {
            return Err(CallError::Validation("method must not be empty".to_string()));
        }
        let mut params = match params {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            other => {
                return Err(CallError::Validation(format!("params must be an array, got {other}")));
            }
        };
        if let Some(level) = options.consistency {
            params.push(commitment(level));
        }

        let timeout = options.timeout.unwrap_or(Duration::from_millis(self.queue.default_timeout_ms));
        if timeout.is_zero() {
            return Err(CallError::Validation("timeout must be greater than zero".to_string()));
        }

        let idempotent = !self.methods.non_idempotent.contains(method);
        Ok(CallRequest {
            method: method.to_string(),
            params: Arc::new(Value::Array(params)),
            priority: options.priority.unwrap_or_default(),
            deadline: Instant::now() + timeout,
            idempotent,
            batchable: idempotent && self.methods.batchable.contains(method),
            hedgeable: idempotent && self.methods.hedgeable.contains(method),
        })
    }

    /// Admits and dispatches `request`, retrying transient failures, or parks it in a queue.
    async fn run(
        self: &Arc<Self>,
        request: Arc<CallRequest>,
        mut attempt: u32,
        mut excluded: Vec<Arc<str>>,
        mut last_error: Option<CallError>,
    ) -> Result<Value, CallError> {
        loop {
            if Instant::now() >= request.deadline {
                return Err(last_error.unwrap_or(CallError::RequestTimeout));
            }

            let (lease, global) = match self.admit(&request, &mut excluded) {
                Ok(Admission::Dispatch(lease, global)) => (lease, global),
                Ok(Admission::Enqueue(endpoint)) => {
                    return self.enqueue(&endpoint, request, attempt, excluded).await;
                }
                Err(e) => return Err(last_error.unwrap_or(e)),
            };

            let endpoint = lease.endpoint.name().clone();
            let mut failed = Vec::new();
            match self.dispatch(&request, lease, global, attempt, &mut failed).await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&request, &e, attempt) => {
                    tracing::debug!(
                        endpoint = %endpoint,
                        method = %request.method,
                        attempt,
                        error = %e,
                        "retrying on another endpoint"
                    );
                    exclude_failed(&mut excluded, failed);
                    attempt += 1;
                    last_error = Some(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn should_retry(&self, request: &CallRequest, error: &UpstreamError, attempt: u32) -> bool {
        request.idempotent &&
            error.is_transient() &&
            attempt < self.retry.max_attempts &&
            Instant::now() < request.deadline
    }

    /// Finds an endpoint and leases it, or names the endpoint to queue on.
    fn admit(&self, request: &CallRequest, excluded: &mut Vec<Arc<str>>) -> Result<Admission, CallError> {
        loop {
            let Some(endpoint) = self.selector.select(excluded) else {
                return match self.selector.best_candidate(excluded) {
                    Some(candidate) => Ok(Admission::Enqueue(candidate)),
                    None => Err(self.unavailable(excluded)),
                };
            };

            let Some(global) = self.try_global() else {
                return Ok(Admission::Enqueue(endpoint));
            };

            match endpoint.try_lease() {
                Ok(lease) => return Ok(Admission::Dispatch(lease, global)),
                Err(LeaseError::RateLimited) => {
                    self.events.emit(BulwarkEvent::RateLimited {
                        endpoint: endpoint.name().clone(),
                        method: request.method.clone(),
                        at: Utc::now(),
                    });
                    if self.queue.queue_on_rate_limit {
                        return Ok(Admission::Enqueue(endpoint));
                    }
                    return Err(CallError::RateLimitExceeded { endpoint: endpoint.name().clone() });
                }
                Err(LeaseError::CircuitOpen(_)) => excluded.push(endpoint.name().clone()),
                Err(LeaseError::AtCapacity) => return Ok(Admission::Enqueue(endpoint)),
            }
        }
    }

    /// Why nothing could take the call: an open breaker if that is all that stands in the way.
    fn unavailable(&self, excluded: &[Arc<str>]) -> CallError {
        self.registry
            .all()
            .iter()
            .find(|endpoint| {
                endpoint.is_active() &&
                    endpoint.is_healthy() &&
                    !excluded.iter().any(|name| name == endpoint.name()) &&
                    !endpoint.breaker().is_call_permitted()
            })
            .map_or(CallError::AllEndpointsUnavailable, |endpoint| CallError::CircuitOpen(endpoint.name().clone()))
    }

    /// A permit handed back unused is dropped silently; only [`GlobalSlot`] wakes the drain loop.
    fn try_global(&self) -> Option<OwnedSemaphorePermit> {
        self.global.clone().try_acquire_owned().ok()
    }

    async fn dispatch(
        &self,
        request: &CallRequest,
        lease: EndpointLease,
        global: OwnedSemaphorePermit,
        attempt: u32,
        failed: &mut Vec<Arc<str>>,
    ) -> Result<Value, UpstreamError> {
        let _global = GlobalSlot { _permit: global, capacity_freed: self.registry.capacity_freed().clone() };
        let timeout = remaining(request.deadline, &lease.endpoint);
        let endpoint = lease.endpoint.name().clone();

        let result = if request.batchable && self.batcher.is_enabled() {
            let EndpointLease { endpoint, permit, slot } = lease;
            // The combined request takes its own slot.
            drop(slot);
            let result = self.batcher.add_request(&endpoint, &request.method, (*request.params).clone(), timeout).await;
            permit.record(&result);
            result
        } else if request.hedgeable && attempt == 1 && self.hedger.is_enabled() {
            let outcome = self.hedger.execute(lease, &request.method, request.params.clone(), request.deadline).await;
            failed.extend(outcome.failed);
            return outcome.result;
        } else {
            self.connection.execute_leased(lease, &request.method, &request.params, timeout).await
        };

        if result.is_err() {
            failed.push(endpoint);
        }
        result
    }

    async fn enqueue(
        &self,
        endpoint: &Arc<Endpoint>,
        request: Arc<CallRequest>,
        attempt: u32,
        excluded: Vec<Arc<str>>,
    ) -> Result<Value, CallError> {
        let (reply, receiver) = oneshot::channel();
        let priority = request.priority;
        let deadline = request.deadline;
        let method = request.method.clone();
        let pending = PendingCall { request, attempt, excluded, reply };

        let enqueued = endpoint.queue().lock().enqueue(priority, deadline, pending);
        match enqueued {
            Ok(depth) => {
                tracing::debug!(endpoint = %endpoint.name(), method = %method, priority = %priority, depth, "call queued");
                self.metrics.record_queue_depth(endpoint.name(), depth);
                self.events.emit(BulwarkEvent::RequestQueued {
                    endpoint: endpoint.name().clone(),
                    method,
                    priority,
                    depth,
                    at: Utc::now(),
                });
                if self.is_shutting_down() {
                    self.fail_queued(endpoint);
                }
                self.registry.capacity_freed().notify_one();
            }
            Err(_rejected) => {
                let snapshot = endpoint.queue_snapshot();
                tracing::warn!(
                    endpoint = %endpoint.name(),
                    method = %method,
                    depth = snapshot.depth,
                    capacity = snapshot.capacity,
                    "queue full, rejecting call"
                );
                self.events.emit(BulwarkEvent::BackpressureTriggered {
                    endpoint: endpoint.name().clone(),
                    depth: snapshot.depth,
                    capacity: snapshot.capacity,
                    at: Utc::now(),
                });
                return Err(CallError::Backpressure(snapshot));
            }
        }

        receiver.await.unwrap_or(Err(CallError::ShuttingDown))
    }

    /// One pass over every queue: expire, migrate off unusable endpoints, dispatch what fits.
    /// Returns the number of calls dispatched.
    ///
    /// The head of a queue is only removed once it has somewhere to go, so a queue never
    /// holds more than its capacity.
    pub fn drain_once(self: &Arc<Self>) -> usize {
        let now = Instant::now();
        let mut dispatched = 0;

        'endpoints: for endpoint in self.registry.all() {
            loop {
                let mut expired = Vec::new();
                let has_head = {
                    let mut queue = endpoint.queue().lock();
                    loop {
                        match queue.peek_live(now, &mut expired).map(|entry| entry.item.reply.is_closed()) {
                            Some(true) => {
                                tracing::trace!(endpoint = %endpoint.name(), "dropping queued call with no waiter");
                                let _ = queue.pop_next(now, &mut expired);
                            }
                            Some(false) => break true,
                            None => break false,
                        }
                    }
                };
                for entry in expired {
                    self.expire(endpoint, entry, now);
                }
                if !has_head {
                    break;
                }

                if !endpoint.is_usable() {
                    if self.migrate_head(endpoint, now) {
                        continue;
                    }
                    break;
                }

                let Some(global) = self.try_global() else { break 'endpoints };

                let lease = match endpoint.try_lease() {
                    Ok(lease) => lease,
                    Err(reason) => {
                        tracing::trace!(endpoint = %endpoint.name(), reason = ?reason, "queued call not yet admitted");
                        break;
                    }
                };

                let mut expired = Vec::new();
                let next = endpoint.queue().lock().pop_next(now, &mut expired);
                for entry in expired {
                    self.expire(endpoint, entry, now);
                }
                match next {
                    Some(entry) if !entry.item.reply.is_closed() => {
                        self.spawn_queued(entry, lease, global);
                        dispatched += 1;
                    }
                    Some(_) => lease.release(),
                    None => {
                        // Emptied by shutdown or a concurrent drain.
                        lease.release();
                        break;
                    }
                }
            }
        }

        if dispatched > 0 {
            tracing::debug!(dispatched, "drained queued calls");
        }
        dispatched
    }

    /// Moves the head of `from`'s queue to the best other endpoint with queue room. Returns
    /// `false` when there is no such endpoint.
    ///
    /// Both queues are locked for the move, in address order.
    fn migrate_head(&self, from: &Arc<Endpoint>, now: Instant) -> bool {
        let Some(target) = self.selector.best_candidate(&[from.name().clone()]) else {
            return false;
        };
        if Arc::ptr_eq(&target, from) {
            return false;
        }

        let mut expired = Vec::new();
        let moved = {
            let (mut source, mut dest) = lock_pair(from.queue(), target.queue());
            if dest.is_full() {
                false
            } else if let Some(entry) = source.pop_next(now, &mut expired) {
                let QueueEntry { priority, deadline, item, .. } = entry;
                tracing::debug!(
                    from = %from.name(),
                    to = %target.name(),
                    method = %item.request.method,
                    "migrating queued call"
                );
                if let Err(item) = dest.enqueue(priority, deadline, item) {
                    let snapshot = dest.snapshot(target.name().clone(), now);
                    let _ = item.reply.send(Err(CallError::Backpressure(snapshot)));
                }
                true
            } else {
                false
            }
        };
        for entry in expired {
            self.expire(from, entry, now);
        }
        moved
    }

    fn spawn_queued(self: &Arc<Self>, entry: QueueEntry<PendingCall>, lease: EndpointLease, global: OwnedSemaphorePermit) {
        let this = Arc::clone(self);
        let PendingCall { request, attempt, mut excluded, reply } = entry.item;

        tokio::spawn(async move {
            let mut failed = Vec::new();
            let result = match this.dispatch(&request, lease, global, attempt, &mut failed).await {
                Ok(value) => Ok(value),
                Err(e) if this.should_retry(&request, &e, attempt) => {
                    exclude_failed(&mut excluded, failed);
                    this.run(request, attempt + 1, excluded, Some(e.into())).await
                }
                Err(e) => Err(e.into()),
            };
            // The caller may have gone away; the result has nowhere to go.
            let _ = reply.send(result);
        });
    }

    fn expire(&self, endpoint: &Endpoint, entry: QueueEntry<PendingCall>, now: Instant) {
        let waited = entry.waited(now);
        tracing::debug!(
            endpoint = %endpoint.name(),
            method = %entry.item.request.method,
            waited_ms = millis(waited),
            "queued call expired before dispatch"
        );
        self.events.emit(BulwarkEvent::DeadlineExpired {
            endpoint: endpoint.name().clone(),
            method: entry.item.request.method.clone(),
            waited,
            at: Utc::now(),
        });
        let _ = entry.item.reply.send(Err(CallError::DeadlineExceeded {
            endpoint: endpoint.name().clone(),
            waited_ms: millis(waited),
        }));
    }

    /// Resolves expired queue entries and purges expired cache entries. Returns the number of
    /// queued calls expired.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut expired_total = 0;
        for endpoint in self.registry.all() {
            let (expired, depth) = {
                let mut queue = endpoint.queue().lock();
                (queue.purge_expired(now), queue.len())
            };
            expired_total += expired.len();
            for entry in expired {
                self.expire(endpoint, entry, now);
            }
            self.metrics.record_queue_depth(endpoint.name(), depth);
        }
        self.coalescer.purge_expired();
        expired_total
    }

    /// Runs [`Orchestrator::drain_once`] whenever capacity frees up, and on a fixed interval so
    /// refilled tokens and recovered breakers are noticed too.
    #[must_use]
    pub fn spawn_drain_loop(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let period = Duration::from_millis(self.queue.drain_interval_ms.max(1));

        tokio::spawn(async move {
            let capacity_freed = this.registry.capacity_freed().clone();
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = capacity_freed.notified() => {}
                    _ = interval.tick() => {}
                    _ = shutdown_rx.recv() => {
                        tracing::info!("queue drain loop shutting down");
                        break;
                    }
                }
                this.drain_once();
            }
        })
    }

    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let period = Duration::from_millis(self.queue.sweep_interval_ms.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        this.sweep();
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("deadline sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Stops admitting calls and resolves every queued call with [`CallError::ShuttingDown`].
    /// Returns how many queued calls were failed.
    pub fn shutdown(&self) -> usize {
        self.shutting_down.store(true, Ordering::Release);
        let failed: usize = self.registry.all().iter().map(|endpoint| self.fail_queued(endpoint)).sum();
        tracing::info!(failed_queued = failed, "orchestrator shut down");
        failed
    }

    fn fail_queued(&self, endpoint: &Endpoint) -> usize {
        let drained = endpoint.queue().lock().drain_all();
        let count = drained.len();
        for entry in drained {
            let _ = entry.item.reply.send(Err(CallError::ShuttingDown));
        }
        count
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn selector(&self) -> &Arc<EndpointSelector> {
        &self.selector
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionCore> {
        &self.connection
    }

    #[must_use]
    pub fn coalescer(&self) -> &RequestCoalescer {
        &self.coalescer
    }

    #[must_use]
    pub fn batcher(&self) -> &Arc<BatchManager> {
        &self.batcher
    }

    #[must_use]
    pub fn hedger(&self) -> &HedgeExecutor {
        &self.hedger
    }

    #[must_use]
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Calls executing across all endpoints.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.queue.max_in_flight.saturating_sub(self.global.available_permits())
    }

    /// Calls waiting in all queues.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.registry.queued()
    }

    #[must_use]
    pub fn stats(&self) -> Vec<EndpointStats> {
        self.registry.snapshot()
    }
}

/// Locks two distinct mutexes in address order so concurrent callers cannot deadlock.
fn lock_pair<'a, T>(first: &'a Mutex<T>, second: &'a Mutex<T>) -> (MutexGuard<'a, T>, MutexGuard<'a, T>) {
    if std::ptr::addr_of!(*first) < std::ptr::addr_of!(*second) {
        let a = first.lock();
        (a, second.lock())
    } else {
        let b = second.lock();
        (first.lock(), b)
    }
}

/// Adds endpoints that just failed the call to the retry exclusion list.
fn exclude_failed(excluded: &mut Vec<Arc<str>>, failed: Vec<Arc<str>>) {
    for name in failed {
        if !excluded.contains(&name) {
            excluded.push(name);
        }
    }
}

fn commitment(level: ConsistencyLevel) -> Value {
    json!({ "commitment": level.as_str() })
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("endpoints", &self.registry.len())
            .field("in_flight", &self.in_flight())
            .field("queued", &self.queued())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}
