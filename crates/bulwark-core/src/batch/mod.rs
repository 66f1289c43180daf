//! Batching of compatible calls into one combined upstream request.
//!
//! Calls are buffered per endpoint and method. A buffer is flushed when it reaches the target
//! size or when `max_wait_ms` has passed since its oldest item, whichever comes first. The
//! combined response is routed back by position, so every caller receives exactly its own
//! sub-result; a failure of the combined request is delivered to every caller.
//!
//! With `adaptive` sizing the target follows Little's law: the observed arrival rate times the
//! observed service time of a batch, clamped to `[1, max_batch_size]`.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{sync::oneshot, time::Instant};

use crate::{
    metrics::MetricsCollector,
    transport::TransportCall,
    upstream::{connection::ConnectionCore, endpoint::Endpoint, errors::UpstreamError},
};

const EWMA_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Route batchable methods through the batch manager (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Upper bound on calls per combined request (default: 20)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Longest an item waits for its batch to fill, in milliseconds (default: 5)
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    /// Size batches from observed arrival rate and service time (default: true)
    #[serde(default = "default_adaptive")]
    pub adaptive: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_max_batch_size() -> usize {
    20
}

fn default_max_wait_ms() -> u64 {
    5
}

fn default_adaptive() -> bool {
    true
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_batch_size: default_max_batch_size(),
            max_wait_ms: default_max_wait_ms(),
            adaptive: default_adaptive(),
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BatchKey {
    endpoint: Arc<str>,
    method: String,
}

struct BatchItem {
    params: Value,
    reply: oneshot::Sender<Result<Value, UpstreamError>>,
}

/// Exponentially weighted arrival and service observations for one buffer.
#[derive(Debug, Default, Clone, Copy)]
struct Sizing {
    last_arrival: Option<Instant>,
    interarrival_secs: Option<f64>,
    service_secs: Option<f64>,
}

fn ewma(previous: Option<f64>, sample: f64) -> f64 {
    match previous {
        Some(previous) => EWMA_ALPHA * sample + (1.0 - EWMA_ALPHA) * previous,
        None => sample,
    }
}

impl Sizing {
    fn observe_arrival(&mut self, now: Instant) {
        if let Some(last) = self.last_arrival {
            let gap = now.saturating_duration_since(last).as_secs_f64();
            self.interarrival_secs = Some(ewma(self.interarrival_secs, gap));
        }
        self.last_arrival = Some(now);
    }

    fn observe_service(&mut self, elapsed: Duration) {
        self.service_secs = Some(ewma(self.service_secs, elapsed.as_secs_f64()));
    }

    /// Arrival rate × service time, clamped to `[1, max]`. `max` until both are known.
    fn target(&self, max: usize) -> usize {
        let (Some(gap), Some(service)) = (self.interarrival_secs, self.service_secs) else {
            return max;
        };
        if gap <= f64::EPSILON {
            return max;
        }
        let estimate = (service / gap).round();
        if estimate >= max as f64 {
            max
        } else {
            // `estimate` is finite, non-negative and below `max`.
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let size = estimate as usize;
            size.max(1)
        }
    }
}

#[derive(Default)]
struct Buffer {
    items: Vec<BatchItem>,
    generation: u64,
    deadline: Option<Instant>,
    sizing: Sizing,
}

impl Buffer {
    fn take(&mut self) -> (Vec<BatchItem>, Option<Instant>) {
        (std::mem::take(&mut self.items), self.deadline.take())
    }
}

/// Groups calls to batchable methods into combined upstream requests.
pub struct BatchManager {
    config: BatchConfig,
    connection: Arc<ConnectionCore>,
    buffers: DashMap<BatchKey, Buffer>,
    metrics: MetricsCollector,
}

impl BatchManager {
    #[must_use]
    pub fn new(config: BatchConfig, connection: Arc<ConnectionCore>, metrics: MetricsCollector) -> Self {
        Self { config, connection, buffers: DashMap::new(), metrics }
    }

    #[must_use]
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Current flush size for `method` on `endpoint`.
    #[must_use]
    pub fn target_size(&self, endpoint: &str, method: &str) -> usize {
        let key = BatchKey { endpoint: Arc::from(endpoint), method: method.to_string() };
        self.buffers.get(&key).map_or(self.config.max_batch_size, |buffer| self.target_for(&buffer.sizing))
    }

    /// Items waiting in all buffers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffers.iter().map(|buffer| buffer.items.len()).sum()
    }

    fn target_for(&self, sizing: &Sizing) -> usize {
        let max = self.config.max_batch_size.max(1);
        if self.config.adaptive {
            sizing.target(max)
        } else {
            max
        }
    }

    /// Adds one call to the buffer for `method` on `endpoint` and waits for its own result.
    ///
    /// # Errors
    ///
    /// Returns this call's classified failure, the failure of the combined request, or
    /// [`UpstreamError::BatchAborted`] if the batch was dropped before answering.
    pub async fn add_request(
        self: &Arc<Self>,
        endpoint: &Arc<Endpoint>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        let (reply, receiver) = oneshot::channel();
        let key = BatchKey { endpoint: endpoint.name().clone(), method: method.to_string() };
        let now = Instant::now();
        let deadline = now + timeout;

        let (ready, schedule) = {
            let mut buffer = self.buffers.entry(key.clone()).or_default();
            buffer.sizing.observe_arrival(now);
            let opened = buffer.items.is_empty();
            if opened {
                buffer.generation += 1;
            }
            buffer.deadline = Some(buffer.deadline.map_or(deadline, |current| current.min(deadline)));
            buffer.items.push(BatchItem { params, reply });

            if buffer.items.len() >= self.target_for(&buffer.sizing) {
                (Some(buffer.take()), None)
            } else {
                (None, opened.then_some(buffer.generation))
            }
        };

        if let Some((items, deadline)) = ready {
            self.spawn_dispatch(Arc::clone(endpoint), key, items, deadline);
        } else if let Some(generation) = schedule {
            self.spawn_timer(Arc::clone(endpoint), key, generation);
        }

        receiver
            .await
            .unwrap_or_else(|_| Err(UpstreamError::BatchAborted(format!("batch for {method} was dropped"))))
    }

    fn spawn_timer(self: &Arc<Self>, endpoint: Arc<Endpoint>, key: BatchKey, generation: u64) {
        let manager = Arc::clone(self);
        let wait = self.config.max_wait();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let taken = manager.buffers.get_mut(&key).and_then(|mut buffer| {
                (buffer.generation == generation && !buffer.items.is_empty()).then(|| buffer.take())
            });
            if let Some((items, deadline)) = taken {
                manager.dispatch(endpoint, key, items, deadline).await;
            }
        });
    }

    fn spawn_dispatch(
        self: &Arc<Self>,
        endpoint: Arc<Endpoint>,
        key: BatchKey,
        items: Vec<BatchItem>,
        deadline: Option<Instant>,
    ) {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.dispatch(endpoint, key, items, deadline).await });
    }

    async fn dispatch(&self, endpoint: Arc<Endpoint>, key: BatchKey, items: Vec<BatchItem>, deadline: Option<Instant>) {
        let size = items.len();
        let (calls, replies): (Vec<TransportCall>, Vec<_>) = items
            .into_iter()
            .map(|item| (TransportCall::new(key.method.as_str(), item.params), item.reply))
            .unzip();

        let started = Instant::now();
        let timeout = deadline.map_or(endpoint.config().timeout(), |deadline| {
            deadline.saturating_duration_since(started)
        });
        tracing::debug!(
            endpoint = %endpoint.name(),
            method = %key.method,
            size,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "dispatching batch"
        );
        self.metrics.record_batch(endpoint.name(), &key.method, size);

        let outcome = self.connection.execute_batch(&endpoint, &calls, timeout).await;
        if let Some(mut buffer) = self.buffers.get_mut(&key) {
            buffer.sizing.observe_service(started.elapsed());
        }

        match outcome {
            Ok(results) => {
                for (reply, result) in replies.into_iter().zip(results) {
                    // The caller may have given up; nothing to route to.
                    let _ = reply.send(result);
                }
            }
            Err(e) => {
                tracing::warn!(endpoint = %endpoint.name(), method = %key.method, size, error = %e, "batch failed");
                for reply in replies {
                    let _ = reply.send(Err(e.clone()));
                }
            }
        }
    }
}

impl std::fmt::Debug for BatchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchManager")
            .field("config", &self.config)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
