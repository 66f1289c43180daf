use std::{
    future::Future,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use ahash::AHashMap;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::{
    cache::{CacheConfig, RequestKey},
    metrics::{CacheOutcome, MetricsCollector},
    orchestrator::errors::CallError,
};

type CallResult = Result<Value, CallError>;
type SharedCall = Shared<BoxFuture<'static, CallResult>>;

struct Inflight {
    id: u64,
    future: SharedCall,
}

struct Completed {
    result: CallResult,
    expires_at: Instant,
}

struct CacheState {
    inflight: AHashMap<RequestKey, Inflight>,
    completed: LruCache<RequestKey, Completed>,
    next_id: u64,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

/// Lookup counters and current occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub entries: usize,
    pub inflight: usize,
}

/// Shares one execution between identical concurrent calls and keeps completed results for
/// a short TTL.
///
/// The computation runs on its own task, so it completes and populates the cache even if
/// every caller waiting on it is dropped.
pub struct RequestCoalescer {
    config: CacheConfig,
    state: Arc<Mutex<CacheState>>,
    counters: CacheCounters,
    metrics: MetricsCollector,
}

impl RequestCoalescer {
    #[must_use]
    pub fn new(config: CacheConfig, metrics: MetricsCollector) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            state: Arc::new(Mutex::new(CacheState {
                inflight: AHashMap::new(),
                completed: LruCache::new(capacity),
                next_id: 0,
            })),
            counters: CacheCounters::default(),
            metrics,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the cached or in-flight result for `key`, or runs `compute` and shares its
    /// result with every identical call that arrives before it completes.
    ///
    /// # Errors
    ///
    /// Returns the shared outcome of the computation, which may be a cached failure when
    /// failure caching is enabled.
    pub async fn get_or_compute<F, Fut>(&self, key: RequestKey, compute: F) -> CallResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        if !self.config.enabled {
            return compute().await;
        }

        let now = Instant::now();
        let shared = {
            let mut state = self.state.lock();

            let cached =
                state.completed.get(&key).map(|entry| (entry.expires_at > now).then(|| entry.result.clone()));
            match cached {
                Some(Some(result)) => {
                    drop(state);
                    self.record(CacheOutcome::Hit);
                    tracing::trace!(method = %key.method(), "cache hit");
                    return result;
                }
                Some(None) => {
                    state.completed.pop(&key);
                }
                None => {}
            }

            if let Some(inflight) = state.inflight.get(&key) {
                let future = inflight.future.clone();
                drop(state);
                self.record(CacheOutcome::Coalesced);
                future
            } else {
                let id = state.next_id;
                state.next_id += 1;

                let driver = Self::driver(Arc::clone(&self.state), self.config.clone(), key.clone(), id, compute());
                state.inflight.insert(key, Inflight { id, future: driver.clone() });
                drop(state);

                self.record(CacheOutcome::Miss);
                tokio::spawn(driver.clone());
                driver
            }
        };

        shared.await
    }

    fn driver<Fut>(
        state: Arc<Mutex<CacheState>>,
        config: CacheConfig,
        key: RequestKey,
        id: u64,
        compute: Fut,
    ) -> SharedCall
    where
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        async move {
            let result = compute.await;
            let mut state = state.lock();
            if state.inflight.get(&key).is_some_and(|inflight| inflight.id == id) {
                state.inflight.remove(&key);
            }
            if let Some(ttl) = Self::ttl_for(&config, &result) {
                state.completed.put(key, Completed { result: result.clone(), expires_at: Instant::now() + ttl });
            }
            result
        }
        .boxed()
        .shared()
    }

    fn ttl_for(config: &CacheConfig, result: &CallResult) -> Option<Duration> {
        let ttl_ms = match result {
            Ok(_) => config.ttl_ms,
            Err(e) if config.cache_failures && !e.is_policy_error() => config.failure_ttl_ms,
            Err(_) => 0,
        };
        (ttl_ms > 0).then(|| Duration::from_millis(ttl_ms))
    }

    fn record(&self, outcome: CacheOutcome) {
        let counter = match outcome {
            CacheOutcome::Hit => &self.counters.hits,
            CacheOutcome::Miss => &self.counters.misses,
            CacheOutcome::Coalesced => &self.counters.coalesced,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_cache(outcome);
    }

    /// Drops completed entries whose TTL has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired: Vec<RequestKey> = state
            .completed
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.completed.pop(key);
        }
        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), "purged expired cache entries");
        }
        expired.len()
    }

    /// Forgets a completed result. An in-flight computation for the key is unaffected.
    pub fn invalidate(&self, key: &RequestKey) -> bool {
        self.state.lock().completed.pop(key).is_some()
    }

    pub fn clear(&self) {
        self.state.lock().completed.clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            entries: state.completed.len(),
            inflight: state.inflight.len(),
        }
    }
}

impl std::fmt::Debug for RequestCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoalescer").field("config", &self.config).field("stats", &self.stats()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{types::ConsistencyLevel, upstream::errors::UpstreamError};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn key(params: Value) -> RequestKey {
        RequestKey::new("getBalance", &params, ConsistencyLevel::Confirmed)
    }

    fn coalescer(config: CacheConfig) -> Arc<RequestCoalescer> {
        Arc::new(RequestCoalescer::new(config, MetricsCollector::disabled()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_identical_calls_execute_once() {
        let cache = coalescer(CacheConfig::default());
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = Arc::clone(&cache);
            let executions = Arc::clone(&executions);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(key(json!(["abc"])), move || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(json!(42))
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(json!(42)));
        }

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.coalesced + stats.hits, 49);
        assert_eq!(stats.inflight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_served_until_ttl_expires() {
        let cache = coalescer(CacheConfig { ttl_ms: 100, ..CacheConfig::default() });
        let executions = Arc::new(AtomicUsize::new(0));

        let run = |cache: Arc<RequestCoalescer>, executions: Arc<AtomicUsize>| async move {
            cache
                .get_or_compute(key(json!([1])), move || async move {
                    Ok(json!(executions.fetch_add(1, Ordering::SeqCst)))
                })
                .await
        };

        assert_eq!(run(cache.clone(), executions.clone()).await, Ok(json!(0)));
        tokio::time::advance(Duration::from_millis(99)).await;
        assert_eq!(run(cache.clone(), executions.clone()).await, Ok(json!(0)));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(run(cache.clone(), executions.clone()).await, Ok(json!(1)));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_coalesces_without_caching() {
        let cache = coalescer(CacheConfig { ttl_ms: 0, ..CacheConfig::default() });
        let executions = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let executions = executions.clone();
            cache
                .get_or_compute(key(json!([])), move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                })
                .await
                .unwrap();
        }
        assert_eq!(executions.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_not_cached_by_default() {
        let cache = coalescer(CacheConfig::default());
        let executions = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let executions = executions.clone();
            let result = cache
                .get_or_compute(key(json!(["x"])), move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::RequestTimeout)
                })
                .await;
            assert_eq!(result, Err(CallError::RequestTimeout));
        }
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_failures_cached_when_enabled() {
        let cache = coalescer(CacheConfig { cache_failures: true, failure_ttl_ms: 50, ..CacheConfig::default() });
        let executions = Arc::new(AtomicUsize::new(0));
        let failure = CallError::Upstream(UpstreamError::ClientError { status: 400, message: "bad".into() });

        for _ in 0..2 {
            let executions = executions.clone();
            let failure = failure.clone();
            let result = cache
                .get_or_compute(key(json!(["y"])), move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Err(failure)
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(cache.purge_expired(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_failures_never_cached() {
        let cache = coalescer(CacheConfig { cache_failures: true, ..CacheConfig::default() });
        let executions = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let executions = executions.clone();
            let _ = cache
                .get_or_compute(key(json!(["z"])), move || async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::RateLimitExceeded { endpoint: Arc::from("a") })
                })
                .await;
        }
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction() {
        let cache = coalescer(CacheConfig { max_entries: 2, ..CacheConfig::default() });
        for i in 0..3 {
            cache.get_or_compute(key(json!([i])), move || async move { Ok(json!(i)) }).await.unwrap();
        }
        assert_eq!(cache.stats().entries, 2);
        assert!(!cache.invalidate(&key(json!([0]))));
        assert!(cache.invalidate(&key(json!([2]))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_computation_survives_dropped_caller() {
        let cache = coalescer(CacheConfig::default());
        let executions = Arc::new(AtomicUsize::new(0));

        let counted = executions.clone();
        let caller = tokio::spawn({
            let cache = cache.clone();
            async move {
                cache
                    .get_or_compute(key(json!(["slow"])), move || async move {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        counted.fetch_add(1, Ordering::SeqCst);
                        Ok(json!("done"))
                    })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        caller.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(executions.load(Ordering::SeqCst), 1);

        let result = cache.get_or_compute(key(json!(["slow"])), || async { Ok(json!("recomputed")) }).await;
        assert_eq!(result, Ok(json!("done")));
    }

    #[tokio::test]
    async fn test_disabled_bypasses() {
        let cache = coalescer(CacheConfig { enabled: false, ..CacheConfig::default() });
        cache.get_or_compute(key(json!([])), || async { Ok(json!(1)) }).await.unwrap();
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
