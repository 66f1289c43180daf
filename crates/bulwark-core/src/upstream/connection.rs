use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::time::Instant;

use crate::{
    metrics::MetricsCollector,
    transport::{Transport, TransportCall},
    upstream::{
        endpoint::{Endpoint, EndpointLease, InFlightGuard},
        errors::UpstreamError,
    },
};

/// Executes calls against one endpoint through the [`Transport`].
///
/// Every execution holds a concurrency slot for its whole duration, is bounded by a timeout,
/// has its failure classified into an [`UpstreamError`] and leaves a latency sample behind
/// when the endpoint actually answered.
pub struct ConnectionCore {
    transport: Arc<dyn Transport>,
    metrics: MetricsCollector,
}

/// Whether a result carries a useful latency sample: the endpoint answered in some form.
fn answered<T>(result: &Result<T, UpstreamError>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => !matches!(
            e,
            UpstreamError::Timeout |
                UpstreamError::ConnectionFailed(_) |
                UpstreamError::CircuitBreakerOpen(_) |
                UpstreamError::ConcurrencyLimit(_) |
                UpstreamError::BatchAborted(_)
        ),
    }
}

impl ConnectionCore {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, metrics: MetricsCollector) -> Self {
        Self { transport, metrics }
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Executes one call, taking a concurrency slot first.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::ConcurrencyLimit`] when the endpoint is at its limit, otherwise
    /// the classified outcome of the call.
    pub async fn execute(
        &self,
        endpoint: &Endpoint,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        let slot = endpoint
            .try_acquire_slot()
            .ok_or_else(|| UpstreamError::ConcurrencyLimit(endpoint.name().to_string()))?;
        self.execute_with_slot(endpoint, slot, method, params, timeout).await
    }

    /// Executes one call under an already-held slot. The slot is released on return.
    ///
    /// # Errors
    ///
    /// Returns the classified outcome of the call.
    pub async fn execute_with_slot(
        &self,
        endpoint: &Endpoint,
        slot: InFlightGuard,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(
            timeout,
            self.transport.execute(endpoint.address(), method, params, timeout),
        )
        .await
        {
            Ok(result) => result.map_err(UpstreamError::classify),
            Err(_elapsed) => Err(UpstreamError::Timeout),
        };
        drop(slot);

        self.observe(endpoint, method, &result, started.elapsed());
        result
    }

    /// Executes a leased call and reports its outcome to the endpoint's circuit breaker.
    ///
    /// # Errors
    ///
    /// Returns the classified outcome of the call.
    pub async fn execute_leased(
        &self,
        lease: EndpointLease,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        let EndpointLease { endpoint, permit, slot } = lease;
        let result = self.execute_with_slot(&endpoint, slot, method, params, timeout).await;
        permit.record(&result);
        result
    }

    /// Executes several calls as one combined request. Waits for a concurrency slot, since
    /// the callers of a batch already passed admission individually.
    ///
    /// Results come back in call order. A failure of the combined request itself is returned
    /// as the outer error.
    ///
    /// # Errors
    ///
    /// Returns the classified failure of the combined request.
    pub async fn execute_batch(
        &self,
        endpoint: &Endpoint,
        calls: &[TransportCall],
        timeout: Duration,
    ) -> Result<Vec<Result<Value, UpstreamError>>, UpstreamError> {
        let started = Instant::now();
        let slot = tokio::time::timeout(timeout, endpoint.acquire_slot())
            .await
            .map_err(|_| UpstreamError::ConcurrencyLimit(endpoint.name().to_string()))??;

        let remaining = timeout.saturating_sub(started.elapsed());
        let outcome = match tokio::time::timeout(
            remaining,
            self.transport.execute_batch(endpoint.address(), calls, remaining),
        )
        .await
        {
            Ok(Ok(results)) if results.len() == calls.len() => Ok(results
                .into_iter()
                .map(|result| result.map_err(UpstreamError::classify))
                .collect::<Vec<_>>()),
            Ok(Ok(results)) => Err(UpstreamError::MalformedResponse(format!(
                "batch returned {} results for {} calls",
                results.len(),
                calls.len()
            ))),
            Ok(Err(e)) => Err(UpstreamError::classify(e)),
            Err(_elapsed) => Err(UpstreamError::Timeout),
        };
        drop(slot);

        let elapsed = started.elapsed();
        match &outcome {
            Ok(results) => {
                endpoint.latency().record(elapsed);
                for (call, result) in calls.iter().zip(results) {
                    endpoint.record_outcome(result.is_ok());
                    self.metrics.record_upstream(
                        endpoint.name(),
                        &call.method,
                        result.as_ref().map(|_| ()),
                        elapsed,
                    );
                }
            }
            Err(e) => {
                let method = calls.first().map_or("batch", |call| call.method.as_str());
                self.observe::<()>(endpoint, method, &Err(e.clone()), elapsed);
            }
        }
        outcome
    }

    fn observe<T>(
        &self,
        endpoint: &Endpoint,
        method: &str,
        result: &Result<T, UpstreamError>,
        elapsed: Duration,
    ) {
        if answered(result) {
            endpoint.latency().record(elapsed);
        }
        endpoint.record_outcome(result.is_ok());
        self.metrics.record_upstream(endpoint.name(), method, result.as_ref().map(|_| ()), elapsed);

        if let Err(e) = result {
            tracing::debug!(
                endpoint = %endpoint.name(),
                method = %method,
                error = %e,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "upstream call failed"
            );
        }
    }
}

impl std::fmt::Debug for ConnectionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCore").finish_non_exhaustive()
    }
}
