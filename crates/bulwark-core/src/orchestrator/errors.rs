use std::sync::Arc;

use thiserror::Error;

use crate::{orchestrator::queue::QueueSnapshot, upstream::errors::UpstreamError};

/// Error returned to callers of [`crate::orchestrator::Orchestrator::call`].
///
/// Policy errors (rate limit, backpressure, validation, deadline) surface immediately and are
/// never retried or cached. Upstream failures are retried on other endpoints while attempts
/// and deadline remain, and only the final failure is returned.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CallError {
    #[error("rate limit exceeded for {endpoint}")]
    RateLimitExceeded { endpoint: Arc<str> },

    #[error("circuit breaker open for {0}")]
    CircuitOpen(Arc<str>),

    #[error("no endpoint available")]
    AllEndpointsUnavailable,

    #[error("queue full for {}: {} of {} slots used", .0.endpoint, .0.depth, .0.capacity)]
    Backpressure(QueueSnapshot),

    #[error("deadline exceeded after {waited_ms}ms queued on {endpoint}")]
    DeadlineExceeded { endpoint: Arc<str>, waited_ms: u64 },

    #[error("request timed out")]
    RequestTimeout,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("upstream server error ({status}): {message}")]
    UpstreamServerError { status: u16, message: String },

    #[error("invalid request: {0}")]
    Validation(String),

    /// Classified upstream failure without a dedicated variant: client errors, remote
    /// throttling, connection failures, RPC error objects.
    #[error(transparent)]
    Upstream(UpstreamError),

    #[error("client is shutting down")]
    ShuttingDown,
}

impl CallError {
    /// `true` for errors produced by local policy rather than by an endpoint. These are never
    /// retried and never cached.
    #[must_use]
    pub fn is_policy_error(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded { .. } |
                Self::CircuitOpen(_) |
                Self::AllEndpointsUnavailable |
                Self::Backpressure(_) |
                Self::DeadlineExceeded { .. } |
                Self::Validation(_) |
                Self::ShuttingDown
        )
    }

    /// Static label for metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::CircuitOpen(_) => "circuit_open",
            Self::AllEndpointsUnavailable => "all_endpoints_unavailable",
            Self::Backpressure(_) => "backpressure",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::RequestTimeout => "request_timeout",
            Self::MalformedResponse(_) => "malformed_response",
            Self::UpstreamServerError { .. } => "upstream_server_error",
            Self::Validation(_) => "validation",
            Self::Upstream(e) => e.as_str(),
            Self::ShuttingDown => "shutting_down",
        }
    }
}

impl From<UpstreamError> for CallError {
    fn from(error: UpstreamError) -> Self {
        match error {
            UpstreamError::Timeout => Self::RequestTimeout,
            UpstreamError::MalformedResponse(message) => Self::MalformedResponse(message),
            UpstreamError::ServerError { status, message } => {
                Self::UpstreamServerError { status, message }
            }
            UpstreamError::CircuitBreakerOpen(endpoint) => Self::CircuitOpen(Arc::from(endpoint)),
            other => Self::Upstream(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_mapping() {
        assert_eq!(CallError::from(UpstreamError::Timeout), CallError::RequestTimeout);
        assert_eq!(
            CallError::from(UpstreamError::ServerError { status: 503, message: "busy".into() }),
            CallError::UpstreamServerError { status: 503, message: "busy".into() }
        );
        assert_eq!(
            CallError::from(UpstreamError::CircuitBreakerOpen("a".into())),
            CallError::CircuitOpen(Arc::from("a"))
        );
        assert!(matches!(
            CallError::from(UpstreamError::ClientError { status: 400, message: String::new() }),
            CallError::Upstream(UpstreamError::ClientError { .. })
        ));
    }

    #[test]
    fn test_policy_errors() {
        assert!(CallError::Validation("x".into()).is_policy_error());
        assert!(CallError::AllEndpointsUnavailable.is_policy_error());
        assert!(CallError::RateLimitExceeded { endpoint: Arc::from("a") }.is_policy_error());
        assert!(!CallError::RequestTimeout.is_policy_error());
        assert!(!CallError::Upstream(UpstreamError::RateLimited("x".into())).is_policy_error());
    }

    #[test]
    fn test_backpressure_message_carries_queue_state() {
        let error = CallError::Backpressure(QueueSnapshot {
            endpoint: Arc::from("alpha"),
            depth: 3,
            capacity: 3,
            oldest_wait_ms: 12,
            highest_priority: None,
        });
        assert_eq!(error.to_string(), "queue full for alpha: 3 of 3 slots used");
        assert_eq!(error.as_str(), "backpressure");
    }
}
