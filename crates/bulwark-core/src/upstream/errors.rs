use crate::transport::TransportError;
use thiserror::Error;

/// Classification of JSON-RPC error codes returned by an endpoint.
///
/// - Client errors never penalize the endpoint
/// - Provider errors count against the circuit breaker and are retried elsewhere
/// - Rate limits are retried elsewhere without penalty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorCategory {
    /// Invalid request, method not found, invalid params.
    ClientError,
    /// Internal or server error on the endpoint's side.
    ProviderError,
    /// Limit exceeded (-32005) or equivalent "too many requests" messages.
    RateLimit,
    /// The endpoint could not parse what it was sent (-32700).
    ParseError,
}

impl RpcErrorCategory {
    /// Classifies a JSON-RPC error code and message.
    ///
    /// Within the -32000..=-32099 server range the message decides between rate limiting and a
    /// provider failure.
    #[must_use]
    pub fn from_code_and_message(code: i32, message: &str) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32602..=-32600 => Self::ClientError,
            -32005 => Self::RateLimit,
            -32099..=-32000 => {
                let message_lower = message.to_lowercase();
                if message_lower.contains("rate limit") ||
                    message_lower.contains("too many requests") ||
                    message_lower.contains("limit exceeded")
                {
                    Self::RateLimit
                } else {
                    Self::ProviderError
                }
            }
            _ => Self::ProviderError,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientError => "client_error",
            Self::ProviderError => "provider_error",
            Self::RateLimit => "rate_limit",
            Self::ParseError => "parse_error",
        }
    }
}

/// Classified failure of a call against a single endpoint.
///
/// Produced by the connection core from raw [`TransportError`]s and by the per-endpoint guards
/// (breaker, concurrency). All variants are cheap to clone so one outcome can be delivered to
/// every coalesced caller.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum UpstreamError {
    /// The call did not complete within its timeout.
    #[error("request timeout")]
    Timeout,

    /// Connection refused or endpoint unreachable.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Response could not be decoded or violated the protocol.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The endpoint itself throttled the call (HTTP 429, RPC -32005).
    #[error("rate limited by endpoint: {0}")]
    RateLimited(String),

    /// 5xx-equivalent failure on the endpoint.
    #[error("server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// 4xx-equivalent failure caused by the request itself. Never retried.
    #[error("client error ({status}): {message}")]
    ClientError { status: u16, message: String },

    /// JSON-RPC error object that is neither a client error nor a rate limit.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// The endpoint's circuit breaker rejected the call without executing it.
    #[error("circuit breaker open for {0}")]
    CircuitBreakerOpen(String),

    /// The endpoint's concurrency limit is exhausted.
    #[error("concurrency limit reached for {0}")]
    ConcurrencyLimit(String),

    /// A combined batch call was abandoned before producing this caller's result.
    #[error("batch aborted: {0}")]
    BatchAborted(String),
}

impl UpstreamError {
    /// Classifies a raw transport failure.
    #[must_use]
    pub fn classify(error: TransportError) -> Self {
        match error {
            TransportError::Timeout => Self::Timeout,
            TransportError::Connect(message) => Self::ConnectionFailed(message),
            TransportError::Decode(message) => Self::MalformedResponse(message),
            TransportError::Status { code: 429, body } => Self::RateLimited(body),
            TransportError::Status { code, body } if (500..=599).contains(&code) => {
                Self::ServerError { status: code, message: body }
            }
            TransportError::Status { code, body } if (400..=499).contains(&code) => {
                Self::ClientError { status: code, message: body }
            }
            TransportError::Status { code, body } => {
                Self::MalformedResponse(format!("unexpected status {code}: {body}"))
            }
            TransportError::Rpc { code, message } => {
                match RpcErrorCategory::from_code_and_message(code, &message) {
                    RpcErrorCategory::ClientError => Self::ClientError { status: 400, message },
                    RpcErrorCategory::RateLimit => Self::RateLimited(message),
                    RpcErrorCategory::ParseError | RpcErrorCategory::ProviderError => {
                        Self::Rpc { code, message }
                    }
                }
            }
            TransportError::Other(message) => Self::ConnectionFailed(message),
        }
    }

    /// Returns `true` if the same call may succeed on another attempt or endpoint.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout |
            Self::ConnectionFailed(_) |
            Self::RateLimited(_) |
            Self::ServerError { .. } |
            Self::Rpc { .. } |
            Self::CircuitBreakerOpen(_) |
            Self::ConcurrencyLimit(_) |
            Self::BatchAborted(_) => true,
            Self::MalformedResponse(_) | Self::ClientError { .. } => false,
        }
    }

    /// Returns `true` if this outcome counts as a failure of the endpoint for circuit breaking.
    ///
    /// Client errors and remote throttling mean the endpoint answered; rejections by local
    /// guards never reached it.
    #[must_use]
    pub fn should_trip_breaker(&self) -> bool {
        match self {
            Self::Timeout |
            Self::ConnectionFailed(_) |
            Self::MalformedResponse(_) |
            Self::ServerError { .. } => true,
            Self::Rpc { code, message } => matches!(
                RpcErrorCategory::from_code_and_message(*code, message),
                RpcErrorCategory::ProviderError | RpcErrorCategory::ParseError
            ),
            Self::RateLimited(_) |
            Self::ClientError { .. } |
            Self::CircuitBreakerOpen(_) |
            Self::ConcurrencyLimit(_) |
            Self::BatchAborted(_) => false,
        }
    }

    /// Static label for metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::MalformedResponse(_) => "malformed_response",
            Self::RateLimited(_) => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::ClientError { .. } => "client_error",
            Self::Rpc { .. } => "rpc_error",
            Self::CircuitBreakerOpen(_) => "circuit_open",
            Self::ConcurrencyLimit(_) => "concurrency_limit",
            Self::BatchAborted(_) => "batch_aborted",
        }
    }
}

impl From<TransportError> for UpstreamError {
    fn from(error: TransportError) -> Self {
        Self::classify(error)
    }
}
