//! Wire transport boundary.
//!
//! The pipeline only depends on the narrow [`Transport`] contract: execute one call (or an
//! ordered list of calls) against an endpoint address within a timeout. Failures are reported
//! raw as [`TransportError`]; classification into retry/breaker categories happens in
//! [`crate::upstream::connection`].

pub mod http;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub use http::{HttpTransport, HttpTransportConfig};

/// Raw failure reported by a transport.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TransportError {
    /// The remote did not answer within the allotted time.
    #[error("transport timeout")]
    Timeout,

    /// Connection refused, DNS failure, TLS failure, reset.
    #[error("connect error: {0}")]
    Connect(String),

    /// Non-success status from the remote (HTTP status or equivalent).
    #[error("status {code}: {body}")]
    Status { code: u16, body: String },

    /// Protocol-level error object returned by the remote.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// Response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// One call inside a combined (batched) transport request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportCall {
    pub method: String,
    pub params: Value,
}

impl TransportCall {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self { method: method.into(), params }
    }
}

/// Executes raw calls against a remote endpoint.
///
/// Implementations must be cheap to share (`Arc<dyn Transport>`) and cancel-safe: dropping a
/// returned future abandons the call.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Executes a single call.
    ///
    /// # Errors
    ///
    /// Returns a raw [`TransportError`] describing why the call failed.
    async fn execute(
        &self,
        address: &str,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, TransportError>;

    /// Executes an ordered list of calls as one combined request.
    ///
    /// The returned vector has one entry per call, in call order. The outer error means the
    /// combined request failed as a whole.
    ///
    /// The default implementation issues the calls concurrently through [`Transport::execute`].
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the combined request failed as a whole.
    async fn execute_batch(
        &self,
        address: &str,
        calls: &[TransportCall],
        timeout: Duration,
    ) -> Result<Vec<Result<Value, TransportError>>, TransportError> {
        let futures =
            calls.iter().map(|call| self.execute(address, &call.method, &call.params, timeout));
        Ok(join_all(futures).await)
    }
}
