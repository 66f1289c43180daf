//! JSON-RPC 2.0 over HTTP transport.

use super::{Transport, TransportCall, TransportError};
use crate::types::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use std::{collections::HashMap, time::Duration};

const MAX_ERROR_BODY_LEN: usize = 256;

/// Connection pool settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 64,
            user_agent: concat!("bulwark/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// [`Transport`] speaking JSON-RPC 2.0 over HTTP POST.
///
/// Batches are sent as a JSON array; responses are matched back to calls by id, so servers
/// that reorder batch responses are handled.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`TransportError::Other`] if the underlying HTTP client cannot be built.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(&HttpTransportConfig::default())
    }

    /// # Errors
    ///
    /// Returns [`TransportError::Other`] if the underlying HTTP client cannot be built.
    pub fn with_config(config: &HttpTransportConfig) -> Result<Self, TransportError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .connect_timeout(config.connect_timeout)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.as_str())
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                TransportError::Other(format!("http client build failed: {e}"))
            })?;

        Ok(Self { client })
    }

    /// Maps a reqwest failure to a raw error without leaking addresses into messages.
    fn sanitize_network_error(error: &reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout
        } else if error.is_connect() {
            TransportError::Connect("connection refused or unreachable".to_string())
        } else if error.is_decode() || error.is_body() {
            TransportError::Decode("response body error".to_string())
        } else if error.is_redirect() {
            TransportError::Other("unexpected redirect".to_string())
        } else {
            TransportError::Other("network error".to_string())
        }
    }

    async fn post(&self, address: &str, body: Bytes, timeout: Duration) -> Result<Bytes, TransportError> {
        let response = self
            .client
            .post(address)
            .header("content-type", "application/json")
            .body(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::sanitize_network_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let raw_text = response.text().await.unwrap_or_default();
            let body = if raw_text.len() > MAX_ERROR_BODY_LEN {
                let cut = (0..=MAX_ERROR_BODY_LEN)
                    .rev()
                    .find(|i| raw_text.is_char_boundary(*i))
                    .unwrap_or(0);
                format!("{}... (truncated)", &raw_text[..cut])
            } else {
                raw_text
            };
            tracing::trace!(status = status.as_u16(), "http request failed");
            return Err(TransportError::Status { code: status.as_u16(), body });
        }

        response.bytes().await.map_err(|e| Self::sanitize_network_error(&e))
    }

    fn into_result(response: JsonRpcResponse) -> Result<Value, TransportError> {
        if let Some(error) = response.error {
            return Err(TransportError::Rpc { code: error.code, message: error.message });
        }
        response
            .result
            .ok_or_else(|| TransportError::Decode("response has neither result nor error".to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        address: &str,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let request = JsonRpcRequest::new(method, params.clone(), Value::from(1));
        let body = serde_json::to_vec(&request).map_err(|e| TransportError::Other(e.to_string()))?;

        let bytes = self.post(address, Bytes::from(body), timeout).await?;
        let response: JsonRpcResponse =
            serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))?;

        Self::into_result(response)
    }

    async fn execute_batch(
        &self,
        address: &str,
        calls: &[TransportCall],
        timeout: Duration,
    ) -> Result<Vec<Result<Value, TransportError>>, TransportError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let requests: Vec<JsonRpcRequest> = calls
            .iter()
            .enumerate()
            .map(|(index, call)| JsonRpcRequest::new(&call.method, call.params.clone(), Value::from(index)))
            .collect();
        let body = serde_json::to_vec(&requests).map_err(|e| TransportError::Other(e.to_string()))?;

        let bytes = self.post(address, Bytes::from(body), timeout).await?;
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))?;

        let responses: Vec<JsonRpcResponse> = match value {
            Value::Array(_) => {
                serde_json::from_value(value).map_err(|e| TransportError::Decode(e.to_string()))?
            }
            // Some servers answer a whole batch with a single error object.
            Value::Object(_) => {
                let response: JsonRpcResponse = serde_json::from_value(value)
                    .map_err(|e| TransportError::Decode(e.to_string()))?;
                return Err(Self::into_result(response).err().unwrap_or_else(|| {
                    TransportError::Decode("batch answered with a single result".to_string())
                }));
            }
            _ => return Err(TransportError::Decode("batch response is not an array".to_string())),
        };

        let mut by_id: HashMap<usize, JsonRpcResponse> = HashMap::with_capacity(responses.len());
        for response in responses {
            if let Some(id) = response.id.as_u64().and_then(|id| usize::try_from(id).ok()) {
                by_id.insert(id, response);
            }
        }

        Ok((0..calls.len())
            .map(|index| match by_id.remove(&index) {
                Some(response) => Self::into_result(response),
                None => Err(TransportError::Decode(format!("missing batch response for id {index}"))),
            })
            .collect())
    }
}
