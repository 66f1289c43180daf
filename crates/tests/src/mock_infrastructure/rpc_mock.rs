//! Mock JSON-RPC server.
//!
//! Wraps mockito to serve JSON-RPC 2.0 responses keyed by method name.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};

/// Builder for a mock JSON-RPC endpoint.
pub struct RpcMockBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

fn method_matcher(method: &str) -> Matcher {
    Matcher::Regex(format!(r#""method"\s*:\s*"{method}""#))
}

impl RpcMockBuilder {
    /// Creates a builder with a fresh mockito server.
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Answers every call to `method` with `result`.
    pub fn mock_result(&mut self, method: &str, result: Value) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string())
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers `method` with result `result` at most `hits` times, asserting on that count
    /// via [`assert_all`](Self::assert_all).
    pub fn mock_result_times(&mut self, method: &str, result: Value, hits: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string())
            .expect(hits)
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers `method` with a JSON-RPC error object.
    pub fn mock_rpc_error(&mut self, method: &str, code: i64, message: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": code, "message": message } })
                    .to_string(),
            )
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers every request with an HTTP error status.
    pub fn mock_http_error(&mut self, status: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .with_status(status)
            .with_body("upstream unavailable")
            .create();

        self.mocks.push(mock);
        self
    }

    /// Asserts every mock created with an expected hit count was hit exactly that often.
    pub fn assert_all(&self) {
        for mock in &self.mocks {
            mock.assert();
        }
    }
}
