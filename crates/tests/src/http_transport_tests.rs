//! End-to-end tests of the default HTTP transport against mock JSON-RPC servers.
//!
//! These run on real time: mockito serves over a local socket.

use crate::mock_infrastructure::RpcMockBuilder;
use bulwark_core::{
    config::{BulwarkConfig, EndpointConfig},
    upstream::UpstreamError,
    BulwarkRuntime, CallError, CallOptions,
};
use serde_json::json;

fn config_for(endpoints: &[(&str, String)]) -> BulwarkConfig {
    let mut config = BulwarkConfig::default();
    config.endpoints =
        endpoints.iter().map(|(name, url)| EndpointConfig::new(*name, url.clone())).collect();
    config.cache.enabled = false;
    config
}

#[tokio::test]
async fn test_call_over_http() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_result_times("getSlot", json!(4242), 1);
    let runtime = BulwarkRuntime::builder().with_config(config_for(&[("primary", mock.url())])).build().unwrap();

    let value = runtime.call("getSlot", json!([]), CallOptions::new()).await.unwrap();
    assert_eq!(value, json!(4242));
    mock.assert_all();
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_rpc_error_over_http() {
    let mut mock = RpcMockBuilder::new().await;
    mock.mock_rpc_error("getBalance", -32602, "invalid params");
    let runtime = BulwarkRuntime::builder().with_config(config_for(&[("primary", mock.url())])).build().unwrap();

    let result = runtime.call("getBalance", json!(["nope"]), CallOptions::new()).await;
    assert!(matches!(result, Err(CallError::Upstream(UpstreamError::ClientError { status: 400, .. }))));
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_failover_from_http_503() {
    let mut broken = RpcMockBuilder::new().await;
    broken.mock_http_error(503);
    let mut healthy = RpcMockBuilder::new().await;
    healthy.mock_result("getSlot", json!(7));

    let mut config = config_for(&[("broken", broken.url()), ("healthy", healthy.url())]);
    config.endpoints[0].weight = 10;
    let runtime = BulwarkRuntime::builder().with_config(config).build().unwrap();

    let value = runtime.call("getSlot", json!([]), CallOptions::new()).await.unwrap();
    assert_eq!(value, json!(7));
    let broken_stats = runtime.stats().into_iter().find(|stats| stats.name.as_ref() == "broken").unwrap();
    assert_eq!(broken_stats.consecutive_failures, 1);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    let mut config = config_for(&[("dead", "http://127.0.0.1:1".to_string())]);
    config.retry.max_attempts = 1;
    let runtime = BulwarkRuntime::builder().with_config(config).build().unwrap();

    let result = runtime.call("getSlot", json!([]), CallOptions::new()).await;
    assert!(matches!(result, Err(CallError::Upstream(UpstreamError::ConnectionFailed(_)))));
    runtime.shutdown().await;
}
