//! Integration tests for micro-batching through the orchestrator.

use crate::mock_infrastructure::{config_with, harness};
use bulwark_core::{
    config::BulwarkConfig, testing::ScriptedTransport, transport::TransportError,
    upstream::UpstreamError, CallError, CallOptions,
};
use futures::future::join_all;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

fn batch_config() -> BulwarkConfig {
    let mut config = config_with(&["a"]);
    config.cache.enabled = false;
    config.methods.batchable = vec!["getAccountInfo".to_string(), "getBalance".to_string()];
    config.batch.adaptive = false;
    config.batch.max_batch_size = 20;
    config.batch.max_wait_ms = 5;
    config
}

#[tokio::test(start_paused = true)]
async fn test_partial_batch_flushes_after_max_wait() {
    let transport = ScriptedTransport::new();
    let h = harness(&batch_config(), &transport);

    let started = Instant::now();
    let calls = (0..5).map(|i| h.orchestrator.call("getAccountInfo", json!([i]), CallOptions::new()));
    let results = join_all(calls).await;

    assert_eq!(started.elapsed(), Duration::from_millis(5));
    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap()["params"], json!([i]));
    }
    assert_eq!(transport.batches("a"), 1);
    assert_eq!(transport.calls("a"), 5);
}

#[tokio::test(start_paused = true)]
async fn test_full_batches_flush_immediately() {
    let transport = ScriptedTransport::new();
    let mut config = batch_config();
    config.batch.max_batch_size = 3;
    let h = harness(&config, &transport);

    let calls = (0..7).map(|i| h.orchestrator.call("getAccountInfo", json!([i]), CallOptions::new()));
    let results = join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(transport.batches("a"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_item_failure_reaches_only_its_caller() {
    let transport = ScriptedTransport::new();
    transport.push("a", Duration::ZERO, Ok(json!("first")));
    transport.push(
        "a",
        Duration::ZERO,
        Err(TransportError::Rpc { code: -32602, message: "invalid params".into() }),
    );
    transport.push("a", Duration::ZERO, Ok(json!("third")));
    let h = harness(&batch_config(), &transport);

    let calls = (0..3).map(|i| h.orchestrator.call("getAccountInfo", json!([i]), CallOptions::new()));
    let results = join_all(calls).await;

    assert_eq!(results[0], Ok(json!("first")));
    assert!(matches!(
        results[1],
        Err(CallError::Upstream(UpstreamError::ClientError { status: 400, .. }))
    ));
    assert_eq!(results[2], Ok(json!("third")));
    assert_eq!(transport.batches("a"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_methods_batched_separately() {
    let transport = ScriptedTransport::new();
    let h = harness(&batch_config(), &transport);

    let accounts = (0..2).map(|i| h.orchestrator.call("getAccountInfo", json!([i]), CallOptions::new()));
    let balances = (0..2).map(|i| h.orchestrator.call("getBalance", json!([i]), CallOptions::new()));
    let (accounts, balances) = tokio::join!(join_all(accounts), join_all(balances));

    assert!(accounts.iter().chain(balances.iter()).all(Result::is_ok));
    assert_eq!(transport.batches("a"), 2);
    assert_eq!(transport.methods("a").len(), 4);
}
