//! Integration tests for the request cache and coalescer.

use crate::mock_infrastructure::{config_with, harness};
use bulwark_core::{testing::ScriptedTransport, CallOptions, ConsistencyLevel};
use futures::future::join_all;
use serde_json::json;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_fifty_identical_calls_execute_once() {
    let transport = ScriptedTransport::new().with_latency("a", Duration::from_millis(40));
    let h = harness(&config_with(&["a"]), &transport);

    let calls = (0..50).map(|_| h.orchestrator.call("getBalance", json!(["acct"]), CallOptions::new()));
    let results = join_all(calls).await;

    let first = results[0].clone().unwrap();
    assert!(results.iter().all(|result| result.as_ref() == Ok(&first)));
    assert_eq!(transport.calls("a"), 1);

    let stats = h.orchestrator.coalescer().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.coalesced, 49);
    assert_eq!(stats.inflight, 0);
    assert_eq!(stats.entries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_result_served_until_ttl_expires() {
    let transport = ScriptedTransport::new();
    let mut config = config_with(&["a"]);
    config.cache.ttl_ms = 500;
    let h = harness(&config, &transport);

    h.orchestrator.call("getBalance", json!(["acct"]), CallOptions::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(499)).await;
    h.orchestrator.call("getBalance", json!(["acct"]), CallOptions::new()).await.unwrap();
    assert_eq!(transport.calls("a"), 1);
    assert_eq!(h.orchestrator.coalescer().stats().hits, 1);

    tokio::time::sleep(Duration::from_millis(2)).await;
    h.orchestrator.call("getBalance", json!(["acct"]), CallOptions::new()).await.unwrap();
    assert_eq!(transport.calls("a"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_consistency_is_part_of_the_key() {
    let transport = ScriptedTransport::new();
    let h = harness(&config_with(&["a"]), &transport);

    for consistency in [ConsistencyLevel::Processed, ConsistencyLevel::Confirmed, ConsistencyLevel::Finalized] {
        h.orchestrator
            .call("getBalance", json!(["acct"]), CallOptions::new().with_consistency(consistency))
            .await
            .unwrap();
    }
    assert_eq!(transport.calls("a"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_param_key_order_does_not_split_cache() {
    let transport = ScriptedTransport::new();
    let h = harness(&config_with(&["a"]), &transport);

    h.orchestrator
        .call("getAccountInfo", json!(["acct", {"encoding": "base64", "dataSlice": 1}]), CallOptions::new())
        .await
        .unwrap();
    h.orchestrator
        .call("getAccountInfo", json!(["acct", {"dataSlice": 1, "encoding": "base64"}]), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(transport.calls("a"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_idempotent_calls_never_coalesced() {
    let transport = ScriptedTransport::new().with_latency("a", Duration::from_millis(10));
    let mut config = config_with(&["a"]);
    config.methods.non_idempotent = vec!["sendTransaction".to_string()];
    let h = harness(&config, &transport);

    let calls = (0..5).map(|_| h.orchestrator.call("sendTransaction", json!(["tx"]), CallOptions::new()));
    let results = join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(transport.calls("a"), 5);
    assert_eq!(h.orchestrator.coalescer().stats().entries, 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_forces_refetch() {
    let transport = ScriptedTransport::new();
    let h = harness(&config_with(&["a"]), &transport);

    h.orchestrator.call("getBalance", json!(["acct"]), CallOptions::new()).await.unwrap();
    h.orchestrator.coalescer().clear();
    h.orchestrator.call("getBalance", json!(["acct"]), CallOptions::new()).await.unwrap();
    assert_eq!(transport.calls("a"), 2);
}
