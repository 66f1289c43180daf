//! Integration tests for the orchestrator through its public API.
//!
//! Covers failover across endpoints, breaker recovery through a half-open probe, error
//! mapping and endpoint statistics.

use crate::mock_infrastructure::{config_with, drain_event_names, harness};
use bulwark_core::{
    testing::ScriptedTransport, transport::TransportError, upstream::UpstreamError, CallError,
    CallOptions,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};

#[tokio::test(start_paused = true)]
async fn test_deactivated_endpoint_receives_no_traffic() {
    let transport = ScriptedTransport::new();
    let mut config = config_with(&["a", "b"]);
    config.cache.enabled = false;
    let h = harness(&config, &transport);

    h.orchestrator.registry().deactivate("a");
    for i in 0..4 {
        let value = h.orchestrator.call("getSlot", json!([i]), CallOptions::new()).await.unwrap();
        assert_eq!(value["endpoint"], "b");
    }
    assert_eq!(transport.calls("a"), 0);

    h.orchestrator.registry().activate("a");
    for i in 0..4 {
        h.orchestrator.call("getSlot", json!([i]), CallOptions::new()).await.unwrap();
    }
    assert!(transport.calls("a") > 0, "reactivated endpoint should serve calls again");
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_through_half_open_probe() {
    let transport = ScriptedTransport::new();
    transport.push("a", Duration::ZERO, Err(TransportError::Connect("refused".into())));
    transport.push("a", Duration::ZERO, Err(TransportError::Connect("refused".into())));
    let mut config = config_with(&["a"]);
    config.circuit_breaker.failure_threshold = 2;
    config.circuit_breaker.cooldown_ms = 1_000;
    config.retry.max_attempts = 1;
    config.cache.enabled = false;
    let mut h = harness(&config, &transport);

    for _ in 0..2 {
        let result = h.orchestrator.call("getSlot", json!([]), CallOptions::new()).await;
        assert!(matches!(result, Err(CallError::Upstream(UpstreamError::ConnectionFailed(_)))));
    }
    let rejected = h.orchestrator.call("getSlot", json!([]), CallOptions::new()).await;
    assert_eq!(rejected, Err(CallError::CircuitOpen(Arc::from("a"))));

    tokio::time::sleep(Duration::from_millis(1_001)).await;
    let probe = h.orchestrator.call("getSlot", json!([]), CallOptions::new()).await;
    assert!(probe.is_ok());

    assert_eq!(
        drain_event_names(&mut h.events),
        vec!["circuit_opened", "circuit_half_opened", "circuit_closed"]
    );
    assert_eq!(h.orchestrator.stats()[0].breaker_state, "closed");
    assert_eq!(transport.calls("a"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failover_after_timeout() {
    let transport = ScriptedTransport::new().with_latency("slow", Duration::from_secs(30));
    let mut config = config_with(&["slow", "fast"]);
    config.endpoints[0].weight = 5;
    config.endpoints[0].timeout_ms = 200;
    let h = harness(&config, &transport);

    let started = tokio::time::Instant::now();
    let value = h.orchestrator.call("getSlot", json!([]), CallOptions::new()).await.unwrap();
    assert_eq!(value["endpoint"], "fast");
    assert_eq!(started.elapsed(), Duration::from_millis(200));
    assert_eq!(h.orchestrator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_error_mapping() {
    let transport = ScriptedTransport::new();
    transport.push("a", Duration::ZERO, Err(TransportError::Decode("not json".into())));
    transport.push("a", Duration::ZERO, Err(TransportError::Status { code: 500, body: "boom".into() }));
    let mut config = config_with(&["a"]);
    config.retry.max_attempts = 1;
    config.cache.enabled = false;
    let h = harness(&config, &transport);

    let malformed = h.orchestrator.call("getSlot", json!([]), CallOptions::new()).await;
    assert_eq!(malformed, Err(CallError::MalformedResponse("not json".into())));

    let server = h.orchestrator.call("getSlot", json!([]), CallOptions::new()).await;
    assert_eq!(server, Err(CallError::UpstreamServerError { status: 500, message: "boom".into() }));
    assert!(!server.unwrap_err().is_policy_error());
}

#[tokio::test(start_paused = true)]
async fn test_stats_track_requests() {
    let transport = ScriptedTransport::new().with_latency("a", Duration::from_millis(25));
    let mut config = config_with(&["a"]);
    config.cache.enabled = false;
    let h = harness(&config, &transport);

    for i in 0..3 {
        h.orchestrator.call("getSlot", json!([i]), CallOptions::new()).await.unwrap();
    }

    let stats = &h.orchestrator.stats()[0];
    assert_eq!(stats.name.as_ref(), "a");
    assert!(stats.active && stats.healthy);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.queue_depth, 0);
    assert_eq!(stats.latency_p50_ms, Some(25));
}
