//! Integration tests for priority queueing, global concurrency, migration and deadlines.

use crate::mock_infrastructure::{config_with, drain_event_names, harness};
use bulwark_core::{testing::ScriptedTransport, CallError, CallOptions};
use futures::future::join_all;
use serde_json::json;
use std::time::Duration;
use tokio::{sync::broadcast, time::Instant};

#[tokio::test(start_paused = true)]
async fn test_global_in_flight_cap_queues_excess() {
    let transport = ScriptedTransport::new()
        .with_latency("a", Duration::from_millis(100))
        .with_latency("b", Duration::from_millis(100));
    let mut config = config_with(&["a", "b"]);
    config.queue.max_in_flight = 2;
    config.cache.enabled = false;
    let h = harness(&config, &transport);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let drain = h.orchestrator.spawn_drain_loop(shutdown_rx);

    let started = Instant::now();
    let calls = (0..4).map(|i| h.orchestrator.call("getSlot", json!([i]), CallOptions::new()));
    let results = join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(started.elapsed(), Duration::from_millis(200));
    assert_eq!(transport.total_calls(), 4);
    assert_eq!(h.orchestrator.in_flight(), 0);
    drain.abort();
}

#[tokio::test(start_paused = true)]
async fn test_queued_call_migrates_off_deactivated_endpoint() {
    let transport = ScriptedTransport::new().with_latency("a", Duration::from_secs(1));
    let mut config = config_with(&["a", "b"]);
    config.endpoints[0].max_concurrency = 1;
    config.cache.enabled = false;
    let h = harness(&config, &transport);
    h.orchestrator.registry().deactivate("b");
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let drain = h.orchestrator.spawn_drain_loop(shutdown_rx);

    let running = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.call("getSlot", json!([1]), CallOptions::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    let queued = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.call("getSlot", json!([2]), CallOptions::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(h.orchestrator.queued(), 1);

    let started = Instant::now();
    h.orchestrator.registry().activate("b");
    h.orchestrator.registry().deactivate("a");

    let value = queued.await.unwrap().unwrap();
    assert_eq!(value["endpoint"], "b");
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(running.await.unwrap().is_ok());
    drain.abort();
}

#[tokio::test(start_paused = true)]
async fn test_backpressure_then_deadline_expiry() {
    let transport = ScriptedTransport::new().with_latency("a", Duration::from_secs(2));
    let mut config = config_with(&["a"]);
    config.endpoints[0].max_concurrency = 1;
    config.queue.max_size = 2;
    config.cache.enabled = false;
    let mut h = harness(&config, &transport);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let sweeper = h.orchestrator.spawn_sweeper(shutdown_rx);

    let running = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.call("getSlot", json!([0]), CallOptions::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    let mut waiting = Vec::new();
    for i in 1..=2 {
        let orchestrator = h.orchestrator.clone();
        waiting.push(tokio::spawn(async move {
            orchestrator.call("getSlot", json!([i]), CallOptions::new().with_timeout_ms(300)).await
        }));
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let rejected = h.orchestrator.call("getSlot", json!([3]), CallOptions::new()).await;
    match rejected {
        Err(CallError::Backpressure(snapshot)) => {
            assert_eq!(snapshot.depth, 2);
            assert_eq!(snapshot.capacity, 2);
            assert!(snapshot.oldest_wait_ms >= 1);
        }
        other => panic!("expected backpressure, got {other:?}"),
    }

    for handle in waiting {
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(CallError::DeadlineExceeded { .. })), "got {result:?}");
    }

    let events = drain_event_names(&mut h.events);
    assert_eq!(events.iter().filter(|name| **name == "request_queued").count(), 2);
    assert_eq!(events.iter().filter(|name| **name == "backpressure_triggered").count(), 1);
    assert_eq!(events.iter().filter(|name| **name == "deadline_expired").count(), 2);
    assert_eq!(transport.calls("a"), 1);

    assert!(running.await.unwrap().is_ok());
    let _ = shutdown_tx.send(());
    sweeper.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_caller_timeout_bounds_dispatched_call() {
    let transport = ScriptedTransport::new().with_latency("a", Duration::from_secs(5));
    let mut config = config_with(&["a"]);
    config.retry.max_attempts = 1;
    let h = harness(&config, &transport);

    let started = Instant::now();
    let result = h.orchestrator.call("getSlot", json!([]), CallOptions::new().with_timeout_ms(150)).await;
    assert_eq!(result, Err(CallError::RequestTimeout));
    assert_eq!(started.elapsed(), Duration::from_millis(150));
}
