//! Integration tests for the runtime: builder, background tasks and shutdown.

use crate::mock_infrastructure::config_with;
use bulwark_core::{
    events::{BulwarkEvent, EventSink},
    testing::ScriptedTransport,
    transport::TransportError,
    BulwarkConfig, BulwarkRuntime, CallError, CallOptions, Priority,
};
use parking_lot::Mutex;
use serde_json::json;
use serial_test::serial;
use std::{io::Write, sync::Arc, time::Duration};

#[derive(Default)]
struct RecordingSink {
    names: Mutex<Vec<&'static str>>,
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &BulwarkEvent) {
        self.names.lock().push(event.name());
    }
}

#[tokio::test(start_paused = true)]
async fn test_runtime_from_toml() {
    let config = BulwarkConfig::from_toml_str(
        r#"
[[endpoints]]
name = "a"
address = "a"
weight = 2

[[endpoints]]
name = "b"
address = "b"

[queue]
max_size = 8

[cache]
ttl_ms = 250
"#,
    )
    .unwrap();
    let transport = ScriptedTransport::new();
    let runtime = BulwarkRuntime::builder().with_config(config).with_transport(Arc::new(transport.clone())).build().unwrap();

    let value = runtime.call("getSlot", json!([]), CallOptions::new()).await.unwrap();
    assert_eq!(value["endpoint"], "a");
    assert_eq!(runtime.stats().len(), 2);
    assert_eq!(runtime.config().cache.ttl_ms, 250);
    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_runtime_from_config_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "[[endpoints]]\nname = \"file\"\naddress = \"file\"\nmax_concurrency = 4\n\n[retry]\nmax_attempts = 1\n"
    )
    .unwrap();

    std::env::set_var("BULWARK_CONFIG", file.path());
    std::env::set_var("BULWARK__QUEUE__MAX_SIZE", "12");
    let loaded = BulwarkConfig::load();
    std::env::remove_var("BULWARK_CONFIG");
    std::env::remove_var("BULWARK__QUEUE__MAX_SIZE");
    let config = loaded.unwrap();
    assert_eq!(config.queue.max_size, 12);
    assert_eq!(config.retry.max_attempts, 1);

    let transport = ScriptedTransport::new();
    let runtime = BulwarkRuntime::builder().with_config(config).with_transport(Arc::new(transport.clone())).build().unwrap();
    let value = runtime.call("getSlot", json!([]), CallOptions::new()).await.unwrap();
    assert_eq!(value["endpoint"], "file");
    assert_eq!(runtime.stats()[0].name.as_ref(), "file");
    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_health_checker_removes_failing_endpoint() {
    let transport = ScriptedTransport::new().failing("b", TransportError::Connect("refused".into()));
    let mut config = config_with(&["a", "b"]);
    config.cache.enabled = false;
    config.health_check.enabled = true;
    config.health_check.interval_ms = 100;
    config.health_check.failure_threshold = 2;
    let sink = Arc::new(RecordingSink::default());
    let runtime = BulwarkRuntime::builder()
        .with_config(config)
        .with_transport(Arc::new(transport.clone()))
        .with_event_sink(sink.clone())
        .build()
        .unwrap();
    let mut events = runtime.subscribe();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let changed = events.recv().await.unwrap();
    assert_eq!(changed.name(), "endpoint_health_changed");
    assert_eq!(changed.endpoint(), "b");
    assert!(sink.names.lock().contains(&"endpoint_health_changed"));

    for i in 0..4 {
        let value = runtime.call("getSlot", json!([i]), CallOptions::new()).await.unwrap();
        assert_eq!(value["endpoint"], "a");
    }
    assert!(transport.methods("b").iter().all(|method| method == "getHealth"));
    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_queued_calls_drain_in_runtime() {
    let transport = ScriptedTransport::new().with_latency("a", Duration::from_millis(50));
    let mut config = config_with(&["a"]);
    config.endpoints[0].max_concurrency = 2;
    config.cache.enabled = false;
    let runtime = BulwarkRuntime::builder().with_config(config).with_transport(Arc::new(transport.clone())).build().unwrap();
    let orchestrator = runtime.orchestrator().clone();

    let calls = (0..6).map(|i| {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.call("getSlot", json!([i]), CallOptions::new().with_priority(Priority::LOW)).await
        })
    });
    let started = tokio::time::Instant::now();
    for handle in futures::future::join_all(calls).await {
        assert!(handle.unwrap().is_ok());
    }
    assert_eq!(started.elapsed(), Duration::from_millis(150));
    assert_eq!(transport.calls("a"), 6);
    runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_resolves_waiters_and_stops_tasks() {
    let transport = ScriptedTransport::new().with_latency("a", Duration::from_secs(1));
    let mut config = config_with(&["a"]);
    config.endpoints[0].max_concurrency = 1;
    config.cache.enabled = false;
    let runtime = BulwarkRuntime::builder().with_config(config).with_transport(Arc::new(transport.clone())).build().unwrap();
    let orchestrator = runtime.orchestrator().clone();
    let mut shutdown_rx = runtime.shutdown_receiver();

    let running = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.call("getSlot", json!([0]), CallOptions::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    let waiters: Vec<_> = (1..=3)
        .map(|i| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.call("getSlot", json!([i]), CallOptions::new()).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(orchestrator.queued(), 3);

    runtime.shutdown().await;
    assert!(shutdown_rx.recv().await.is_ok());
    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), Err(CallError::ShuttingDown));
    }
    assert!(running.await.unwrap().is_ok());

    let late = orchestrator.call("getSlot", json!([9]), CallOptions::new()).await;
    assert_eq!(late, Err(CallError::ShuttingDown));
}
