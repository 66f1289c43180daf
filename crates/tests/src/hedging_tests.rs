//! Integration tests for request hedging.
//!
//! These tests verify that:
//! - A backup attempt wins when the primary is slow
//! - No backup is launched when the primary answers before the hedge delay
//! - The percentile delay follows observed latency
//! - Losing attempts are cancelled and release their slots

use crate::mock_infrastructure::{config_with, drain_event_names, harness};
use bulwark_core::{
    config::BulwarkConfig,
    testing::ScriptedTransport,
    upstream::{HedgeConfig, HedgeDelayMode},
    CallOptions,
};
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

fn hedged_config() -> BulwarkConfig {
    let mut config = config_with(&["slow", "fast"]);
    config.endpoints[0].weight = 10;
    config.cache.enabled = false;
    config.methods.hedgeable = vec!["getSlot".to_string()];
    config.hedging = HedgeConfig {
        enabled: true,
        delay_mode: HedgeDelayMode::Fixed,
        default_delay_ms: 50,
        max_parallel: 2,
        ..Default::default()
    };
    config
}

#[tokio::test(start_paused = true)]
async fn test_backup_wins_when_primary_slow() {
    let transport = ScriptedTransport::new()
        .with_latency("slow", Duration::from_millis(500))
        .with_latency("fast", Duration::from_millis(30));
    let mut h = harness(&hedged_config(), &transport);

    let started = Instant::now();
    let value = h.orchestrator.call("getSlot", json!([]), CallOptions::new()).await.unwrap();

    assert_eq!(value["endpoint"], "fast");
    assert_eq!(started.elapsed(), Duration::from_millis(80));
    assert_eq!(transport.calls("slow"), 1);
    assert_eq!(transport.completed("slow"), 0, "losing primary should be cancelled");
    assert_eq!(h.orchestrator.in_flight(), 0);

    let events = drain_event_names(&mut h.events);
    assert!(events.contains(&"hedge_launched"));
    assert!(events.contains(&"hedge_won"));
}

#[tokio::test(start_paused = true)]
async fn test_no_backup_when_primary_fast() {
    let transport = ScriptedTransport::new()
        .with_latency("slow", Duration::from_millis(20))
        .with_latency("fast", Duration::from_millis(5));
    let mut h = harness(&hedged_config(), &transport);

    let value = h.orchestrator.call("getSlot", json!([]), CallOptions::new()).await.unwrap();
    assert_eq!(value["endpoint"], "slow");
    assert_eq!(transport.calls("fast"), 0);
    assert!(!drain_event_names(&mut h.events).contains(&"hedge_launched"));
}

#[tokio::test(start_paused = true)]
async fn test_methods_not_hedgeable_run_once() {
    let transport = ScriptedTransport::new()
        .with_latency("slow", Duration::from_millis(500))
        .with_latency("fast", Duration::from_millis(30));
    let h = harness(&hedged_config(), &transport);

    let value = h.orchestrator.call("getBalance", json!(["k"]), CallOptions::new()).await.unwrap();
    assert_eq!(value["endpoint"], "slow");
    assert_eq!(transport.calls("fast"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_percentile_delay_follows_latency() {
    let transport = ScriptedTransport::new();
    let mut config = hedged_config();
    config.hedging.delay_mode = HedgeDelayMode::Percentile;
    config.hedging.latency_quantile = 0.95;
    config.hedging.delay_factor = 0.75;
    config.hedging.min_samples = 20;
    let h = harness(&config, &transport);
    let endpoint = h.orchestrator.registry().get("slow").unwrap();

    assert_eq!(h.orchestrator.hedger().hedge_delay(endpoint), Duration::from_millis(50));

    for _ in 0..20 {
        endpoint.latency().record(Duration::from_millis(100));
    }
    assert_eq!(h.orchestrator.hedger().hedge_delay(endpoint), Duration::from_millis(75));
}

#[tokio::test(start_paused = true)]
async fn test_hedging_disabled_at_runtime() {
    let transport = ScriptedTransport::new()
        .with_latency("slow", Duration::from_millis(500))
        .with_latency("fast", Duration::from_millis(30));
    let h = harness(&hedged_config(), &transport);

    let mut disabled = h.orchestrator.hedger().config();
    disabled.enabled = false;
    h.orchestrator.hedger().update_config(disabled);

    let started = Instant::now();
    let value = h.orchestrator.call("getSlot", json!([]), CallOptions::new()).await.unwrap();
    assert_eq!(value["endpoint"], "slow");
    assert_eq!(started.elapsed(), Duration::from_millis(500));
    assert_eq!(transport.calls("fast"), 0);
}
