//! Helpers for building configurations and clients around a `ScriptedTransport`.

use bulwark_core::{
    config::{BulwarkConfig, EndpointConfig},
    events::{BulwarkEvent, EventBus, EventDispatcher},
    metrics::MetricsCollector,
    testing::ScriptedTransport,
    Orchestrator,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Config with one endpoint per name. Addresses equal names so scripts can key on them.
#[must_use]
pub fn config_with(names: &[&str]) -> BulwarkConfig {
    let mut config = BulwarkConfig::default();
    config.endpoints = names.iter().map(|name| EndpointConfig::new(*name, *name)).collect();
    config.circuit_breaker.jitter_fraction = 0.0;
    config
}

/// Orchestrator plus a receiver for its events.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub events: broadcast::Receiver<BulwarkEvent>,
}

/// Builds an orchestrator on `transport` with metrics disabled and events captured.
#[must_use]
pub fn harness(config: &BulwarkConfig, transport: &ScriptedTransport) -> Harness {
    let bus = EventBus::new(256);
    let events = bus.subscribe();
    let dispatcher = EventDispatcher::new(vec![Arc::new(bus)]);
    let orchestrator =
        Orchestrator::new(config, Arc::new(transport.clone()), dispatcher, MetricsCollector::disabled())
            .expect("valid test config");
    Harness { orchestrator: Arc::new(orchestrator), events }
}

/// Drains every event received so far, returning their names.
pub fn drain_event_names(events: &mut broadcast::Receiver<BulwarkEvent>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    names
}
