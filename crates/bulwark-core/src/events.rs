//! State-transition and policy events.
//!
//! Components report what happened through an [`EventDispatcher`]; consumers plug in
//! [`EventSink`] implementations (the broadcast [`EventBus`], the metrics collector, or their
//! own). Emission is synchronous, never blocks and never fails the call that produced it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;

use crate::types::Priority;

/// Something observable happened inside the pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum BulwarkEvent {
    CircuitOpened {
        endpoint: Arc<str>,
        consecutive_failures: u32,
        #[serde(with = "duration_ms")]
        cooldown: Duration,
        at: DateTime<Utc>,
    },
    CircuitHalfOpened {
        endpoint: Arc<str>,
        at: DateTime<Utc>,
    },
    CircuitClosed {
        endpoint: Arc<str>,
        at: DateTime<Utc>,
    },
    RateLimited {
        endpoint: Arc<str>,
        method: String,
        at: DateTime<Utc>,
    },
    RequestQueued {
        endpoint: Arc<str>,
        method: String,
        priority: Priority,
        depth: usize,
        at: DateTime<Utc>,
    },
    BackpressureTriggered {
        endpoint: Arc<str>,
        depth: usize,
        capacity: usize,
        at: DateTime<Utc>,
    },
    DeadlineExpired {
        endpoint: Arc<str>,
        method: String,
        #[serde(with = "duration_ms")]
        waited: Duration,
        at: DateTime<Utc>,
    },
    HedgeLaunched {
        primary: Arc<str>,
        backup: Arc<str>,
        #[serde(with = "duration_ms")]
        delay: Duration,
        at: DateTime<Utc>,
    },
    HedgeWon {
        endpoint: Arc<str>,
        primary: bool,
        at: DateTime<Utc>,
    },
    HedgeLost {
        endpoint: Arc<str>,
        primary: bool,
        at: DateTime<Utc>,
    },
    EndpointHealthChanged {
        endpoint: Arc<str>,
        healthy: bool,
        at: DateTime<Utc>,
    },
}

impl BulwarkEvent {
    /// Stable event name, matching the serialized `event` tag.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CircuitOpened { .. } => "circuit_opened",
            Self::CircuitHalfOpened { .. } => "circuit_half_opened",
            Self::CircuitClosed { .. } => "circuit_closed",
            Self::RateLimited { .. } => "rate_limited",
            Self::RequestQueued { .. } => "request_queued",
            Self::BackpressureTriggered { .. } => "backpressure_triggered",
            Self::DeadlineExpired { .. } => "deadline_expired",
            Self::HedgeLaunched { .. } => "hedge_launched",
            Self::HedgeWon { .. } => "hedge_won",
            Self::HedgeLost { .. } => "hedge_lost",
            Self::EndpointHealthChanged { .. } => "endpoint_health_changed",
        }
    }

    /// Endpoint the event concerns. For hedge launches this is the backup endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        match self {
            Self::CircuitOpened { endpoint, .. } |
            Self::CircuitHalfOpened { endpoint, .. } |
            Self::CircuitClosed { endpoint, .. } |
            Self::RateLimited { endpoint, .. } |
            Self::RequestQueued { endpoint, .. } |
            Self::BackpressureTriggered { endpoint, .. } |
            Self::DeadlineExpired { endpoint, .. } |
            Self::HedgeWon { endpoint, .. } |
            Self::HedgeLost { endpoint, .. } |
            Self::EndpointHealthChanged { endpoint, .. } => endpoint,
            Self::HedgeLaunched { backup, .. } => backup,
        }
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Consumer of pipeline events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &BulwarkEvent);
}

/// Broadcast channel sink. Slow subscribers lag and lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BulwarkEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BulwarkEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &BulwarkEvent) {
        // No receivers is fine: events are optional to consume.
        let _ = self.sender.send(event.clone());
    }
}

/// Fans events out to every registered sink and mirrors them to `tracing`.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    sinks: Arc<Vec<Arc<dyn EventSink>>>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks: Arc::new(sinks) }
    }

    pub fn emit(&self, event: BulwarkEvent) {
        tracing::trace!(event = event.name(), endpoint = event.endpoint(), "pipeline event");
        for sink in self.sinks.iter() {
            sink.emit(&event);
        }
    }

    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher").field("sinks", &self.sinks.len()).finish()
    }
}
