//! Builder for assembling a [`BulwarkRuntime`] from configuration and optional overrides.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    config::{BulwarkConfig, ConfigError},
    events::{EventBus, EventDispatcher, EventSink},
    metrics::MetricsCollector,
    orchestrator::Orchestrator,
    transport::{http::HttpTransport, Transport, TransportError},
};

use super::lifecycle::BulwarkRuntime;

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No configuration was supplied to the builder
    #[error("Configuration is required")]
    MissingConfig,

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(#[from] ConfigError),

    /// The default HTTP transport could not be created
    #[error("Failed to initialize transport: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Clone)]
struct RuntimeOptions {
    enable_health_checker: bool,
    shutdown_channel_capacity: usize,
    event_bus_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { enable_health_checker: false, shutdown_channel_capacity: 16, event_bus_capacity: 1024 }
    }
}

/// Builder for constructing a [`BulwarkRuntime`].
///
/// # Examples
///
/// ```ignore
/// let runtime = BulwarkRuntime::builder()
///     .with_config(config)
///     .with_event_sink(Arc::new(MySink))
///     .enable_health_checker()
///     .build()?;
/// ```
pub struct BulwarkRuntimeBuilder {
    config: Option<BulwarkConfig>,
    transport: Option<Arc<dyn Transport>>,
    sinks: Vec<Arc<dyn EventSink>>,
    options: RuntimeOptions,
}

impl BulwarkRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { config: None, transport: None, sinks: Vec::new(), options: RuntimeOptions::default() }
    }

    #[must_use]
    pub fn with_config(mut self, config: BulwarkConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the default HTTP transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Adds a sink that receives every pipeline event.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Starts the health checker even if `health_check.enabled` is false in the config.
    #[must_use]
    pub fn enable_health_checker(mut self) -> Self {
        self.options.enable_health_checker = true;
        self
    }

    #[must_use]
    pub fn with_shutdown_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.shutdown_channel_capacity = capacity;
        self
    }

    /// Capacity of the broadcast channel behind [`BulwarkRuntime::subscribe`].
    #[must_use]
    pub fn with_event_bus_capacity(mut self, capacity: usize) -> Self {
        self.options.event_bus_capacity = capacity;
        self
    }

    /// Validates the configuration, builds every component and starts background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::MissingConfig`] without a config, [`RuntimeError::ConfigValidation`]
    /// if it is invalid, and [`RuntimeError::Transport`] if the default transport fails to build.
    pub fn build(self) -> Result<BulwarkRuntime, RuntimeError> {
        let config = self.config.ok_or(RuntimeError::MissingConfig)?;
        config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };

        let metrics = MetricsCollector::new(&config.metrics);
        let bus = EventBus::new(self.options.event_bus_capacity);

        let mut sinks: Vec<Arc<dyn EventSink>> = Vec::with_capacity(self.sinks.len() + 2);
        if metrics.is_enabled() {
            sinks.push(Arc::new(metrics));
        }
        sinks.push(Arc::new(bus.clone()));
        sinks.extend(self.sinks);
        let events = EventDispatcher::new(sinks);
        debug!(sinks = events.sink_count(), "event dispatcher configured");

        let orchestrator = Arc::new(Orchestrator::new(&config, transport.clone(), events.clone(), metrics)?);

        let (shutdown_tx, _) = broadcast::channel(self.options.shutdown_channel_capacity.max(1));
        let enable_health_checker = self.options.enable_health_checker || config.health_check.enabled;

        info!(
            endpoints = config.endpoints.len(),
            health_checker = enable_health_checker,
            "bulwark runtime initialized"
        );

        Ok(BulwarkRuntime::new(orchestrator, transport, events, bus, shutdown_tx, config, enable_health_checker))
    }
}

impl Default for BulwarkRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
