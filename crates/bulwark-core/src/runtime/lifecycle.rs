//! Runtime lifecycle: background tasks and graceful shutdown.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde_json::Value;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    config::BulwarkConfig,
    events::{BulwarkEvent, EventBus, EventDispatcher},
    orchestrator::{CallError, Orchestrator},
    transport::Transport,
    types::{CallOptions, EndpointStats},
    upstream::HealthChecker,
};

use super::builder::BulwarkRuntimeBuilder;

/// Owns the orchestrator and the background tasks that serve it.
///
/// Dropping the runtime without calling [`shutdown`](Self::shutdown) leaves the background
/// tasks running until the Tokio runtime itself stops.
pub struct BulwarkRuntime {
    orchestrator: Arc<Orchestrator>,
    events: EventDispatcher,
    bus: EventBus,
    shutdown_tx: broadcast::Sender<()>,
    config: BulwarkConfig,
    drain_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
    health_task: Option<JoinHandle<()>>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl BulwarkRuntime {
    /// Creates a new builder for constructing a `BulwarkRuntime`.
    #[must_use]
    pub fn builder() -> BulwarkRuntimeBuilder {
        BulwarkRuntimeBuilder::new()
    }

    /// Starts background tasks around an initialized orchestrator.
    ///
    /// Called by `BulwarkRuntimeBuilder` during initialization.
    pub(super) fn new(
        orchestrator: Arc<Orchestrator>,
        transport: Arc<dyn Transport>,
        events: EventDispatcher,
        bus: EventBus,
        shutdown_tx: broadcast::Sender<()>,
        config: BulwarkConfig,
        enable_health_checker: bool,
    ) -> Self {
        let drain_task = orchestrator.spawn_drain_loop(shutdown_tx.subscribe());
        let sweeper_task = orchestrator.spawn_sweeper(shutdown_tx.subscribe());
        debug!("queue drain and sweeper tasks started");

        let health_task = enable_health_checker.then(|| {
            let checker = HealthChecker::new(
                orchestrator.registry().clone(),
                transport,
                config.health_check.clone(),
                events.clone(),
            );
            let handle = checker.start_with_shutdown(shutdown_tx.subscribe());
            debug!(interval_ms = config.health_check.interval_ms, "health checker task started");
            handle
        });

        Self {
            orchestrator,
            events,
            bus,
            shutdown_tx,
            config,
            drain_task,
            sweeper_task,
            health_task,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    #[must_use]
    pub fn config(&self) -> &BulwarkConfig {
        &self.config
    }

    #[must_use]
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Executes a call through the orchestrator.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::call`].
    pub async fn call(&self, method: &str, params: Value, options: CallOptions) -> Result<Value, CallError> {
        self.orchestrator.call(method, params, options).await
    }

    /// Subscribes to the pipeline event stream. Slow receivers lag and lose old events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BulwarkEvent> {
        self.bus.subscribe()
    }

    #[must_use]
    pub fn stats(&self) -> Vec<EndpointStats> {
        self.orchestrator.stats()
    }

    #[must_use]
    pub fn health_checker_running(&self) -> bool {
        self.health_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Creates a new shutdown receiver for external shutdown coordination.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stops background tasks and fails every queued call with `ShuttingDown`.
    ///
    /// Calls already dispatched run to completion. Safe to call from several clones of the
    /// shutdown trigger: only the first call does any work.
    pub async fn shutdown(self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("Initiating bulwark runtime shutdown");
        let failed = self.orchestrator.shutdown();

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!(error = %e, "Failed to send shutdown signal (no receivers)");
        }
        debug!(failed_queued = failed, "Shutdown signal broadcast to all tasks");

        for (name, task) in [("drain", Some(self.drain_task)), ("sweeper", Some(self.sweeper_task)), ("health", self.health_task)] {
            let Some(task) = task else { continue };
            match task.await {
                Ok(()) => debug!(task = name, "background task completed"),
                Err(e) if e.is_cancelled() => debug!(task = name, "background task cancelled"),
                Err(e) => error!(task = name, error = %e, "background task failed"),
            }
        }

        info!("Bulwark runtime shutdown complete");
    }

    /// Waits for a shutdown signal from [`shutdown_receiver`](Self::shutdown_receiver) holders,
    /// then performs cleanup.
    pub async fn wait_for_shutdown(self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, runtime terminating");
        self.shutdown().await;
    }
}

impl std::fmt::Debug for BulwarkRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulwarkRuntime")
            .field("endpoints", &self.orchestrator.registry().len())
            .field("health_checker", &self.health_task.is_some())
            .field("shutdown_initiated", &self.shutdown_initiated.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<BulwarkRuntime>();
};
