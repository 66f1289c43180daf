use std::sync::Arc;

use ahash::AHashMap;
use tokio::sync::Notify;

use crate::{
    config::BulwarkConfig,
    events::EventDispatcher,
    types::EndpointStats,
    upstream::endpoint::Endpoint,
};

/// Every endpoint known to one orchestrator, in configuration order.
///
/// The set is fixed at construction. Endpoints are taken out of rotation with
/// [`EndpointRegistry::deactivate`], never removed.
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: Vec<Arc<Endpoint>>,
    by_name: AHashMap<Arc<str>, usize>,
    capacity_freed: Arc<Notify>,
}

impl EndpointRegistry {
    /// Builds one [`Endpoint`] per configured entry. All endpoints share `capacity_freed`, which
    /// is signalled whenever a slot frees up or an endpoint comes back into rotation.
    #[must_use]
    pub fn from_config(config: &BulwarkConfig, events: &EventDispatcher) -> Self {
        let capacity_freed = Arc::new(Notify::new());
        let endpoints: Vec<Arc<Endpoint>> = config
            .endpoints
            .iter()
            .map(|endpoint| {
                Arc::new(Endpoint::from_config(
                    config,
                    endpoint.clone(),
                    capacity_freed.clone(),
                    events.clone(),
                ))
            })
            .collect();

        let by_name = endpoints
            .iter()
            .enumerate()
            .map(|(index, endpoint)| (endpoint.name().clone(), index))
            .collect();

        Self { endpoints, by_name, capacity_freed }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Endpoint>> {
        self.by_name.get(name).and_then(|&index| self.endpoints.get(index))
    }

    #[must_use]
    pub fn all(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Signalled when capacity frees up anywhere in the registry.
    #[must_use]
    pub fn capacity_freed(&self) -> &Arc<Notify> {
        &self.capacity_freed
    }

    /// Puts an endpoint back into rotation. Returns `false` for unknown names.
    pub fn activate(&self, name: &str) -> bool {
        self.get(name).map(|endpoint| endpoint.activate()).is_some()
    }

    /// Takes an endpoint out of rotation. Queued calls on it migrate on the next drain pass.
    /// Returns `false` for unknown names.
    pub fn deactivate(&self, name: &str) -> bool {
        self.get(name).map(|endpoint| endpoint.deactivate()).is_some()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<EndpointStats> {
        self.endpoints.iter().map(|endpoint| endpoint.stats()).collect()
    }

    /// Total queued calls across all endpoints.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.endpoints.iter().map(|endpoint| endpoint.queue_depth()).sum()
    }
}
