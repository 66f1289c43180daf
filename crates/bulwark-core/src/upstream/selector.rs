use std::{
    cmp::Ordering as CmpOrdering,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::upstream::{endpoint::Endpoint, registry::EndpointRegistry};

/// Chooses the endpoint for each dispatch.
///
/// Eligible endpoints are active, healthy, admitted by their circuit breaker and below their
/// concurrency limit. Among those the lowest load ratio (`in_flight / limit`) wins; ties go to
/// the higher configured weight, then rotate round-robin.
#[derive(Debug)]
pub struct EndpointSelector {
    registry: Arc<EndpointRegistry>,
    current_index: AtomicUsize,
}

/// Load and weight captured once per endpoint so one selection sees consistent numbers.
struct Candidate<'a> {
    endpoint: &'a Arc<Endpoint>,
    in_flight: usize,
    limit: usize,
    weight: u32,
}

impl Candidate<'_> {
    fn load_cmp(&self, other: &Self) -> CmpOrdering {
        (self.in_flight * other.limit).cmp(&(other.in_flight * self.limit))
    }

    /// `Less` means `self` is the better pick.
    fn rank(&self, other: &Self) -> CmpOrdering {
        self.load_cmp(other).then_with(|| other.weight.cmp(&self.weight))
    }
}

fn is_excluded(endpoint: &Endpoint, excluding: &[Arc<str>]) -> bool {
    excluding.iter().any(|name| name.as_ref() == endpoint.name().as_ref())
}

impl EndpointSelector {
    #[must_use]
    pub fn new(registry: Arc<EndpointRegistry>) -> Self {
        Self { registry, current_index: AtomicUsize::new(0) }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Best eligible endpoint not named in `excluding`, or `None` so the caller can queue or
    /// fail fast.
    #[must_use]
    pub fn select(&self, excluding: &[Arc<str>]) -> Option<Arc<Endpoint>> {
        self.pick(excluding, Endpoint::is_eligible)
    }

    /// Best endpoint to queue on when nothing is eligible: usable (active, healthy, breaker
    /// admitting) regardless of free slots, preferring the shortest queue relative to load.
    #[must_use]
    pub fn best_candidate(&self, excluding: &[Arc<str>]) -> Option<Arc<Endpoint>> {
        self.registry
            .all()
            .iter()
            .filter(|endpoint| !is_excluded(endpoint, excluding) && endpoint.is_usable())
            .min_by(|a, b| {
                let (a_queue, b_queue) = (a.queue_depth(), b.queue_depth());
                a_queue
                    .cmp(&b_queue)
                    .then_with(|| (a.in_flight() * b.concurrency_limit()).cmp(&(b.in_flight() * a.concurrency_limit())))
                    .then_with(|| b.weight().cmp(&a.weight()))
            })
            .cloned()
    }

    fn pick(&self, excluding: &[Arc<str>], eligible: fn(&Endpoint) -> bool) -> Option<Arc<Endpoint>> {
        let candidates: Vec<Candidate<'_>> = self
            .registry
            .all()
            .iter()
            .filter(|endpoint| !is_excluded(endpoint, excluding) && eligible(endpoint))
            .map(|endpoint| {
                let (in_flight, limit) = endpoint.load();
                Candidate { endpoint, in_flight, limit, weight: endpoint.weight() }
            })
            .collect();

        let best = candidates.iter().min_by(|a, b| a.rank(b))?;
        let ties: Vec<&Candidate<'_>> =
            candidates.iter().filter(|c| c.rank(best) == CmpOrdering::Equal).collect();

        let chosen = if ties.len() == 1 {
            ties[0]
        } else {
            ties[self.current_index.fetch_add(1, Ordering::Relaxed) % ties.len()]
        };

        tracing::trace!(
            endpoint = %chosen.endpoint.name(),
            in_flight = chosen.in_flight,
            limit = chosen.limit,
            tied = ties.len(),
            "selected endpoint"
        );
        Some(chosen.endpoint.clone())
    }
}
