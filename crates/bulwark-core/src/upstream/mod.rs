//! Per-endpoint resiliency state and the components that act on it.
//!
//! Every configured endpoint owns a circuit breaker, a token bucket, a latency window, a
//! concurrency semaphore and a bounded priority queue. On top of those:
//!
//! - [`EndpointSelector`] picks the least loaded eligible endpoint
//! - [`ConnectionCore`] executes calls with a timeout and classifies failures
//! - [`HedgeExecutor`] races a primary call against delayed backups
//! - [`HealthChecker`] probes endpoints in the background
//!
//! # Dispatch Order
//!
//! A dispatch acquires, in order, a rate-limit token, breaker admission and a concurrency
//! slot ([`Endpoint::try_lease`]). A refusal at any step rolls back the earlier steps:
//!
//! ```text
//! try_lease ─┬─ token bucket empty ─────────→ RateLimited
//!            ├─ breaker refuses (refund) ───→ CircuitOpen
//!            ├─ no free slot (refund) ──────→ AtCapacity
//!            └─ EndpointLease { permit, slot }
//! ```

pub mod circuit_breaker;
pub mod connection;
pub mod endpoint;
pub mod errors;
pub mod health;
pub mod hedging;
pub mod latency_tracker;
pub mod registry;
pub mod selector;
pub mod token_bucket;

pub use circuit_breaker::{BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState};
pub use connection::ConnectionCore;
pub use endpoint::{Endpoint, EndpointLease, InFlightGuard, LeaseError};
pub use errors::{RpcErrorCategory, UpstreamError};
pub use health::{HealthCheckConfig, HealthChecker};
pub use hedging::{HedgeConfig, HedgeDelayMode, HedgeExecutor};
pub use latency_tracker::{LatencyStats, LatencyTracker};
pub use registry::EndpointRegistry;
pub use selector::EndpointSelector;
pub use token_bucket::{RateLimitConfig, TokenBucket};
