//! # Bulwark Core
//!
//! Resilient client layer for talking to a pool of interchangeable JSON-RPC endpoints.
//!
//! This crate provides:
//!
//! - **[`orchestrator`]**: The single entry point for calls. Priority queues, global
//!   concurrency, backpressure, deadlines and retries.
//!
//! - **[`upstream`]**: Per-endpoint token buckets, circuit breakers, latency windows,
//!   least-loaded selection, hedging and background health checks.
//!
//! - **[`cache`]**: Short-lived result cache that coalesces identical concurrent calls.
//!
//! - **[`batch`]**: Adaptive micro-batching of batchable methods.
//!
//! - **[`events`]** and **[`metrics`]**: Pipeline events and Prometheus metrics.
//!
//! - **[`runtime`]**: Builder and lifecycle for the background tasks.
//!
//! ## Request Flow
//!
//! ```text
//! Client Call
//!       │
//!       ▼
//! ┌─────────────┐
//! │  Validation │ ─── Invalid ──► CallError::Validation
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │ Cache Check │ ─── Hit / In flight ──► Shared Result
//! └──────┬──────┘
//!        │ Miss
//!        ▼
//! ┌──────────────────┐
//! │ EndpointSelector │ ─── None eligible ──► CircuitOpen / AllEndpointsUnavailable
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ Admission        │ ─── Saturated ──► Priority Queue ─── Full ──► Backpressure
//! │ token → breaker  │                        │
//! │ → slot           │ ◄──── drain loop ──────┘ ─── Expired ──► DeadlineExceeded
//! └────────┬─────────┘
//!          │
//!    ┌─────┼──────────┐
//!    ▼     ▼          ▼
//! Batch  Hedge     Direct
//!    │     │          │
//!    └─────┴────┬─────┘
//!               ▼
//!        ┌──────────────┐
//!        │  Transport   │
//!        └──────┬───────┘
//!               │
//!               ▼
//!    Breaker / Latency Update ──► Retry elsewhere if transient
//! ```
//!
//! ## Feature Flags
//!
//! - `test-utils`: Exposes [`testing`] with a scripted in-memory transport.

pub mod batch;
pub mod cache;
pub mod config;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod runtime;
pub mod telemetry;
pub mod transport;
pub mod types;
pub mod upstream;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{BulwarkConfig, ConfigError};
pub use orchestrator::{CallError, Orchestrator};
pub use runtime::{BulwarkRuntime, BulwarkRuntimeBuilder, RuntimeError};
pub use types::{CallOptions, ConsistencyLevel, Priority};
