//! Integration tests for the Bulwark client layer.
//!
//! This crate contains various test modules:
//!
//! - `orchestrator_tests`: Retries, failover, breaker rejection and validation through the public API
//! - `hedging_tests`: Backup attempts racing a slow primary
//! - `coalescing_tests`: Cache hits and coalescing of identical concurrent calls
//! - `queue_tests`: Priority queueing, backpressure and deadline expiry
//! - `batch_tests`: Micro-batching and per-caller result routing
//! - `runtime_tests`: Builder, background tasks and graceful shutdown
//! - `http_transport_tests`: The full pipeline against a mock JSON-RPC HTTP server
//! - `mock_infrastructure`: Reusable mock JSON-RPC server and config helpers
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```
//!
//! Everything except `http_transport_tests` runs on a paused Tokio clock against the
//! in-memory scripted transport, so timing assertions are exact.

#[cfg(test)]
mod mock_infrastructure;

#[cfg(test)]
mod orchestrator_tests;

#[cfg(test)]
mod hedging_tests;

#[cfg(test)]
mod coalescing_tests;

#[cfg(test)]
mod queue_tests;

#[cfg(test)]
mod batch_tests;

#[cfg(test)]
mod runtime_tests;

#[cfg(test)]
mod http_transport_tests;
