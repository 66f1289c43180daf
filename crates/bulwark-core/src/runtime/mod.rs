//! Bulwark runtime initialization and lifecycle management.
//!
//! The runtime wires the orchestrator to a transport, an event stream and the metrics
//! collector, then owns the background tasks that keep the pipeline moving: the queue drain
//! loop, the expiry sweeper and, optionally, the health checker. All of them listen on one
//! broadcast shutdown channel.
//!
//! # Examples
//!
//! ## Embedded Usage
//!
//! ```no_run
//! use bulwark_core::{config::BulwarkConfig, runtime::BulwarkRuntime, types::CallOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BulwarkConfig::load()?;
//!
//!     let runtime = BulwarkRuntime::builder().with_config(config).build()?;
//!
//!     let slot = runtime.call("getSlot", json!([]), CallOptions::new()).await?;
//!     println!("slot: {slot}");
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Observing Events
//!
//! ```no_run
//! use bulwark_core::{config::BulwarkConfig, runtime::BulwarkRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = BulwarkRuntime::builder()
//!         .with_config(BulwarkConfig::load()?)
//!         .enable_health_checker()
//!         .build()?;
//!
//!     let mut events = runtime.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("{} on {}", event.name(), event.endpoint());
//!         }
//!     });
//!
//!     runtime.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod lifecycle;

pub use builder::{BulwarkRuntimeBuilder, RuntimeError};
pub use lifecycle::BulwarkRuntime;
