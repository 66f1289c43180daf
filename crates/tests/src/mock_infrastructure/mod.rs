//! Mock infrastructure for exercising the client without real endpoints.
//!
//! ## Components
//!
//! - `RpcMockBuilder`: Wraps mockito to serve canned JSON-RPC responses over HTTP
//! - Test helpers for building configurations and runtimes around a `ScriptedTransport`
//!
//! ## Usage
//!
//! ```ignore
//! use crate::mock_infrastructure::RpcMockBuilder;
//!
//! let mut mock = RpcMockBuilder::new().await;
//! mock.mock_result("getSlot", json!(42));
//!
//! // Use mock.url() as an endpoint address
//! ```

pub mod rpc_mock;
pub mod test_helpers;

pub use rpc_mock::RpcMockBuilder;
pub use test_helpers::*;
