//! mountlink-test-harness: mock transports and a simulated mount controller.
//!
//! This crate provides [`MockTransport`] and [`MockConnector`] for
//! deterministic unit testing of the protocol client and the runner without
//! sockets, and [`MockDeviceServer`] for end-to-end tests against a
//! simulated controller over real TCP connections.

pub mod dispatch;
pub mod mock_device;
pub mod mock_transport;
pub mod sim;

pub use dispatch::{CommandMatcher, DispatchEntry, DispatchTable, Request, Responder};
pub use mock_device::{MockDeviceServer, ServerConfig};
pub use mock_transport::{MockConnector, MockTransport};
pub use sim::{default_dispatch_table, DeviceSimState};
