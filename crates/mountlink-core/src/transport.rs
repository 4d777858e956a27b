//! Transport traits for device communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the mount
//! controller. Implementations exist for TCP sockets and serial ports in
//! `mountlink-transport`, and a scripted mock lives in
//! `mountlink-test-harness`.
//!
//! [`Connect`] produces fresh [`Session`]s for one endpoint. The test runner
//! holds a `Connect` rather than a session so it can reopen the link after a
//! timeout or a broken stream.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::session::Session;
use crate::types::Endpoint;

/// Asynchronous byte-level transport to the device.
///
/// Protocol-level concerns (line framing, the `#` sentinel) are handled by
/// [`Session`] and the protocol crate, not here.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the device.
    ///
    /// Implementations should not return until all bytes have been written
    /// to the underlying stream.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the device into the provided buffer.
    ///
    /// Returns the number of bytes read. Will wait up to `timeout` for data;
    /// returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrives before the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport and release the OS-level handle.
    ///
    /// Closing twice is a no-op. After closing, `send()` and `receive()`
    /// return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// Opens sessions to a single fixed endpoint.
#[async_trait]
pub trait Connect: Send + Sync {
    /// Open a new session, bounded by the connector's own timeout.
    async fn connect(&self) -> Result<Session>;

    /// The endpoint every session from this connector is bound to.
    fn endpoint(&self) -> &Endpoint;
}
