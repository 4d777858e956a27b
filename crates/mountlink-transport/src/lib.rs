//! Transport implementations for mountlink.
//!
//! This crate provides concrete implementations of the
//! [`Transport`](mountlink_core::Transport) trait and the glue that turns an
//! [`Endpoint`] into an open [`Session`]:
//!
//! - [`TcpTransport`]: the controller's TCP line server (port 2000)
//! - [`SerialTransport`]: USB virtual COM ports and RS-232 links
//! - [`ports`]: serial port enumeration and controller detection
//! - [`connect`] / [`EndpointConnector`]: endpoint to session
//!
//! # Example
//!
//! ```no_run
//! use mountlink_core::Endpoint;
//! use std::time::Duration;
//!
//! # async fn example() -> mountlink_core::Result<()> {
//! let endpoint = Endpoint::network("127.0.0.1", 2000);
//! let mut session = mountlink_transport::connect(&endpoint, Duration::from_secs(3)).await?;
//! session.send_line("MS").await?;
//! let reply = session.receive_line(Duration::from_secs(2)).await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod ports;
pub mod serial;
pub mod tcp;

use std::time::Duration;

use async_trait::async_trait;
use mountlink_core::error::{ConnectionFailure, Error, Result};
use mountlink_core::transport::Connect;
use mountlink_core::{Endpoint, Session};

pub use ports::{PortInfo, PortKind, detect_device_port, list_ports};
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

/// Open a session to `endpoint`, giving up after `timeout`.
pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Session> {
    match endpoint {
        Endpoint::Network { host, port } => {
            let addr = format!("{host}:{port}");
            let transport = TcpTransport::connect_with_timeout(&addr, timeout).await?;
            Ok(Session::new(endpoint.clone(), Box::new(transport)))
        }
        Endpoint::Serial { port_name, params } => {
            let open = SerialTransport::open_with_params(port_name, params);
            let transport = tokio::time::timeout(timeout, open).await.map_err(|_| {
                Error::Resource(format!(
                    "opening serial port {port_name} timed out after {} ms",
                    timeout.as_millis()
                ))
            })??;
            Ok(Session::new(endpoint.clone(), Box::new(transport)))
        }
    }
}

/// [`Connect`] implementation for a real endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConnector {
    endpoint: Endpoint,
    timeout: Duration,
}

impl EndpointConnector {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }
}

#[async_trait]
impl Connect for EndpointConnector {
    async fn connect(&self) -> Result<Session> {
        connect(&self.endpoint, self.timeout).await
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// Whether `error` means the target cannot exist at all, as opposed to
/// being temporarily unreachable.
pub fn is_absent(error: &Error) -> bool {
    matches!(
        error,
        Error::Connection(ConnectionFailure::PortNotFound(_))
    )
}
