//! Serial port transport for directly cabled controllers.
//!
//! This module provides [`SerialTransport`], which implements the
//! [`Transport`] trait for USB virtual COM ports and RS-232 connections.
//! HomeBrew boards default to 9600 baud, 8N1.
//!
//! # Example
//!
//! ```no_run
//! use mountlink_transport::SerialTransport;
//! use mountlink_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> mountlink_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 9600).await?;
//! transport.send(b"VERSION\r\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use mountlink_core::error::{ConnectionFailure, Error, Result};
use mountlink_core::transport::Transport;
use mountlink_core::types::{DataBits, FlowControl, Parity, SerialParams, StopBits};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::ports;

/// Serial port transport to a controller.
pub struct SerialTransport {
    /// The underlying serial stream, `None` after `close()`.
    port: Option<SerialStream>,
    /// Port name for logging.
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port at `baud_rate` with otherwise default settings (8N1).
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        Self::open_with_params(port, &SerialParams::default().with_baud_rate(baud_rate)).await
    }

    /// Open a serial port with full line settings.
    ///
    /// Fails with [`ConnectionFailure::PortNotFound`] without touching the
    /// port when its name is not known to the OS, and with
    /// [`ConnectionFailure::PortBusy`] when another process holds it.
    pub async fn open_with_params(port: &str, params: &SerialParams) -> Result<Self> {
        tracing::debug!(
            port = %port,
            baud_rate = params.baud_rate,
            data_bits = ?params.data_bits,
            parity = ?params.parity,
            stop_bits = ?params.stop_bits,
            flow_control = ?params.flow_control,
            "Opening serial port"
        );

        if !ports::port_exists(port) {
            tracing::error!(port = %port, "Serial port not found");
            return Err(Error::Connection(ConnectionFailure::PortNotFound(
                port.to_string(),
            )));
        }

        let stream = tokio_serial::new(port, params.baud_rate)
            .data_bits(data_bits(params.data_bits))
            .parity(parity(params.parity))
            .stop_bits(stop_bits(params.stop_bits))
            .flow_control(flow_control(params.flow_control))
            .open_native_async()
            .map_err(|e| {
                tracing::error!(port = %port, error = %e, "Failed to open serial port");
                map_open_error(e, port)
            })?;

        tracing::info!(port = %port, baud_rate = params.baud_rate, "Serial port opened");

        Ok(Self {
            port: Some(stream),
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(
            port = %self.port_name,
            bytes = data.len(),
            data = ?data,
            "Sending data"
        );

        port.write_all(data).await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to send data");
            map_io_error(e)
        })?;

        port.flush().await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to flush serial port");
            map_io_error(e)
        })?;

        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(n)) => {
                tracing::trace!(
                    port = %self.port_name,
                    bytes = n,
                    data = ?&buf[..n],
                    "Received data"
                );
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::error!(port = %self.port_name, error = %e, "Failed to receive data");
                Err(map_io_error(e))
            }
            Err(_) => {
                tracing::trace!(
                    port = %self.port_name,
                    timeout_ms = timeout.as_millis(),
                    "Timeout waiting for data"
                );
                Err(Error::Timeout)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            tracing::debug!(port = %self.port_name, "Closing serial port");

            if let Err(e) = port.flush().await {
                tracing::warn!(
                    port = %self.port_name,
                    error = %e,
                    "Failed to flush before closing (continuing anyway)"
                );
            }

            // Dropping the stream releases the OS handle.
            drop(port);
            tracing::info!(port = %self.port_name, "Serial port closed");
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.port.is_some() {
            tracing::debug!(port = %self.port_name, "SerialTransport dropped, closing port");
        }
    }
}

fn data_bits(bits: DataBits) -> tokio_serial::DataBits {
    match bits {
        DataBits::Five => tokio_serial::DataBits::Five,
        DataBits::Six => tokio_serial::DataBits::Six,
        DataBits::Seven => tokio_serial::DataBits::Seven,
        DataBits::Eight => tokio_serial::DataBits::Eight,
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

fn stop_bits(bits: StopBits) -> tokio_serial::StopBits {
    match bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
    }
}

fn flow_control(flow: FlowControl) -> tokio_serial::FlowControl {
    match flow {
        FlowControl::None => tokio_serial::FlowControl::None,
        FlowControl::Software => tokio_serial::FlowControl::Software,
        FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
    }
}

/// Map an open failure to the connection/resource taxonomy.
fn map_open_error(e: tokio_serial::Error, port: &str) -> Error {
    use std::io::ErrorKind as IoKind;
    use tokio_serial::ErrorKind;

    let lower = e.description.to_ascii_lowercase();
    match e.kind {
        ErrorKind::NoDevice => Error::Connection(ConnectionFailure::PortNotFound(port.to_string())),
        ErrorKind::Io(IoKind::NotFound) => {
            Error::Connection(ConnectionFailure::PortNotFound(port.to_string()))
        }
        ErrorKind::Io(IoKind::PermissionDenied) | ErrorKind::Io(IoKind::AddrInUse) => {
            Error::Connection(ConnectionFailure::PortBusy(port.to_string()))
        }
        _ if lower.contains("busy") || lower.contains("access is denied") => {
            Error::Connection(ConnectionFailure::PortBusy(port.to_string()))
        }
        _ => Error::Resource(format!("failed to open serial port {port}: {e}")),
    }
}

fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::NotConnected => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}
