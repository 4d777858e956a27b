//! Error types for mountlink.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer and
//! local resource errors are all captured here, and each one maps onto a
//! [`FailureKind`] so results can carry a diagnosis instead of a raw message.

use serde::{Deserialize, Serialize};

/// Why a connection to the device could not be established.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionFailure {
    /// The remote host actively refused the TCP connection.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The remote host could not be resolved or reached.
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// The named serial port is not present on this machine.
    #[error("serial port {0} not found")]
    PortNotFound(String),

    /// The serial port exists but is held open by another process.
    #[error("serial port {0} is busy")]
    PortBusy(String),
}

/// The error type for all mountlink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport could not be connected.
    #[error("connection error: {0}")]
    Connection(ConnectionFailure),

    /// Timed out waiting for the device.
    ///
    /// Partial data received before the deadline is discarded, so this is
    /// reported even when some bytes without a line terminator arrived.
    #[error("timeout waiting for response")]
    Timeout,

    /// The device answered with a well-formed line that did not match.
    #[error("protocol mismatch: expected {expected}, got {got:?}")]
    ProtocolMismatch { expected: String, got: String },

    /// A protocol-level error (malformed line, bad payload).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A local resource (serial handle, socket) could not be acquired.
    #[error("resource error: {0}")]
    Resource(String),

    /// An invalid parameter was passed to an operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The session has been closed.
    #[error("not connected")]
    NotConnected,

    /// The peer closed the connection or the stream broke.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure taxonomy used for diagnosis and remediation hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    ConnectionError,
    TimeoutError,
    ProtocolMismatch,
    ResourceError,
    UnexpectedException,
}

impl Error {
    /// Classify this error into the failure taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Connection(_) | Error::NotConnected | Error::ConnectionLost | Error::Io(_) => {
                FailureKind::ConnectionError
            }
            Error::Timeout => FailureKind::TimeoutError,
            Error::ProtocolMismatch { .. } | Error::Protocol(_) => FailureKind::ProtocolMismatch,
            Error::Resource(_) => FailureKind::ResourceError,
            Error::InvalidParameter(_) => FailureKind::UnexpectedException,
        }
    }

    /// A short operator-facing hint for fixing this failure, if one applies.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Error::Connection(ConnectionFailure::Refused(_))
            | Error::Connection(ConnectionFailure::Unreachable(_)) => {
                Some("check firewall/port: the device must accept TCP connections on the configured port")
            }
            Error::Connection(ConnectionFailure::PortNotFound(_)) => {
                Some("verify serial cable and USB-serial driver (CH340, CP210x, FTDI)")
            }
            Error::Connection(ConnectionFailure::PortBusy(_)) => {
                Some("close other programs holding the serial port")
            }
            Error::Resource(_) => Some("verify serial cable and port permissions"),
            Error::Timeout => Some("verify the device is powered on and the baud rate matches"),
            Error::ProtocolMismatch { .. } | Error::Protocol(_) => {
                Some("check the device firmware version and supported command set")
            }
            Error::ConnectionLost | Error::NotConnected | Error::Io(_) => {
                Some("check cabling and network stability")
            }
            Error::InvalidParameter(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_connection_refused() {
        let e = Error::Connection(ConnectionFailure::Refused("127.0.0.1:2000".into()));
        assert_eq!(
            e.to_string(),
            "connection error: connection refused: 127.0.0.1:2000"
        );
    }

    #[test]
    fn error_display_port_not_found() {
        let e = Error::Connection(ConnectionFailure::PortNotFound("COM250".into()));
        assert!(e.to_string().contains("not found"));
        assert!(e.to_string().contains("COM250"));
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
    }

    #[test]
    fn error_display_mismatch() {
        let e = Error::ProtocolMismatch {
            expected: "substring \"Idle\"".into(),
            got: "Unknown command#".into(),
        };
        assert_eq!(
            e.to_string(),
            "protocol mismatch: expected substring \"Idle\", got \"Unknown command#\""
        );
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            Error::Connection(ConnectionFailure::PortBusy("COM3".into())).kind(),
            FailureKind::ConnectionError
        );
        assert_eq!(Error::Timeout.kind(), FailureKind::TimeoutError);
        assert_eq!(
            Error::Protocol("bad".into()).kind(),
            FailureKind::ProtocolMismatch
        );
        assert_eq!(
            Error::Resource("denied".into()).kind(),
            FailureKind::ResourceError
        );
        assert_eq!(
            Error::InvalidParameter("x".into()).kind(),
            FailureKind::UnexpectedException
        );
    }

    #[test]
    fn remediation_for_network_and_serial() {
        let net = Error::Connection(ConnectionFailure::Refused("host".into()));
        assert!(net.remediation().unwrap().contains("firewall/port"));

        let serial = Error::Connection(ConnectionFailure::PortNotFound("COM9".into()));
        assert!(serial.remediation().unwrap().contains("serial cable"));

        let resource = Error::Resource("open failed".into());
        assert!(resource.remediation().unwrap().contains("serial cable"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
