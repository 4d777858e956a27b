//! Scripted line transport for deterministic protocol tests.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/reply pairs expressed as lines, so the protocol client and the
//! runner can be tested without sockets. [`MockConnector`] hands out
//! prepared transports as [`Session`]s and counts how often it was asked.
//!
//! # Example
//!
//! ```
//! use mountlink_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the client sends "MS\r\n", reply with "Idle#\r\n".
//! mock.expect("MS", "Idle#");
//! // When the client sends "GA\r\n", say nothing.
//! mock.expect_silence("GA");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use mountlink_core::error::{ConnectionFailure, Error, Result};
use mountlink_core::line::{encode_line, LINE_TERMINATOR};
use mountlink_core::transport::{Connect, Transport};
use mountlink_core::{Endpoint, Session};

/// What the mock does after a matching request.
#[derive(Debug, Clone)]
enum Reply {
    /// Return these bytes from the following `receive()` calls.
    Bytes(Vec<u8>),
    /// Return nothing; `receive()` times out.
    Silence,
    /// Behave as if the peer hung up.
    Disconnect,
}

/// A pre-loaded request/reply pair.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent, terminator included.
    request: Vec<u8>,
    reply: Reply,
}

/// A mock [`Transport`] that speaks in lines.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// bytes are recorded and matched against the next expectation; its reply
/// is then served by subsequent `receive()` calls.
///
/// Sending something unexpected, or sending with the queue exhausted,
/// returns [`Error::Protocol`].
#[derive(Debug)]
pub struct MockTransport {
    expectations: VecDeque<Expectation>,
    /// Reply bytes not yet handed out.
    pending: Option<Vec<u8>>,
    cursor: usize,
    /// Set after a `Disconnect` reply has been triggered.
    hung_up: bool,
    connected: bool,
    sent_log: Vec<Vec<u8>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            expectations: VecDeque::new(),
            pending: None,
            cursor: 0,
            hung_up: false,
            connected: true,
            sent_log: Vec::new(),
        }
    }

    /// Expect `request` as a line and reply with `response` as a line.
    pub fn expect(&mut self, request: &str, response: &str) {
        self.push(request, Reply::Bytes(encode_line(response)));
    }

    /// Expect `request` as a line and reply with raw bytes (which may lack a
    /// terminator).
    pub fn expect_raw(&mut self, request: &str, response: &[u8]) {
        self.push(request, Reply::Bytes(response.to_vec()));
    }

    /// Expect `request` as a line and never reply.
    pub fn expect_silence(&mut self, request: &str) {
        self.push(request, Reply::Silence);
    }

    /// Expect `request` as a line, then report the peer as gone.
    pub fn expect_disconnect(&mut self, request: &str) {
        self.push(request, Reply::Disconnect);
    }

    fn push(&mut self, request: &str, reply: Reply) {
        self.expectations.push_back(Expectation {
            request: encode_line(request),
            reply,
        });
    }

    /// All data sent through this transport, one element per `send()`.
    pub fn sent_data(&self) -> &[Vec<u8>] {
        &self.sent_log
    }

    /// Sent data decoded as lines, terminators removed.
    pub fn sent_lines(&self) -> Vec<String> {
        self.sent_log
            .iter()
            .map(|bytes| {
                String::from_utf8_lossy(bytes)
                    .trim_end_matches(LINE_TERMINATOR)
                    .to_string()
            })
            .collect()
    }

    /// Number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    /// Set the connected state.
    ///
    /// When `false`, `send()` and `receive()` return
    /// [`Error::NotConnected`].
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.hung_up {
            return Err(Error::ConnectionLost);
        }

        self.sent_log.push(data.to_vec());

        let Some(expectation) = self.expectations.pop_front() else {
            return Err(Error::Protocol(
                "no more expectations in mock transport".into(),
            ));
        };
        if data != expectation.request.as_slice() {
            return Err(Error::Protocol(format!(
                "unexpected send data: expected {:?}, got {:?}",
                String::from_utf8_lossy(&expectation.request),
                String::from_utf8_lossy(data)
            )));
        }

        self.cursor = 0;
        self.pending = None;
        match expectation.reply {
            Reply::Bytes(bytes) => self.pending = Some(bytes),
            Reply::Silence => {}
            Reply::Disconnect => self.hung_up = true,
        }
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if self.hung_up {
            return Err(Error::ConnectionLost);
        }

        let Some(reply) = self.pending.as_ref() else {
            return Err(Error::Timeout);
        };

        let remaining = &reply[self.cursor..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        if self.cursor >= reply.len() {
            self.pending = None;
            self.cursor = 0;
        }
        if n == 0 {
            return Err(Error::Timeout);
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending = None;
        self.cursor = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// A [`Connect`] implementation that hands out prepared mock transports.
///
/// Each `connect()` takes the next queued transport. Once the queue is
/// empty, further connects are refused, which is how tests model a device
/// that went away.
#[derive(Debug)]
pub struct MockConnector {
    endpoint: Endpoint,
    queue: Mutex<VecDeque<MockTransport>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            queue: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
        }
    }

    /// Queue a transport for the next `connect()`.
    pub fn with_transport(mut self, transport: MockTransport) -> Self {
        self.queue.get_mut().push_back(transport);
        self
    }

    /// Number of `connect()` calls so far, successful or not.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connect for MockConnector {
    async fn connect(&self) -> Result<Session> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.queue.lock().await.pop_front() {
            Some(transport) => Ok(Session::new(self.endpoint.clone(), Box::new(transport))),
            None => Err(Error::Connection(ConnectionFailure::Refused(
                self.endpoint.to_string(),
            ))),
        }
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic_send_receive() {
        let mut mock = MockTransport::new();
        mock.expect("MS", "Idle#");

        mock.send(b"MS\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"Idle#\r\n");
    }

    #[tokio::test]
    async fn tracks_sent_lines() {
        let mut mock = MockTransport::new();
        mock.expect("GV", "HB3.2.1#");
        mock.expect("GA", "+45.0000#");

        mock.send(b"GV\r\n").await.unwrap();
        mock.send(b"GA\r\n").await.unwrap();

        assert_eq!(mock.sent_data().len(), 2);
        assert_eq!(mock.sent_lines(), vec!["GV", "GA"]);
    }

    #[tokio::test]
    async fn wrong_data_errors() {
        let mut mock = MockTransport::new();
        mock.expect("MS", "Idle#");

        let result = mock.send(b"GV\r\n").await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn no_expectations_errors() {
        let mut mock = MockTransport::new();
        assert!(matches!(mock.send(b"MS\r\n").await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn silence_times_out() {
        let mut mock = MockTransport::new();
        mock.expect_silence("GA");
        mock.send(b"GA\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn disconnect_reports_connection_lost() {
        let mut mock = MockTransport::new();
        mock.expect_disconnect("MS");
        mock.send(b"MS\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::ConnectionLost)));
        assert!(matches!(mock.send(b"MS\r\n").await, Err(Error::ConnectionLost)));
    }

    #[tokio::test]
    async fn partial_receive() {
        let mut mock = MockTransport::new();
        mock.expect("GV", "HB3.2.1#");
        mock.send(b"GV\r\n").await.unwrap();

        let mut buf = [0u8; 4];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"HB3.");
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"2.1#");
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], b"\r\n");
    }

    #[tokio::test]
    async fn close_blocks_io() {
        let mut mock = MockTransport::new();
        mock.close().await.unwrap();
        assert!(!mock.is_connected());
        assert!(matches!(mock.send(b"MS\r\n").await, Err(Error::NotConnected)));

        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn connector_hands_out_queue_then_refuses() {
        let mut first = MockTransport::new();
        first.expect("MS", "Idle#");
        let connector = MockConnector::new(Endpoint::network("127.0.0.1", 2000))
            .with_transport(first)
            .with_transport(MockTransport::new());

        assert!(connector.connect().await.is_ok());
        assert!(connector.connect().await.is_ok());
        let third = connector.connect().await;
        assert!(matches!(
            third,
            Err(Error::Connection(ConnectionFailure::Refused(_)))
        ));
        assert_eq!(connector.connects(), 3);
    }
}
