//! Line-oriented sessions over a [`Transport`].
//!
//! A [`Session`] binds one open transport to the [`Endpoint`] it was opened
//! for and adds line framing on top of the byte stream. It is the only
//! handle the protocol client sees.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::line::{self, LineDecode, MAX_LINE_LEN};
use crate::transport::Transport;
use crate::types::Endpoint;

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// An open transport bound to exactly one endpoint.
///
/// Dropping a session releases the underlying handle as well; calling
/// [`close`](Session::close) first just makes the release explicit and
/// logged.
pub struct Session {
    endpoint: Endpoint,
    transport: Box<dyn Transport>,
    pending: Vec<u8>,
    state: SessionState,
}

impl Session {
    /// Wrap an already-connected transport.
    pub fn new(endpoint: Endpoint, transport: Box<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
            pending: Vec::new(),
            state: SessionState::Open,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open && self.transport.is_connected()
    }

    /// Send `text` followed by the line terminator.
    pub async fn send_line(&mut self, text: &str) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::NotConnected);
        }
        tracing::debug!(endpoint = %self.endpoint, line = %text, "Sending line");
        self.transport.send(&line::encode_line(text)).await
    }

    /// Receive the next non-empty line, waiting at most `timeout` overall.
    ///
    /// If the deadline passes before a terminator arrives, any partial
    /// bytes are discarded and [`Error::Timeout`] is returned. Bytes that
    /// follow a complete line are kept for the next call.
    pub async fn receive_line(&mut self, timeout: Duration) -> Result<String> {
        if self.state == SessionState::Closed {
            return Err(Error::NotConnected);
        }

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 512];

        loop {
            while let LineDecode::Line { text, consumed } = line::decode_line(&self.pending) {
                self.pending.drain(..consumed);
                if !text.is_empty() {
                    tracing::debug!(endpoint = %self.endpoint, line = %text, "Received line");
                    return Ok(text);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                self.discard_partial();
                return Err(Error::Timeout);
            }

            match self.transport.receive(&mut chunk, deadline - now).await {
                Ok(0) => {
                    // Serial reads may return empty; back off briefly
                    // instead of spinning until the deadline.
                    tokio::time::sleep(Duration::from_millis(5).min(deadline - now)).await;
                }
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    self.drop_overlong();
                }
                Err(Error::Timeout) => {
                    self.discard_partial();
                    return Err(Error::Timeout);
                }
                Err(e) => {
                    self.pending.clear();
                    return Err(e);
                }
            }
        }
    }

    /// Close the session. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        self.pending.clear();
        tracing::debug!(endpoint = %self.endpoint, "Closing session");
        self.transport.close().await
    }

    /// Drop over-long lines from the front of the buffer. Lines that
    /// follow one in the same read are kept.
    fn drop_overlong(&mut self) {
        while self.pending.len() > MAX_LINE_LEN {
            let dropped = match self.pending.iter().position(|&b| b == b'\n') {
                Some(end) if end < MAX_LINE_LEN => break,
                Some(end) => end + 1,
                None => self.pending.len(),
            };
            tracing::warn!(
                endpoint = %self.endpoint,
                len = dropped,
                "line buffer overflow, dropping line"
            );
            self.pending.drain(..dropped);
        }
    }

    fn discard_partial(&mut self) {
        if !self.pending.is_empty() {
            tracing::trace!(
                endpoint = %self.endpoint,
                bytes = self.pending.len(),
                "Discarding partial line after timeout"
            );
            self.pending.clear();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish()
    }
}
