//! Mock controller server for end-to-end testing.
//!
//! [`MockDeviceServer`] listens on a TCP address and simulates the mount
//! controller's line server. The accept loop runs in its own task, and every
//! accepted connection is served by a separate task that owns its own
//! [`DeviceSimState`]. The [`DispatchTable`] is shared read-only.
//!
//! # Example
//!
//! ```no_run
//! use mountlink_test_harness::{MockDeviceServer, ServerConfig};
//!
//! # async fn example() -> mountlink_core::Result<()> {
//! let server = MockDeviceServer::bind("127.0.0.1:0", ServerConfig::default()).await?;
//! let addr = server.local_addr();
//! // ... connect a client to `addr` and exchange lines ...
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mountlink_core::error::{Error, Result};
use mountlink_core::line::{self, LineDecode};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::DispatchTable;
use crate::sim::{default_dispatch_table, DeviceSimState};

/// Longest line read in one go: the line limit plus `\r\n`.
const READ_LIMIT: u64 = line::MAX_LINE_LEN as u64 + 2;

/// Pause after a failed `accept()` (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Mock server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Delay applied before every reply.
    pub response_latency: Duration,
    /// Base seed for per-connection RNGs. Connection `n` uses `seed + n`.
    pub seed: u64,
    pub table: Arc<DispatchTable>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            response_latency: Duration::ZERO,
            seed: 0x4842_3332,
            table: Arc::new(default_dispatch_table()),
        }
    }
}

impl ServerConfig {
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.response_latency = latency;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_table(mut self, table: DispatchTable) -> Self {
        self.table = Arc::new(table);
        self
    }
}

/// A running mock controller.
///
/// Dropping the server cancels it without waiting; call
/// [`shutdown`](MockDeviceServer::shutdown) to wait until every session has
/// closed its socket.
pub struct MockDeviceServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    active: Arc<AtomicUsize>,
    accept_task: Option<JoinHandle<()>>,
}

impl MockDeviceServer {
    /// Bind to `addr` and start accepting connections.
    pub async fn bind(addr: &str, config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            Error::Resource(format!("failed to bind mock device server on {addr}: {e}"))
        })?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let active = Arc::new(AtomicUsize::new(0));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            config,
            cancel.clone(),
            Arc::clone(&active),
        ));

        info!(addr = %local_addr, "Mock device server listening");

        Ok(Self {
            local_addr,
            cancel,
            active,
            accept_task: Some(accept_task),
        })
    }

    /// The bound address (useful after binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently being served.
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop accepting, close every session, and wait for all of them.
    pub async fn shutdown(mut self) {
        debug!(addr = %self.local_addr, "Mock device server shutting down");
        self.cancel.cancel();
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Accept task ended abnormally");
            }
        }
        info!(addr = %self.local_addr, "Mock device server stopped");
    }
}

impl Drop for MockDeviceServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    cancel: CancellationToken,
    active: Arc<AtomicUsize>,
) {
    let mut sessions = JoinSet::new();
    let mut connection_id: u64 = 0;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Session task ended abnormally");
                }
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connection_id += 1;
                    debug!(peer = %peer, id = connection_id, "Accepted connection");
                    sessions.spawn(serve_connection(
                        stream,
                        peer,
                        Arc::clone(&config.table),
                        config.response_latency,
                        config.seed.wrapping_add(connection_id),
                        cancel.clone(),
                        Arc::clone(&active),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }

    drop(listener);
    debug!(sessions = sessions.len(), "Waiting for sessions to close");
    while let Some(joined) = sessions.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Session task ended abnormally");
        }
    }
}

/// Serve one client until it disconnects, errors, or the server stops.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    table: Arc<DispatchTable>,
    latency: Duration,
    seed: u64,
    cancel: CancellationToken,
    active: Arc<AtomicUsize>,
) {
    active.fetch_add(1, Ordering::SeqCst);
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut state = DeviceSimState::new(seed);
    let mut buf = Vec::new();
    // Set while skipping the rest of an over-long line.
    let mut overflowed = false;

    loop {
        buf.clear();
        let mut limited = (&mut reader).take(READ_LIMIT);
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = limited.read_until(b'\n', &mut buf) => read,
        };

        match read {
            Ok(0) => {
                debug!(peer = %peer, "Client closed connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(peer = %peer, error = %e, "Read failed, closing session");
                break;
            }
        }

        let terminated = buf.last() == Some(&b'\n');
        if !terminated && buf.len() as u64 >= READ_LIMIT {
            if !overflowed {
                warn!(peer = %peer, limit = line::MAX_LINE_LEN, "Line too long, discarding");
            }
            overflowed = true;
            continue;
        }

        let reply = if overflowed {
            overflowed = false;
            Some(table.fallback().to_string())
        } else {
            // A final line without a terminator still counts.
            let text = match line::decode_line(&buf) {
                LineDecode::Line { text, .. } => text,
                LineDecode::Incomplete => String::from_utf8_lossy(&buf).trim().to_string(),
            };
            if text.is_empty() {
                continue;
            }
            let reply = table.dispatch(&text, &mut state);
            if reply.is_none() {
                debug!(peer = %peer, line = %text, "No reply for command");
            }
            reply
        };
        let Some(reply) = reply else {
            continue;
        };

        if !latency.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(latency) => {}
            }
        }

        // A client that stops reading fills the socket buffer; shutdown
        // must still get through.
        let encoded = line::encode_line(&reply);
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            written = writer.write_all(&encoded) => written,
        };
        if let Err(e) = written {
            debug!(peer = %peer, error = %e, "Write failed, closing session");
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(peer = %peer, error = %e, "Shutdown of session socket failed");
    }
    active.fetch_sub(1, Ordering::SeqCst);
    debug!(
        peer = %peer,
        commands = state.commands_handled(),
        "Session closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use mountlink_core::{Endpoint, Session};
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(2);

    async fn start(config: ServerConfig) -> MockDeviceServer {
        MockDeviceServer::bind("127.0.0.1:0", config).await.unwrap()
    }

    async fn client(server: &MockDeviceServer) -> Session {
        let endpoint = Endpoint::network("127.0.0.1", server.local_addr().port());
        mountlink_transport::connect(&endpoint, WAIT).await.unwrap()
    }

    async fn ask(session: &mut Session, line: &str) -> String {
        session.send_line(line).await.unwrap();
        session.receive_line(WAIT).await.unwrap()
    }

    #[tokio::test]
    async fn every_command_gets_exactly_one_line() {
        let server = start(ServerConfig::default()).await;
        let mut session = client(&server).await;

        let commands = [
            "MS", "GV", "VERSION", "GA", "GZ", "echo ping", "ECHO ping", "WIFISTATUS", "WIFISCAN",
            "WIFICONNECT", "PING 8.8.8.8", "BTSTATUS", "BTSCAN", "BTPAIR", "GPSSTATUS",
            "GPSCOORDS", "GPSSAT", "GPSTIME", "USBSTATUS", "USBRELAY ON", "USBRELAY OFF",
            "UPTIME", "TEMPERATURE", "MEMORY",
        ];
        for cmd in commands {
            let reply = ask(&mut session, cmd).await;
            assert!(!reply.is_empty(), "{cmd} got an empty reply");
            assert_ne!(reply, "Unknown command#", "{cmd} fell through the table");
        }

        // Nothing extra is queued behind the last reply.
        let extra = session.receive_line(Duration::from_millis(100)).await;
        assert!(matches!(extra, Err(Error::Timeout)));

        session.close().await.unwrap();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_command_keeps_session_usable() {
        let server = start(ServerConfig::default()).await;
        let mut session = client(&server).await;

        assert_eq!(ask(&mut session, "ZZZ").await, "Unknown command#");
        assert_eq!(ask(&mut session, "MS").await, "Idle#");
        assert_eq!(ask(&mut session, "ms").await, "Unknown command#");
        assert_eq!(ask(&mut session, "GV").await, "HB3.2.1#");

        session.close().await.unwrap();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_sessions_do_not_cross_talk() {
        let server = start(ServerConfig::default().with_latency(Duration::from_millis(20))).await;
        let port = server.local_addr().port();

        let mut tasks = JoinSet::new();
        for i in 0..12 {
            tasks.spawn(async move {
                let endpoint = Endpoint::network("127.0.0.1", port);
                let mut session = mountlink_transport::connect(&endpoint, WAIT).await.unwrap();
                let tag = format!("client-{i}");
                for _ in 0..3 {
                    assert_eq!(ask(&mut session, &format!("echo {tag}")).await, tag);
                    if i % 2 == 0 {
                        assert_eq!(ask(&mut session, "GV").await, "HB3.2.1#");
                    } else {
                        assert_eq!(ask(&mut session, "GA").await, "+45.0000#");
                    }
                }
                session.close().await.unwrap();
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        server.shutdown().await;
    }

    #[tokio::test]
    async fn relay_state_is_per_connection() {
        let server = start(ServerConfig::default()).await;
        let mut a = client(&server).await;
        let mut b = client(&server).await;

        assert_eq!(ask(&mut a, "USBRELAY ON").await, r#"{"relay":"ON"}"#);
        assert_eq!(ask(&mut a, "USBSTATUS").await, r#"{"relay":"ON"}"#);
        assert_eq!(ask(&mut b, "USBSTATUS").await, r#"{"relay":"OFF"}"#);

        a.close().await.unwrap();
        b.close().await.unwrap();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn silent_entry_times_out_client() {
        let table = default_dispatch_table().on_silent("HANG");
        let server = start(ServerConfig::default().with_table(table)).await;
        let mut session = client(&server).await;

        session.send_line("HANG").await.unwrap();
        let started = Instant::now();
        let result = session.receive_line(Duration::from_millis(300)).await;
        let elapsed = started.elapsed();
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(elapsed >= Duration::from_millis(250), "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "returned late: {elapsed:?}");

        // The session survives a withheld reply.
        assert_eq!(ask(&mut session, "MS").await, "Idle#");

        session.close().await.unwrap();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn response_latency_is_applied() {
        let server = start(ServerConfig::default().with_latency(Duration::from_millis(100))).await;
        let mut session = client(&server).await;

        let started = Instant::now();
        assert_eq!(ask(&mut session, "MS").await, "Idle#");
        assert!(started.elapsed() >= Duration::from_millis(90));

        session.close().await.unwrap();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_sessions_while_client_waits() {
        let table = default_dispatch_table().on_silent("HANG");
        let server = start(ServerConfig::default().with_table(table)).await;
        let mut session = client(&server).await;

        // Make sure the session task is running before shutting down.
        assert_eq!(ask(&mut session, "MS").await, "Idle#");
        assert_eq!(server.active_sessions(), 1);

        session.send_line("HANG").await.unwrap();
        let waiter = tokio::spawn(async move {
            let started = Instant::now();
            let result = session.receive_line(WAIT).await;
            session.close().await.unwrap();
            (result, started.elapsed())
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown().await;

        let (result, elapsed) = waiter.await.unwrap();
        assert!(
            matches!(result, Err(Error::ConnectionLost) | Err(Error::Timeout)),
            "unexpected result: {result:?}"
        );
        assert!(elapsed <= WAIT + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn overlong_line_is_rejected_and_session_survives() {
        let server = start(ServerConfig::default()).await;
        let mut session = client(&server).await;

        let noise = "x".repeat(3 * line::MAX_LINE_LEN);
        assert_eq!(ask(&mut session, &noise).await, "Unknown command#");
        assert_eq!(ask(&mut session, "MS").await, "Idle#");

        session.close().await.unwrap();
        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_completes_while_client_stops_reading() {
        let server = start(ServerConfig::default()).await;
        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();

        // Flood echo requests and never read the replies.
        let flood = tokio::spawn(async move {
            let request = format!("echo {}\r\n", "x".repeat(8000));
            for _ in 0..4000 {
                if stream.write_all(request.as_bytes()).await.is_err() {
                    break;
                }
            }
            stream
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        let stopped = tokio::time::timeout(Duration::from_secs(3), server.shutdown()).await;
        flood.abort();
        assert!(stopped.is_ok(), "shutdown hung on a client that stopped reading");
    }

    #[tokio::test]
    async fn shutdown_waits_for_all_sessions() {
        let server = start(ServerConfig::default()).await;
        let mut sessions = Vec::new();
        for _ in 0..4 {
            let mut s = client(&server).await;
            assert_eq!(ask(&mut s, "MS").await, "Idle#");
            sessions.push(s);
        }
        assert_eq!(server.active_sessions(), 4);

        let active = Arc::clone(&server.active);
        server.shutdown().await;
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}
