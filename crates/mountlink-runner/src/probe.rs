//! Serial baud rate probing.
//!
//! The controller does not announce its baud rate. [`probe_baud`] opens the
//! port at each candidate rate in turn and sends a couple of harmless
//! commands; the first rate that gets any complete line back wins. A
//! missing or busy port ends the probe at once since no other rate can fix
//! that.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use mountlink_core::error::{ConnectionFailure, Error, Result};
use mountlink_core::{Endpoint, SerialParams, Session};
use mountlink_protocol::{Command, ProtocolClient};

/// Commands tried at each baud rate, in order.
pub const PROBE_COMMANDS: &[Command] = &[Command::Version, Command::MountStatus];

/// What happened at one baud rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaudAttempt {
    pub baud: u32,
    pub responded: bool,
    /// The reply line, or why there was none.
    pub detail: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ProbeReport {
    pub attempts: Vec<BaudAttempt>,
    /// The first baud rate that answered.
    pub selected: Option<u32>,
    /// Set when the port itself could not be used.
    #[serde(skip)]
    pub port_error: Option<Error>,
}

fn is_port_fatal(error: &Error) -> bool {
    mountlink_transport::is_absent(error)
        || matches!(error, Error::Connection(ConnectionFailure::PortBusy(_)))
}

/// Try each of `candidates` with sessions from `open`.
///
/// Each probe command gets `timeout` to answer.
pub async fn probe_baud<F, Fut>(candidates: &[u32], mut open: F, timeout: Duration) -> ProbeReport
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Session>>,
{
    let client = ProtocolClient::new();
    let mut report = ProbeReport::default();

    for &baud in candidates {
        let mut session = match open(baud).await {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!(baud, error = %e, "Cannot open port for probing");
                report.attempts.push(BaudAttempt {
                    baud,
                    responded: false,
                    detail: e.to_string(),
                });
                if is_port_fatal(&e) {
                    report.port_error = Some(e);
                    break;
                }
                continue;
            }
        };

        let mut attempt = BaudAttempt {
            baud,
            responded: false,
            detail: String::new(),
        };
        for command in PROBE_COMMANDS {
            match client.query(&mut session, command, timeout).await {
                Ok(line) => {
                    attempt.responded = true;
                    attempt.detail = line;
                    break;
                }
                Err(e) => attempt.detail = format!("{command}: {e}"),
            }
        }
        if let Err(e) = session.close().await {
            tracing::warn!(baud, error = %e, "Failed to close probe session");
        }

        tracing::info!(baud, responded = attempt.responded, detail = %attempt.detail, "Baud probed");
        let responded = attempt.responded;
        report.attempts.push(attempt);
        if responded {
            report.selected = Some(baud);
            break;
        }
    }

    report
}

/// Probe a real serial port at each of `candidates`.
///
/// Framing other than the baud rate is taken from `params`.
pub async fn probe_serial(
    port_name: &str,
    params: &SerialParams,
    candidates: &[u32],
    timeout: Duration,
) -> ProbeReport {
    probe_baud(
        candidates,
        |baud| {
            let endpoint = Endpoint::Serial {
                port_name: port_name.to_string(),
                params: params.with_baud_rate(baud),
            };
            async move { mountlink_transport::connect(&endpoint, timeout).await }
        },
        timeout,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use mountlink_test_harness::MockTransport;

    fn session(mock: MockTransport) -> Session {
        Session::new(Endpoint::serial("COM3", 9600), Box::new(mock))
    }

    const T: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn first_answering_baud_wins() {
        let report = probe_baud(
            &[9600, 115_200, 57_600],
            |baud| async move {
                let mut mock = MockTransport::new();
                if baud == 115_200 {
                    mock.expect("VERSION", r#"{"firmware":"3.2.1"}"#);
                } else {
                    mock.expect_silence("VERSION");
                    mock.expect_silence("MS");
                }
                Ok(session(mock))
            },
            T,
        )
        .await;

        assert_eq!(report.selected, Some(115_200));
        assert_eq!(report.attempts.len(), 2);
        assert!(!report.attempts[0].responded);
        assert!(report.attempts[1].detail.contains("firmware"));
        assert!(report.port_error.is_none());
    }

    #[tokio::test]
    async fn second_probe_command_counts() {
        let report = probe_baud(
            &[38_400],
            |_| async {
                let mut mock = MockTransport::new();
                mock.expect("VERSION", "Unknown command#");
                Ok(session(mock))
            },
            T,
        )
        .await;
        // Any complete line means the framing is right.
        assert_eq!(report.selected, Some(38_400));
    }

    #[tokio::test]
    async fn missing_port_stops_probing() {
        let mut opened = Vec::new();
        let report = probe_baud(
            &[9600, 115_200],
            |baud| {
                opened.push(baud);
                async {
                    Err(Error::Connection(ConnectionFailure::PortNotFound(
                        "COM250".into(),
                    )))
                }
            },
            T,
        )
        .await;

        assert_eq!(opened, vec![9600]);
        assert_eq!(report.selected, None);
        assert!(report.attempts[0].detail.contains("not found"));
        assert!(report.port_error.is_some());
    }

    #[tokio::test]
    async fn nothing_answers() {
        let report = probe_baud(
            &[9600, 19_200],
            |_| async {
                let mut mock = MockTransport::new();
                mock.expect_silence("VERSION");
                mock.expect_silence("MS");
                Ok(session(mock))
            },
            T,
        )
        .await;
        assert_eq!(report.selected, None);
        assert_eq!(report.attempts.len(), 2);
        assert!(report.port_error.is_none());
        assert_eq!(serde_json::to_value(&report).unwrap()["selected"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn busy_port_stops_probing() {
        let mut opened = 0;
        let report = probe_baud(
            &[9600, 115_200],
            |_| {
                opened += 1;
                async { Err(Error::Connection(ConnectionFailure::PortBusy("COM3".into()))) }
            },
            T,
        )
        .await;
        assert_eq!(opened, 1);
        assert!(report.port_error.is_some());
    }

    #[tokio::test]
    async fn unreachable_host_does_not_stop_probing() {
        let mut opened = 0;
        let report = probe_baud(
            &[9600, 115_200],
            |_| {
                opened += 1;
                async { Err(Error::Connection(ConnectionFailure::Unreachable("x".into()))) }
            },
            T,
        )
        .await;
        assert_eq!(opened, 2);
        assert!(report.port_error.is_none());
    }

    #[tokio::test]
    async fn absent_serial_port() {
        let report = probe_serial("COM250", &SerialParams::default(), &[9600, 115_200], T).await;
        assert_eq!(report.attempts.len(), 1);
        assert!(report.port_error.is_some());
    }
}
