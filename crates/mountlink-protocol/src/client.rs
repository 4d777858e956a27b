//! Command/response exchanges and their classification.
//!
//! [`ProtocolClient::exchange`] runs one attempt of a [`TestCase`] over an
//! open [`Session`] and classifies what happened:
//!
//! | outcome                                   | status    |
//! |-------------------------------------------|-----------|
//! | the command could not be sent             | `Error`   |
//! | no complete line within the timeout       | `Timeout` |
//! | the stream broke while waiting            | `Error`   |
//! | a line that satisfies the expectation     | `Pass`    |
//! | a well-formed line that does not          | `Fail`    |
//!
//! A `Fail` is a protocol mismatch: the device answered, just not with what
//! was expected. It is reported separately from connectivity problems.

use std::time::Duration;

use tokio::time::Instant;

use mountlink_core::error::{Error, Result};
use mountlink_core::{Session, TestCase, TestResult, TestStatus};

use crate::command::Command;

/// The outcome of one exchange attempt.
#[derive(Debug)]
pub struct Exchange {
    pub status: TestStatus,
    pub detail: String,
    /// The line received, if any.
    pub response: Option<String>,
    /// The error behind a non-`Pass` status.
    pub error: Option<Error>,
    pub elapsed: Duration,
}

impl Exchange {
    /// Whether the session may carry stale or missing data after this
    /// exchange and should be reopened before the next one.
    pub fn session_suspect(&self) -> bool {
        matches!(self.status, TestStatus::Timeout | TestStatus::Error)
    }

    /// Turn this attempt into the final result for `case`.
    pub fn into_result(self, case: &TestCase, attempts: u32) -> TestResult {
        let mut result = TestResult::new(case.name(), self.status, self.detail)
            .critical(case.is_critical())
            .with_attempts(attempts)
            .with_duration(self.elapsed);
        if let Some(response) = self.response {
            result = result.with_response(response);
        }
        if let Some(error) = &self.error {
            result = result.with_failure(error);
        }
        result
    }
}

/// Runs exchanges over a [`Session`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolClient;

impl ProtocolClient {
    pub fn new() -> Self {
        ProtocolClient
    }

    /// Send `case`'s command and classify the reply.
    pub async fn exchange(&self, session: &mut Session, case: &TestCase) -> Exchange {
        let started = Instant::now();

        if let Err(e) = session.send_line(case.command()).await {
            tracing::debug!(test = case.name(), error = %e, "Send failed");
            return Exchange {
                status: TestStatus::Error,
                detail: format!("could not send {:?}: {e}", case.command()),
                response: None,
                error: Some(e),
                elapsed: started.elapsed(),
            };
        }

        match session.receive_line(case.timeout()).await {
            Ok(line) if case.expected().matches(&line) => {
                tracing::debug!(test = case.name(), response = %line, "Exchange passed");
                Exchange {
                    status: TestStatus::Pass,
                    detail: format!("{} matched", case.expected()),
                    response: Some(line),
                    error: None,
                    elapsed: started.elapsed(),
                }
            }
            Ok(line) => {
                let error = Error::ProtocolMismatch {
                    expected: case.expected().to_string(),
                    got: line.clone(),
                };
                tracing::debug!(test = case.name(), response = %line, "Protocol mismatch");
                Exchange {
                    status: TestStatus::Fail,
                    detail: error.to_string(),
                    response: Some(line),
                    error: Some(error),
                    elapsed: started.elapsed(),
                }
            }
            Err(Error::Timeout) => {
                tracing::debug!(
                    test = case.name(),
                    timeout_ms = case.timeout().as_millis(),
                    "No response"
                );
                Exchange {
                    status: TestStatus::Timeout,
                    detail: format!(
                        "no response to {:?} within {} ms",
                        case.command(),
                        case.timeout().as_millis()
                    ),
                    response: None,
                    error: Some(Error::Timeout),
                    elapsed: started.elapsed(),
                }
            }
            Err(e) => {
                tracing::debug!(test = case.name(), error = %e, "Receive failed");
                Exchange {
                    status: TestStatus::Error,
                    detail: format!("{e} while waiting for reply to {:?}", case.command()),
                    response: None,
                    error: Some(e),
                    elapsed: started.elapsed(),
                }
            }
        }
    }

    /// Send one command and return the raw reply line.
    pub async fn query(
        &self,
        session: &mut Session,
        command: &Command,
        timeout: Duration,
    ) -> Result<String> {
        session.send_line(&command.as_line()).await?;
        session.receive_line(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mountlink_core::{Endpoint, Expectation, FailureKind};
    use mountlink_test_harness::MockTransport;

    fn session(mock: MockTransport) -> Session {
        Session::new(Endpoint::network("127.0.0.1", 2000), Box::new(mock))
    }

    fn case(command: &str) -> TestCase {
        TestCase::new("t", command).with_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn matching_reply_passes() {
        let mut mock = MockTransport::new();
        mock.expect("MS", "Idle#");
        let mut s = session(mock);

        let ex = ProtocolClient::new()
            .exchange(&mut s, &case("MS").expecting("Idle"))
            .await;
        assert_eq!(ex.status, TestStatus::Pass);
        assert_eq!(ex.response.as_deref(), Some("Idle#"));
        assert!(ex.error.is_none());
    }

    #[tokio::test]
    async fn unknown_command_is_fail_not_timeout() {
        let mut mock = MockTransport::new();
        mock.expect("ZZZ", "Unknown command#");
        let mut s = session(mock);

        let ex = ProtocolClient::new()
            .exchange(&mut s, &case("ZZZ").expecting("Idle"))
            .await;
        assert_eq!(ex.status, TestStatus::Fail);
        assert_eq!(ex.response.as_deref(), Some("Unknown command#"));
        assert!(ex.detail.contains("expected substring \"Idle\""));
        assert!(!ex.session_suspect());
    }

    #[tokio::test]
    async fn regex_expectation() {
        let mut mock = MockTransport::new();
        mock.expect("GA", "+45.0000#");
        let mut s = session(mock);

        let c = case("GA").with_expectation(Expectation::regex(r"^[+-]\d{2}\.\d{4}#$").unwrap());
        let ex = ProtocolClient::new().exchange(&mut s, &c).await;
        assert_eq!(ex.status, TestStatus::Pass);
    }

    #[tokio::test]
    async fn silence_is_timeout() {
        let mut mock = MockTransport::new();
        mock.expect_silence("GA");
        let mut s = session(mock);

        let ex = ProtocolClient::new().exchange(&mut s, &case("GA")).await;
        assert_eq!(ex.status, TestStatus::Timeout);
        assert!(matches!(ex.error, Some(Error::Timeout)));
        assert!(ex.session_suspect());
    }

    #[tokio::test]
    async fn partial_line_is_timeout() {
        let mut mock = MockTransport::new();
        mock.expect_raw("GV", b"HB3.2");
        let mut s = session(mock);

        let ex = ProtocolClient::new().exchange(&mut s, &case("GV")).await;
        assert_eq!(ex.status, TestStatus::Timeout);
        assert!(ex.response.is_none());
    }

    #[tokio::test]
    async fn send_failure_is_error() {
        let mut mock = MockTransport::new();
        mock.set_connected(false);
        let mut s = session(mock);

        let ex = ProtocolClient::new().exchange(&mut s, &case("MS")).await;
        assert_eq!(ex.status, TestStatus::Error);
        assert!(ex.detail.contains("could not send"));
    }

    #[tokio::test]
    async fn peer_hangup_is_error() {
        let mut mock = MockTransport::new();
        mock.expect_disconnect("MS");
        let mut s = session(mock);

        let ex = ProtocolClient::new().exchange(&mut s, &case("MS")).await;
        assert_eq!(ex.status, TestStatus::Error);
        assert!(matches!(ex.error, Some(Error::ConnectionLost)));
    }

    #[tokio::test]
    async fn into_result_carries_failure_and_hint() {
        let mut mock = MockTransport::new();
        mock.expect("GV", "Unknown command#");
        let mut s = session(mock);

        let c = case("GV").expecting("HB").critical(true);
        let result = ProtocolClient::new().exchange(&mut s, &c).await.into_result(&c, 1);
        assert_eq!(result.status(), TestStatus::Fail);
        assert!(result.is_critical());
        assert_eq!(result.attempts(), 1);
        assert_eq!(result.failure(), Some(FailureKind::ProtocolMismatch));
        assert!(result.hint().unwrap().contains("firmware"));
    }

    #[tokio::test]
    async fn query_returns_raw_line() {
        let mut mock = MockTransport::new();
        mock.expect("USBRELAY ON", r#"{"relay":"ON"}"#);
        let mut s = session(mock);

        let reply = ProtocolClient::new()
            .query(&mut s, &Command::UsbRelay(true), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(reply, r#"{"relay":"ON"}"#);
    }
}
