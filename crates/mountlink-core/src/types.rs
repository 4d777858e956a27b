//! Core types used throughout mountlink.
//!
//! Endpoints describe where a device lives, test cases describe what to ask
//! it, and results describe what happened. Results are plain data handed to
//! the reporting layer verbatim, so they all serialize with serde.

use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, FailureKind, Result};

/// Default TCP port of the controller's telnet-style line server.
pub const DEFAULT_TCP_PORT: u16 = 2000;

/// Default serial baud rate of the controller.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default time allowed for a single command/response exchange.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------
// Serial line settings
// ---------------------------------------------------------------

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    fn digit(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

/// Serial port line settings.
///
/// Defaults match the controller: 9600 baud, 8 data bits, no parity,
/// 1 stop bit, no flow control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialParams {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialParams {
    /// Same settings at a different baud rate.
    pub fn with_baud_rate(&self, baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..self.clone()
        }
    }
}

impl fmt::Display for SerialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits.digit(),
            parity,
            stop
        )
    }
}

// ---------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------

/// Identifies a transport target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// A TCP line server.
    Network { host: String, port: u16 },
    /// A serial port with its line settings.
    Serial {
        port_name: String,
        params: SerialParams,
    },
}

impl Endpoint {
    /// A network endpoint.
    pub fn network(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Network {
            host: host.into(),
            port,
        }
    }

    /// A serial endpoint with default line settings at `baud_rate`.
    pub fn serial(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Endpoint::Serial {
            port_name: port_name.into(),
            params: SerialParams::default().with_baud_rate(baud_rate),
        }
    }

    /// Whether this endpoint is a serial port.
    pub fn is_serial(&self) -> bool {
        matches!(self, Endpoint::Serial { .. })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Network { host, port } => write!(f, "{host}:{port}"),
            Endpoint::Serial { port_name, params } => write!(f, "{port_name}@{params}"),
        }
    }
}

// ---------------------------------------------------------------
// Test cases
// ---------------------------------------------------------------

/// What a response line must look like for a test case to pass.
#[derive(Debug, Clone)]
pub enum Expectation {
    /// Any well-formed line passes (liveness checks).
    Any,
    /// The line must contain this text (case-sensitive).
    Substring(String),
    /// The line must match this regular expression.
    Regex(Regex),
}

impl Expectation {
    /// Build a regex expectation, rejecting invalid patterns.
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Expectation::Regex)
            .map_err(|e| Error::InvalidParameter(format!("bad pattern {pattern:?}: {e}")))
    }

    /// Whether `line` satisfies this expectation.
    pub fn matches(&self, line: &str) -> bool {
        match self {
            Expectation::Any => true,
            Expectation::Substring(s) => line.contains(s.as_str()),
            Expectation::Regex(re) => re.is_match(line),
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Any => write!(f, "any response"),
            Expectation::Substring(s) => write!(f, "substring {s:?}"),
            Expectation::Regex(re) => write!(f, "pattern /{}/", re.as_str()),
        }
    }
}

/// One command/response check.
///
/// Built once per module with the `with_*` methods and never changed
/// afterwards.
#[derive(Debug, Clone)]
pub struct TestCase {
    name: String,
    command: String,
    expected: Expectation,
    timeout: Duration,
    retries: u32,
    critical: bool,
}

impl TestCase {
    /// A non-critical case with no retries that accepts any response.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            expected: Expectation::Any,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            retries: 0,
            critical: false,
        }
    }

    pub fn with_expectation(mut self, expected: Expectation) -> Self {
        self.expected = expected;
        self
    }

    /// Shorthand for a [`Expectation::Substring`] expectation.
    pub fn expecting(self, substring: impl Into<String>) -> Self {
        self.with_expectation(Expectation::Substring(substring.into()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn expected(&self) -> &Expectation {
        &self.expected
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Total number of attempts allowed (`retries + 1`).
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }
}

// ---------------------------------------------------------------
// Results
// ---------------------------------------------------------------

/// Outcome of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestStatus {
    /// The response matched the expectation.
    Pass,
    /// A well-formed response that did not match.
    Fail,
    /// No complete response within the timeout.
    Timeout,
    /// Not run because a prerequisite failed.
    Skipped,
    /// The exchange could not run at all (transport failure).
    Error,
}

impl TestStatus {
    /// Whether another attempt may change the outcome.
    ///
    /// A mismatch is an answer, not a transient fault, so only timeouts
    /// and transport errors are retried.
    pub fn is_retryable(self) -> bool {
        matches!(self, TestStatus::Timeout | TestStatus::Error)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Timeout => "TIMEOUT",
            TestStatus::Skipped => "SKIPPED",
            TestStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// The final result of one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    name: String,
    status: TestStatus,
    critical: bool,
    detail: String,
    response: Option<String>,
    failure: Option<FailureKind>,
    hint: Option<String>,
    attempts: u32,
    duration_ms: u64,
}

impl TestResult {
    pub fn new(name: impl Into<String>, status: TestStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            critical: false,
            detail: detail.into(),
            response: None,
            failure: None,
            hint: None,
            attempts: 0,
            duration_ms: 0,
        }
    }

    /// A `Skipped` result for `case`, carrying its criticality.
    pub fn skipped(case: &TestCase, reason: impl Into<String>) -> Self {
        Self::new(case.name(), TestStatus::Skipped, reason).critical(case.is_critical())
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    /// Record the failure class and remediation hint of `error`.
    pub fn with_failure(mut self, error: &Error) -> Self {
        self.failure = Some(error.kind());
        self.hint = error.remediation().map(str::to_string);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn passed(&self) -> bool {
        self.status == TestStatus::Pass
    }
}

/// Overall outcome of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleStatus {
    /// Every test case passed.
    Pass,
    /// All critical cases passed, some non-critical did not.
    Partial,
    /// At least one critical case did not pass.
    Fail,
    /// The module itself failed unexpectedly.
    Error,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleStatus::Pass => "PASS",
            ModuleStatus::Partial => "PARTIAL",
            ModuleStatus::Fail => "FAIL",
            ModuleStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Aggregated result of one module run.
///
/// The status and recommendations are always derived from the results;
/// there is no way to set them directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleResult {
    module: String,
    overall_status: ModuleStatus,
    results: Vec<TestResult>,
    recommendations: Vec<String>,
}

impl ModuleResult {
    /// Aggregate per-test results into a module result.
    pub fn from_results(module: impl Into<String>, results: Vec<TestResult>) -> Self {
        let overall_status = aggregate_status(&results);

        let mut recommendations: Vec<String> = Vec::new();
        for hint in results.iter().filter(|r| !r.passed()).filter_map(|r| r.hint()) {
            if !recommendations.iter().any(|h| h == hint) {
                recommendations.push(hint.to_string());
            }
        }

        Self {
            module: module.into(),
            overall_status,
            results,
            recommendations,
        }
    }

    /// A module that could not complete because of an unexpected error.
    ///
    /// Results gathered before the error are kept for diagnosis.
    pub fn errored(
        module: impl Into<String>,
        detail: impl fmt::Display,
        results: Vec<TestResult>,
    ) -> Self {
        Self {
            module: module.into(),
            overall_status: ModuleStatus::Error,
            results,
            recommendations: vec![format!("module aborted unexpectedly: {detail}")],
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn overall_status(&self) -> ModuleStatus {
        self.overall_status
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    /// Number of test cases that passed.
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }
}

fn aggregate_status(results: &[TestResult]) -> ModuleStatus {
    if results.iter().any(|r| r.is_critical() && !r.passed()) {
        ModuleStatus::Fail
    } else if results.iter().any(|r| !r.passed()) {
        ModuleStatus::Partial
    } else {
        ModuleStatus::Pass
    }
}
