//! Run configuration.
//!
//! [`RunConfig`] is a bundle of plain values: where the device lives, how
//! long to wait, and how often to retry. It is built by the CLI from flags,
//! optionally on top of a JSON file, and never changes during a run.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mountlink_core::error::{Error, Result};
use mountlink_core::types::{DEFAULT_TCP_PORT, SerialParams};
use mountlink_core::Endpoint;

/// Baud rates tried by [`BaudPolicy::standard_candidates`], in order.
pub const STANDARD_BAUD_CANDIDATES: &[u32] = &[9600, 115_200, 57_600, 38_400];

/// Which serial baud rates a run may use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "bauds", rename_all = "snake_case")]
pub enum BaudPolicy {
    /// Use the configured baud rate only.
    #[default]
    Declared,
    /// Probe these rates in order; the first one that gets any reply is used.
    Candidates(Vec<u32>),
}

impl BaudPolicy {
    /// The usual HomeBrew rates: 9600, 115200, 57600, 38400.
    pub fn standard_candidates() -> Self {
        BaudPolicy::Candidates(STANDARD_BAUD_CANDIDATES.to_vec())
    }
}

/// Settings for one diagnostic run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Controller host for network modules.
    pub host: String,
    pub tcp_port: u16,
    /// Serial port for the communication module; network is used when unset.
    pub serial_port: Option<String>,
    pub serial: SerialParams,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    /// Extra attempts per test case after a timeout or transport error.
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub baud_policy: BaudPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            tcp_port: DEFAULT_TCP_PORT,
            serial_port: None,
            serial: SerialParams::default(),
            connect_timeout_ms: 5_000,
            command_timeout_ms: 2_000,
            retries: 1,
            retry_backoff_ms: 100,
            baud_policy: BaudPolicy::Declared,
        }
    }
}

impl RunConfig {
    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::InvalidParameter(format!("invalid run configuration: {e}")))
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loaded run configuration");
        Self::from_json_str(&text)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self
    }

    pub fn with_serial_port(mut self, port: impl Into<String>) -> Self {
        self.serial_port = Some(port.into());
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.serial = self.serial.with_baud_rate(baud_rate);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = duration_ms(backoff);
        self
    }

    pub fn with_baud_policy(mut self, policy: BaudPolicy) -> Self {
        self.baud_policy = policy;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// The TCP endpoint.
    pub fn network_endpoint(&self) -> Endpoint {
        Endpoint::network(self.host.clone(), self.tcp_port)
    }

    /// The serial endpoint at the configured baud rate, if a port is set.
    ///
    /// An empty port name is a configuration error, not "no port".
    pub fn serial_endpoint(&self) -> Result<Option<Endpoint>> {
        match self.serial_port.as_deref() {
            None => Ok(None),
            Some(name) if name.trim().is_empty() => {
                Err(Error::InvalidParameter("serial port name is empty".into()))
            }
            Some(name) => Ok(Some(Endpoint::Serial {
                port_name: name.trim().to_string(),
                params: self.serial.clone(),
            })),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = RunConfig::default();
        assert_eq!(c.tcp_port, 2000);
        assert_eq!(c.serial.baud_rate, 9600);
        assert_eq!(c.retry_backoff(), Duration::from_millis(100));
        assert_eq!(c.baud_policy, BaudPolicy::Declared);
        assert_eq!(c.network_endpoint().to_string(), "127.0.0.1:2000");
        assert!(c.serial_endpoint().unwrap().is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c = RunConfig::from_json_str(
            r#"{"host":"192.168.4.1","serial_port":"COM3","serial":{"baud_rate":19200}}"#,
        )
        .unwrap();
        assert_eq!(c.host, "192.168.4.1");
        assert_eq!(c.tcp_port, 2000);
        assert_eq!(c.serial.baud_rate, 19200);
        assert_eq!(
            c.serial_endpoint().unwrap().unwrap().to_string(),
            "COM3@19200 8N1"
        );
    }

    #[test]
    fn baud_policy_json() {
        let c = RunConfig::from_json_str(
            r#"{"baud_policy":{"mode":"candidates","bauds":[9600,38400]}}"#,
        )
        .unwrap();
        assert_eq!(c.baud_policy, BaudPolicy::Candidates(vec![9600, 38400]));

        let declared = RunConfig::from_json_str(r#"{"baud_policy":{"mode":"declared"}}"#).unwrap();
        assert_eq!(declared.baud_policy, BaudPolicy::Declared);
    }

    #[test]
    fn invalid_json_is_invalid_parameter() {
        assert!(matches!(
            RunConfig::from_json_str("{\"retries\": \"many\"}"),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            RunConfig::from_json_file("/nonexistent/mountlink.json"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn empty_serial_port_is_rejected() {
        let c = RunConfig::default().with_serial_port("  ");
        assert!(matches!(c.serial_endpoint(), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn builder_sets_durations() {
        let c = RunConfig::default()
            .with_command_timeout(Duration::from_millis(500))
            .with_retry_backoff(Duration::from_millis(10))
            .with_retries(2);
        assert_eq!(c.command_timeout(), Duration::from_millis(500));
        assert_eq!(c.retry_backoff(), Duration::from_millis(10));
        assert_eq!(c.retries, 2);
    }
}
