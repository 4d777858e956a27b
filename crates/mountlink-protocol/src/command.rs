//! Mount-controller command vocabulary.
//!
//! Commands are plain ASCII words, some with a single argument. [`Command`]
//! covers the set the controller understands; anything else can still be
//! sent as [`Command::Raw`].

use std::fmt;
use std::str::FromStr;

use mountlink_core::error::Error;

/// One command line understood by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `MS`: mount status (`Idle#`, `Slewing#`, ...).
    MountStatus,
    /// `GV`: firmware version in mount-protocol form (`HB3.2.1#`).
    GetVersion,
    /// `VERSION`: firmware/hardware details as JSON.
    Version,
    /// `GA`: current altitude.
    GetAltitude,
    /// `GZ`: current azimuth.
    GetAzimuth,
    /// `echo <text>`: the controller repeats `<text>`.
    Echo(String),
    WifiStatus,
    WifiScan,
    WifiConnect,
    /// `PING <host>`: ask the controller to ping a host.
    Ping(String),
    BtStatus,
    BtScan,
    BtPair,
    GpsStatus,
    GpsCoords,
    GpsSat,
    GpsTime,
    UsbStatus,
    /// `USBRELAY ON` / `USBRELAY OFF`.
    UsbRelay(bool),
    Uptime,
    Temperature,
    Memory,
    /// Any other line, sent verbatim.
    Raw(String),
}

impl Command {
    /// The line to send, without terminator.
    pub fn as_line(&self) -> String {
        match self {
            Command::MountStatus => "MS".into(),
            Command::GetVersion => "GV".into(),
            Command::Version => "VERSION".into(),
            Command::GetAltitude => "GA".into(),
            Command::GetAzimuth => "GZ".into(),
            Command::Echo(text) => format!("echo {text}"),
            Command::WifiStatus => "WIFISTATUS".into(),
            Command::WifiScan => "WIFISCAN".into(),
            Command::WifiConnect => "WIFICONNECT".into(),
            Command::Ping(host) => format!("PING {host}"),
            Command::BtStatus => "BTSTATUS".into(),
            Command::BtScan => "BTSCAN".into(),
            Command::BtPair => "BTPAIR".into(),
            Command::GpsStatus => "GPSSTATUS".into(),
            Command::GpsCoords => "GPSCOORDS".into(),
            Command::GpsSat => "GPSSAT".into(),
            Command::GpsTime => "GPSTIME".into(),
            Command::UsbStatus => "USBSTATUS".into(),
            Command::UsbRelay(true) => "USBRELAY ON".into(),
            Command::UsbRelay(false) => "USBRELAY OFF".into(),
            Command::Uptime => "UPTIME".into(),
            Command::Temperature => "TEMPERATURE".into(),
            Command::Memory => "MEMORY".into(),
            Command::Raw(line) => line.clone(),
        }
    }

    /// Whether the reply is a single-line JSON object rather than a
    /// `#`-terminated mount reply.
    pub fn expects_json(&self) -> bool {
        !matches!(
            self,
            Command::MountStatus
                | Command::GetVersion
                | Command::GetAltitude
                | Command::GetAzimuth
                | Command::Echo(_)
                | Command::Raw(_)
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_line())
    }
}

impl FromStr for Command {
    type Err = Error;

    /// Parse a command line. Unrecognised lines become [`Command::Raw`];
    /// only an empty line is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        if line.is_empty() {
            return Err(Error::InvalidParameter("empty command line".into()));
        }

        let (word, arg) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, Some(rest.trim())),
            None => (line, None),
        };

        let cmd = match (word, arg) {
            ("MS", None) => Command::MountStatus,
            ("GV", None) => Command::GetVersion,
            ("VERSION", None) => Command::Version,
            ("GA", None) => Command::GetAltitude,
            ("GZ", None) => Command::GetAzimuth,
            ("echo" | "ECHO", Some(text)) => Command::Echo(text.to_string()),
            ("WIFISTATUS", None) => Command::WifiStatus,
            ("WIFISCAN", None) => Command::WifiScan,
            ("WIFICONNECT", None) => Command::WifiConnect,
            ("PING", Some(host)) => Command::Ping(host.to_string()),
            ("BTSTATUS", None) => Command::BtStatus,
            ("BTSCAN", None) => Command::BtScan,
            ("BTPAIR", None) => Command::BtPair,
            ("GPSSTATUS", None) => Command::GpsStatus,
            ("GPSCOORDS", None) => Command::GpsCoords,
            ("GPSSAT", None) => Command::GpsSat,
            ("GPSTIME", None) => Command::GpsTime,
            ("USBSTATUS", None) => Command::UsbStatus,
            ("USBRELAY", Some("ON")) => Command::UsbRelay(true),
            ("USBRELAY", Some("OFF")) => Command::UsbRelay(false),
            ("UPTIME", None) => Command::Uptime,
            ("TEMPERATURE", None) => Command::Temperature,
            ("MEMORY", None) => Command::Memory,
            _ => Command::Raw(line.to_string()),
        };
        Ok(cmd)
    }
}
