//! The built-in diagnostic modules.
//!
//! Each [`ModuleKind`] is a fixed list of test cases against the controller.
//! Timeouts and retry counts come from the [`RunConfig`]; everything else
//! (commands, expectations, criticality) is part of the module definition.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use mountlink_core::error::{Error, Result};
use mountlink_core::{Endpoint, Expectation, TestCase};
use mountlink_protocol::Command;
use mountlink_transport::EndpointConnector;

use crate::config::{BaudPolicy, RunConfig};
use crate::probe::probe_serial;
use crate::runner::{ModuleJob, TestModule};

const FIRMWARE_PATTERN: &str = r"^HB\d+\.\d+\.\d+#$";
const ALTITUDE_PATTERN: &str = r"^[+-]\d{2}\.\d{4}#$";
const AZIMUTH_PATTERN: &str = r"^\d{3}\.\d{4}#$";

/// Echo payload used for liveness checks.
pub const ECHO_PAYLOAD: &str = "test";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// TCP reachability and a first exchange.
    Network,
    /// Echo and version over the configured transport (serial when set).
    Communication,
    /// Mount protocol: status, version, altitude, azimuth.
    Telescope,
    /// WiFi, Bluetooth and GPS: status, scans, connect, ping and pairing.
    Wireless,
    /// USB relay toggling.
    Relay,
    /// Firmware details and health counters.
    Device,
}

impl ModuleKind {
    pub fn all() -> &'static [ModuleKind] {
        &[
            ModuleKind::Network,
            ModuleKind::Communication,
            ModuleKind::Telescope,
            ModuleKind::Wireless,
            ModuleKind::Relay,
            ModuleKind::Device,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            ModuleKind::Network => "network",
            ModuleKind::Communication => "communication",
            ModuleKind::Telescope => "telescope",
            ModuleKind::Wireless => "wireless",
            ModuleKind::Relay => "relay",
            ModuleKind::Device => "device",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModuleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        ModuleKind::all()
            .iter()
            .copied()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| Error::InvalidParameter(format!("unknown module {s:?}")))
    }
}

/// Address the wireless module pings to check internet reachability.
pub const INTERNET_PING_HOST: &str = "8.8.8.8";
/// Address the wireless module pings to check the local network.
pub const GATEWAY_PING_HOST: &str = "192.168.1.1";

/// Build the test cases for `kind`.
///
/// Fails only if one of the catalog's reply patterns does not compile.
pub fn build_module(kind: ModuleKind, config: &RunConfig) -> Result<TestModule> {
    let case = |name: &str, command: Command| {
        TestCase::new(name, command.as_line())
            .with_timeout(config.command_timeout())
            .with_retries(config.retries)
    };
    let echo = || {
        case("echo", Command::Echo(ECHO_PAYLOAD.into()))
            .expecting(ECHO_PAYLOAD)
            .critical(true)
    };
    let firmware_pattern = Expectation::regex(FIRMWARE_PATTERN)?;
    let firmware = || case("firmware version", Command::GetVersion).with_expectation(firmware_pattern.clone());

    let module = TestModule::new(kind.name());
    let module = match kind {
        ModuleKind::Network => module
            .stop_on_critical(true)
            .with_case(echo())
            .with_case(case("mount status", Command::MountStatus).expecting("#")),
        ModuleKind::Communication => module
            .stop_on_critical(true)
            .with_case(echo())
            .with_case(firmware())
            .with_case(case("firmware details", Command::Version).expecting("\"firmware\"")),
        ModuleKind::Telescope => module
            .stop_on_critical(true)
            .with_case(
                case("mount status", Command::MountStatus)
                    .expecting("#")
                    .critical(true),
            )
            .with_case(firmware())
            .with_case(
                case("altitude", Command::GetAltitude)
                    .with_expectation(Expectation::regex(ALTITUDE_PATTERN)?),
            )
            .with_case(
                case("azimuth", Command::GetAzimuth)
                    .with_expectation(Expectation::regex(AZIMUTH_PATTERN)?),
            ),
        ModuleKind::Wireless => module
            .with_case(
                case("wifi status", Command::WifiStatus)
                    .expecting("\"status\"")
                    .critical(true),
            )
            .with_case(case("wifi scan", Command::WifiScan).expecting("\"networks\""))
            .with_case(case("wifi connect", Command::WifiConnect).expecting("\"status\""))
            .with_case(
                case("internet ping", Command::Ping(INTERNET_PING_HOST.into()))
                    .expecting("\"reachable\":true"),
            )
            .with_case(
                case("local ping", Command::Ping(GATEWAY_PING_HOST.into()))
                    .expecting("\"reachable\":true"),
            )
            .with_case(case("bluetooth status", Command::BtStatus).expecting("\"status\""))
            .with_case(case("bluetooth scan", Command::BtScan).expecting("\"devices\""))
            .with_case(case("bluetooth pair", Command::BtPair).expecting("\"status\":\"Paired\""))
            .with_case(case("gps status", Command::GpsStatus).expecting("\"fix\""))
            .with_case(case("gps coordinates", Command::GpsCoords).expecting("\"latitude\""))
            .with_case(case("gps satellites", Command::GpsSat).expecting("\"satellites\""))
            .with_case(case("gps time", Command::GpsTime).expecting("\"synced\":true")),
        ModuleKind::Relay => module
            .with_case(
                case("relay status", Command::UsbStatus)
                    .expecting("\"relay\"")
                    .critical(true),
            )
            .with_case(case("relay on", Command::UsbRelay(true)).expecting(r#""relay":"ON""#))
            .with_case(case("relay off", Command::UsbRelay(false)).expecting(r#""relay":"OFF""#)),
        ModuleKind::Device => module
            .with_case(
                case("firmware details", Command::Version)
                    .expecting("\"firmware\"")
                    .critical(true),
            )
            .with_case(case("uptime", Command::Uptime).expecting("\"uptime_s\""))
            .with_case(case("temperature", Command::Temperature).expecting("\"celsius\""))
            .with_case(case("memory", Command::Memory).expecting("\"free_kb\"")),
    };
    Ok(module)
}

/// Where `kind` runs: the communication module uses the serial port when
/// one is configured, every other module uses TCP.
pub fn module_endpoint(kind: ModuleKind, config: &RunConfig) -> Result<Endpoint> {
    match kind {
        ModuleKind::Communication => Ok(config
            .serial_endpoint()?
            .unwrap_or_else(|| config.network_endpoint())),
        _ => Ok(config.network_endpoint()),
    }
}

/// Build `kind` and resolve its endpoint into a runnable job.
///
/// Under [`BaudPolicy::Candidates`] a serial endpoint is probed first and
/// the job uses the baud rate that answered. If none did, the job carries
/// the error and the runner reports it without opening anything.
pub async fn resolve_job(kind: ModuleKind, config: &RunConfig) -> ModuleJob {
    let module = match build_module(kind, config) {
        Ok(module) => module,
        Err(e) => return ModuleJob::unreachable(TestModule::new(kind.name()), e),
    };
    match resolve_endpoint(kind, config).await {
        Ok(endpoint) => {
            tracing::debug!(module = kind.name(), endpoint = %endpoint, "Module endpoint resolved");
            let connector = EndpointConnector::new(endpoint, config.connect_timeout());
            ModuleJob::new(module, Arc::new(connector))
        }
        Err(e) => ModuleJob::unreachable(module, e),
    }
}

async fn resolve_endpoint(kind: ModuleKind, config: &RunConfig) -> Result<Endpoint> {
    let endpoint = module_endpoint(kind, config)?;
    let (Endpoint::Serial { port_name, params }, BaudPolicy::Candidates(candidates)) =
        (&endpoint, &config.baud_policy)
    else {
        return Ok(endpoint);
    };

    let report = probe_serial(port_name, params, candidates, config.command_timeout()).await;
    if let Some(err) = report.port_error {
        return Err(err);
    }
    match report.selected {
        Some(baud) => Ok(Endpoint::Serial {
            port_name: port_name.clone(),
            params: params.with_baud_rate(baud),
        }),
        None => Err(Error::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn names_round_trip() {
        for kind in ModuleKind::all() {
            assert_eq!(kind.name().parse::<ModuleKind>().unwrap(), *kind);
        }
        assert_eq!(" Telescope ".parse::<ModuleKind>().unwrap(), ModuleKind::Telescope);
        assert!(matches!(
            "flux".parse::<ModuleKind>(),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn patterns_compile() {
        for pattern in [FIRMWARE_PATTERN, ALTITUDE_PATTERN, AZIMUTH_PATTERN] {
            assert!(Expectation::regex(pattern).is_ok(), "{pattern}");
        }
    }

    #[test]
    fn every_catalog_case_checks_its_reply() {
        for kind in ModuleKind::all() {
            let module = build_module(*kind, &RunConfig::default()).unwrap();
            for case in module.cases() {
                assert!(
                    !matches!(case.expected(), Expectation::Any),
                    "{kind}/{} accepts any reply",
                    case.name()
                );
            }
        }
    }

    #[test]
    fn wireless_covers_connect_ping_and_pairing() {
        let module = build_module(ModuleKind::Wireless, &RunConfig::default()).unwrap();
        let commands: Vec<_> = module.cases().iter().map(|c| c.command()).collect();
        assert_eq!(
            commands,
            [
                "WIFISTATUS",
                "WIFISCAN",
                "WIFICONNECT",
                "PING 8.8.8.8",
                "PING 192.168.1.1",
                "BTSTATUS",
                "BTSCAN",
                "BTPAIR",
                "GPSSTATUS",
                "GPSCOORDS",
                "GPSSAT",
                "GPSTIME",
            ]
        );
        let pair = &module.cases()[7];
        assert!(pair.expected().matches(r#"{"device":"HomeBrew-Remote","status":"Paired"}"#));
        assert!(!pair.expected().matches(r#"{"status":"Failed"}"#));
    }

    #[test]
    fn config_flows_into_cases() {
        let config = RunConfig::default()
            .with_command_timeout(Duration::from_millis(750))
            .with_retries(3);
        let module = build_module(ModuleKind::Device, &config).unwrap();
        assert_eq!(module.name(), "device");
        for case in module.cases() {
            assert_eq!(case.timeout(), Duration::from_millis(750));
            assert_eq!(case.max_attempts(), 4);
        }
    }

    #[test]
    fn telescope_checks_mount_protocol() {
        let module = build_module(ModuleKind::Telescope, &RunConfig::default()).unwrap();
        let commands: Vec<_> = module.cases().iter().map(|c| c.command()).collect();
        assert_eq!(commands, ["MS", "GV", "GA", "GZ"]);
        assert!(module.cases()[0].is_critical());
        assert!(module.cases()[2].expected().matches("+45.0000#"));
        assert!(module.cases()[3].expected().matches("180.0000#"));
        assert!(!module.cases()[3].expected().matches("Unknown command#"));
    }

    #[test]
    fn every_module_has_a_critical_case() {
        for kind in ModuleKind::all() {
            let module = build_module(*kind, &RunConfig::default()).unwrap();
            assert!(
                module.cases().iter().any(|c| c.is_critical()),
                "{kind} has no critical case"
            );
        }
    }

    #[test]
    fn communication_prefers_serial() {
        let network = RunConfig::default();
        assert!(!module_endpoint(ModuleKind::Communication, &network)
            .unwrap()
            .is_serial());

        let serial = RunConfig::default().with_serial_port("COM3");
        assert_eq!(
            module_endpoint(ModuleKind::Communication, &serial)
                .unwrap()
                .to_string(),
            "COM3@9600 8N1"
        );
        assert!(!module_endpoint(ModuleKind::Telescope, &serial)
            .unwrap()
            .is_serial());
    }

    #[tokio::test]
    async fn empty_serial_port_yields_unreachable_job() {
        let config = RunConfig::default().with_serial_port("");
        let job = resolve_job(ModuleKind::Communication, &config).await;
        assert!(matches!(job.target, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn probing_an_absent_port_reports_not_found() {
        let config = RunConfig::default()
            .with_serial_port("COM250")
            .with_baud_policy(BaudPolicy::standard_candidates());
        let job = resolve_job(ModuleKind::Communication, &config).await;
        match job.target {
            Err(e) => assert!(e.to_string().contains("not found"), "{e}"),
            Ok(_) => panic!("expected an unreachable job"),
        }
    }
}
