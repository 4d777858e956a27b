//! Simulated controller state and the default command table.
//!
//! Every connection to the mock server gets its own [`DeviceSimState`], so
//! toggling the relay on one session is never visible on another. Random
//! jitter (temperatures, scan results) comes from a seeded RNG so runs are
//! reproducible.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use crate::dispatch::DispatchTable;

/// Firmware version reported by `GV` and `VERSION`.
pub const FIRMWARE_VERSION: &str = "3.2.1";

/// Mutable state of one simulated controller.
#[derive(Debug)]
pub struct DeviceSimState {
    relay_on: bool,
    wifi_connected: bool,
    bt_paired: bool,
    satellites: u8,
    /// Degrees above the horizon.
    altitude: f64,
    /// Degrees clockwise from north.
    azimuth: f64,
    started: Instant,
    commands: u64,
    rng: StdRng,
}

impl DeviceSimState {
    /// A freshly powered device. `seed` drives all simulated jitter.
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let satellites = rng.gen_range(8..=12);
        Self {
            relay_on: false,
            wifi_connected: true,
            bt_paired: false,
            satellites,
            altitude: 45.0,
            azimuth: 180.0,
            started: Instant::now(),
            commands: 0,
            rng,
        }
    }

    pub fn relay_on(&self) -> bool {
        self.relay_on
    }

    pub fn set_relay(&mut self, on: bool) {
        self.relay_on = on;
    }

    pub fn satellites(&self) -> u8 {
        self.satellites
    }

    /// Number of commands this device has handled.
    pub fn commands_handled(&self) -> u64 {
        self.commands
    }

    pub(crate) fn record_command(&mut self) {
        self.commands += 1;
    }

    fn relay_label(&self) -> &'static str {
        if self.relay_on {
            "ON"
        } else {
            "OFF"
        }
    }

    fn jitter(&mut self, low: i32, high: i32) -> i32 {
        self.rng.gen_range(low..=high)
    }
}

/// The controller's command table.
///
/// Mount protocol replies end in `#`; structured replies are single-line
/// JSON objects.
pub fn default_dispatch_table() -> DispatchTable {
    DispatchTable::new()
        // Mount protocol
        .on("MS", "Idle#")
        .on("GV", format!("HB{FIRMWARE_VERSION}#"))
        .on(
            "VERSION",
            json!({
                "firmware": FIRMWARE_VERSION,
                "hardware": "Gen3",
                "model": "HomeBrew 3-in-1",
            })
            .to_string(),
        )
        .on_computed("GA", |_, s| Some(format!("{:+08.4}#", s.altitude)))
        .on_computed("GZ", |_, s| Some(format!("{:08.4}#", s.azimuth)))
        .on_computed("echo *", |req, _| Some(req.args().to_string()))
        .on_computed("ECHO *", |req, _| Some(req.args().to_string()))
        // WiFi
        .on_computed("WIFISTATUS", |_, s| {
            let reply = if s.wifi_connected {
                json!({"status": "Connected", "ssid": "HomeBrew", "signal_strength": -45})
            } else {
                json!({"status": "Disconnected"})
            };
            Some(reply.to_string())
        })
        .on_computed("WIFISCAN", |_, s| {
            let networks = json!([
                {"ssid": "HomeBrew", "signal_strength": -45},
                {"ssid": "Observatory", "signal_strength": s.jitter(-80, -60)},
            ]);
            Some(json!({ "networks": networks }).to_string())
        })
        .on_computed("WIFICONNECT", |_, s| {
            s.wifi_connected = true;
            Some(json!({"status": "Connected", "ssid": "HomeBrew"}).to_string())
        })
        .on_computed("PING *", |req, s| {
            let latency = s.jitter(5, 40);
            Some(json!({"host": req.args(), "reachable": true, "latency_ms": latency}).to_string())
        })
        // Bluetooth
        .on_computed("BTSTATUS", |_, s| {
            Some(json!({"status": "On", "paired": s.bt_paired}).to_string())
        })
        .on_computed("BTSCAN", |_, s| {
            let rssi = s.jitter(-70, -50);
            Some(json!({"devices": [{"name": "HomeBrew-Remote", "rssi": rssi}]}).to_string())
        })
        .on_computed("BTPAIR", |_, s| {
            s.bt_paired = true;
            Some(json!({"status": "Paired", "device": "HomeBrew-Remote"}).to_string())
        })
        // GPS
        .on_computed("GPSSTATUS", |_, s| {
            Some(json!({"fix": "3D", "satellites": s.satellites}).to_string())
        })
        .on(
            "GPSCOORDS",
            json!({"latitude": 51.4779, "longitude": -0.0015, "altitude_m": 46.0}).to_string(),
        )
        .on_computed("GPSSAT", |_, s| {
            Some(json!({"satellites": s.satellites, "in_view": s.satellites + 4}).to_string())
        })
        .on_computed("GPSTIME", |_, _| {
            let utc = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            Some(json!({"utc": utc, "synced": true}).to_string())
        })
        // USB relay
        .on_computed("USBSTATUS", |_, s| {
            Some(json!({"relay": s.relay_label()}).to_string())
        })
        .on_computed("USBRELAY ON", |_, s| {
            s.set_relay(true);
            Some(json!({"relay": s.relay_label()}).to_string())
        })
        .on_computed("USBRELAY OFF", |_, s| {
            s.set_relay(false);
            Some(json!({"relay": s.relay_label()}).to_string())
        })
        // Device health
        .on_computed("UPTIME", |_, s| {
            Some(json!({"uptime_s": s.started.elapsed().as_secs()}).to_string())
        })
        .on_computed("TEMPERATURE", |_, s| {
            let tenths = 420 + s.jitter(-15, 15);
            Some(json!({"celsius": f64::from(tenths) / 10.0}).to_string())
        })
        .on_computed("MEMORY", |_, s| {
            let free = 180_000 + s.jitter(-4_000, 4_000);
            Some(json!({"free_kb": free, "total_kb": 320_000}).to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn ask(table: &DispatchTable, state: &mut DeviceSimState, line: &str) -> String {
        table.dispatch(line, state).unwrap()
    }

    fn ask_json(table: &DispatchTable, state: &mut DeviceSimState, line: &str) -> Value {
        serde_json::from_str(&ask(table, state, line)).unwrap()
    }

    #[test]
    fn mount_replies() {
        let table = default_dispatch_table();
        let mut s = DeviceSimState::new(7);
        assert_eq!(ask(&table, &mut s, "MS"), "Idle#");
        assert_eq!(ask(&table, &mut s, "GV"), "HB3.2.1#");
        assert_eq!(ask(&table, &mut s, "GA"), "+45.0000#");
        assert_eq!(ask(&table, &mut s, "GZ"), "180.0000#");
        assert_eq!(ask(&table, &mut s, "echo test"), "test");
        assert_eq!(ask(&table, &mut s, "ECHO hello"), "hello");
        assert_eq!(ask(&table, &mut s, "ZZZ"), "Unknown command#");
    }

    #[test]
    fn version_is_json() {
        let table = default_dispatch_table();
        let mut s = DeviceSimState::new(7);
        let v = ask_json(&table, &mut s, "VERSION");
        assert_eq!(v["firmware"], "3.2.1");
        assert_eq!(v["hardware"], "Gen3");
    }

    #[test]
    fn wifi_status() {
        let table = default_dispatch_table();
        let mut s = DeviceSimState::new(7);
        let v = ask_json(&table, &mut s, "WIFISTATUS");
        assert_eq!(v["status"], "Connected");
        assert_eq!(v["signal_strength"], -45);
    }

    #[test]
    fn relay_toggles() {
        let table = default_dispatch_table();
        let mut s = DeviceSimState::new(7);
        assert_eq!(ask_json(&table, &mut s, "USBSTATUS")["relay"], "OFF");
        assert_eq!(ask_json(&table, &mut s, "USBRELAY ON")["relay"], "ON");
        assert!(s.relay_on());
        assert_eq!(ask_json(&table, &mut s, "USBSTATUS")["relay"], "ON");
        assert_eq!(ask_json(&table, &mut s, "USBRELAY OFF")["relay"], "OFF");
        assert!(!s.relay_on());
    }

    #[test]
    fn bluetooth_pairing_sticks() {
        let table = default_dispatch_table();
        let mut s = DeviceSimState::new(7);
        assert_eq!(ask_json(&table, &mut s, "BTSTATUS")["paired"], false);
        assert_eq!(ask_json(&table, &mut s, "BTPAIR")["status"], "Paired");
        assert_eq!(ask_json(&table, &mut s, "BTSTATUS")["paired"], true);
    }

    #[test]
    fn gps_satellites_are_consistent() {
        let table = default_dispatch_table();
        let mut s = DeviceSimState::new(7);
        let n = u64::from(s.satellites());
        assert!((8..=12).contains(&n));
        assert_eq!(ask_json(&table, &mut s, "GPSSTATUS")["satellites"], n);
        assert_eq!(ask_json(&table, &mut s, "GPSSAT")["in_view"], n + 4);
    }

    #[test]
    fn ping_echoes_host() {
        let table = default_dispatch_table();
        let mut s = DeviceSimState::new(7);
        let v = ask_json(&table, &mut s, "PING 8.8.8.8");
        assert_eq!(v["host"], "8.8.8.8");
        assert_eq!(v["reachable"], true);
    }

    #[test]
    fn same_seed_same_jitter() {
        let table = default_dispatch_table();
        let mut a = DeviceSimState::new(42);
        let mut b = DeviceSimState::new(42);
        assert_eq!(
            ask(&table, &mut a, "TEMPERATURE"),
            ask(&table, &mut b, "TEMPERATURE")
        );
        assert_eq!(ask(&table, &mut a, "MEMORY"), ask(&table, &mut b, "MEMORY"));
    }

    #[test]
    fn every_structured_reply_is_single_line() {
        let table = default_dispatch_table();
        let mut s = DeviceSimState::new(7);
        for cmd in [
            "VERSION", "WIFISTATUS", "WIFISCAN", "WIFICONNECT", "PING 192.168.1.1", "BTSTATUS",
            "BTSCAN", "BTPAIR", "GPSSTATUS", "GPSCOORDS", "GPSSAT", "GPSTIME", "USBSTATUS",
            "UPTIME", "TEMPERATURE", "MEMORY",
        ] {
            let reply = ask(&table, &mut s, cmd);
            assert!(!reply.contains('\n'), "{cmd} reply spans lines: {reply}");
            assert!(
                serde_json::from_str::<Value>(&reply).is_ok(),
                "{cmd} reply is not JSON: {reply}"
            );
        }
    }
}
