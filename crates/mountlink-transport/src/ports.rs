//! Serial port enumeration and controller detection.
//!
//! HomeBrew boards show up as USB virtual COM ports behind one of a handful
//! of USB-serial bridge chips. [`list_ports`] reports every port the OS
//! knows about and flags the ones that look like such a bridge.

use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};

/// Product/manufacturer keywords of bridges used on HomeBrew boards.
const DEVICE_KEYWORDS: &[&str] = &["CH340", "CP210", "FTDI", "USB-SERIAL", "ESP32", "Arduino"];

/// USB vendor IDs of the same bridges, for ports that report no strings.
const DEVICE_VIDS: &[(u16, &str)] = &[
    (0x1A86, "CH340"),
    (0x10C4, "CP210"),
    (0x0403, "FTDI"),
    (0x303A, "ESP32"),
    (0x2341, "Arduino"),
];

/// How a port is attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PortKind {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

/// One serial port visible to the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// OS name of the port (`COM3`, `/dev/ttyUSB0`).
    pub name: String,
    pub kind: PortKind,
    /// Human-readable description assembled from USB strings, if any.
    pub description: String,
    /// The bridge chip this port was recognised as, if any.
    pub likely_device: Option<&'static str>,
}

/// Enumerate serial ports.
///
/// Enumeration failures are logged and reported as an empty list; callers
/// treat "cannot enumerate" the same as "nothing attached".
pub fn list_ports() -> Vec<PortInfo> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(describe).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to enumerate serial ports");
            Vec::new()
        }
    }
}

/// The first port that looks like a HomeBrew controller.
pub fn detect_device_port() -> Option<PortInfo> {
    let found = list_ports().into_iter().find(|p| p.likely_device.is_some());
    match &found {
        Some(port) => tracing::info!(
            port = %port.name,
            chip = port.likely_device.unwrap_or_default(),
            "Detected likely controller port"
        ),
        None => tracing::info!("No likely controller port found"),
    }
    found
}

/// Whether `name` refers to a port that can be opened on this machine.
///
/// Pseudo-terminals and symlinked device nodes are not always enumerated,
/// so on Unix an existing device path also counts.
pub fn port_exists(name: &str) -> bool {
    let enumerated = list_ports()
        .iter()
        .any(|p| p.name.eq_ignore_ascii_case(name));
    enumerated || (cfg!(unix) && std::path::Path::new(name).exists())
}

fn describe(info: SerialPortInfo) -> PortInfo {
    let (kind, description, vid) = match &info.port_type {
        SerialPortType::UsbPort(usb) => {
            let parts: Vec<&str> = [usb.manufacturer.as_deref(), usb.product.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            let description = if parts.is_empty() {
                format!("USB {:04x}:{:04x}", usb.vid, usb.pid)
            } else {
                parts.join(" ")
            };
            (PortKind::Usb, description, Some(usb.vid))
        }
        SerialPortType::PciPort => (PortKind::Pci, "PCI serial port".to_string(), None),
        SerialPortType::BluetoothPort => {
            (PortKind::Bluetooth, "Bluetooth serial port".to_string(), None)
        }
        SerialPortType::Unknown => (PortKind::Unknown, String::new(), None),
    };

    let likely_device = identify(&description, vid);

    PortInfo {
        name: info.port_name,
        kind,
        description,
        likely_device,
    }
}

/// Recognise a USB-serial bridge from its description or vendor ID.
pub fn identify(description: &str, vid: Option<u16>) -> Option<&'static str> {
    let lower = description.to_ascii_lowercase();
    DEVICE_KEYWORDS
        .iter()
        .find(|k| lower.contains(&k.to_ascii_lowercase()))
        .copied()
        .or_else(|| {
            vid.and_then(|v| DEVICE_VIDS.iter().find(|(id, _)| *id == v).map(|(_, n)| *n))
        })
}
