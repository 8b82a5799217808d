//! Serial device discovery.
//!
//! The controller board is picked out of the enumerated ports by a
//! case-sensitive substring match on the port description. Not finding it is
//! the normal state while the board is unplugged, so [`DeviceLocator::locate`]
//! returns `Option`, never an error.

use crate::error::AppResult;
use tracing::{debug, warn};

/// One enumerated serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// OS device path, e.g. `/dev/ttyACM0` or `COM3`
    pub name: String,
    /// Human-readable description used by the identity heuristic
    pub description: String,
}

impl PortInfo {
    /// Port entry from a device path and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Source of the currently attached serial ports.
pub trait PortEnumerator: Send + Sync {
    /// Currently attached ports in enumeration order.
    fn available_ports(&self) -> AppResult<Vec<PortInfo>>;
}

/// Return the first port whose description contains any of `markers`.
pub fn select_port<'a>(ports: &'a [PortInfo], markers: &[String]) -> Option<&'a PortInfo> {
    ports.iter().find(|port| {
        markers
            .iter()
            .any(|marker| !marker.is_empty() && port.description.contains(marker.as_str()))
    })
}

/// Finds the controller board among the attached serial ports.
pub struct DeviceLocator<E> {
    enumerator: E,
    markers: Vec<String>,
}

impl<E: PortEnumerator> DeviceLocator<E> {
    /// Locator matching port descriptions against `markers`.
    pub fn new(enumerator: E, markers: Vec<String>) -> Self {
        Self {
            enumerator,
            markers,
        }
    }

    /// Identity markers in use.
    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    /// All currently attached ports, empty if enumeration fails.
    pub fn ports(&self) -> Vec<PortInfo> {
        match self.enumerator.available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!(error = %e, "Serial port enumeration failed");
                Vec::new()
            }
        }
    }

    /// First port matching an identity marker, if one is attached.
    pub fn locate(&self) -> Option<PortInfo> {
        let ports = self.ports();
        let found = select_port(&ports, &self.markers).cloned();
        if found.is_none() {
            debug!(scanned = ports.len(), "No controller among enumerated ports");
        }
        found
    }
}

/// Enumerates the host's serial ports through the `serialport` crate.
#[cfg(feature = "serial")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPorts;

#[cfg(feature = "serial")]
impl PortEnumerator for SystemPorts {
    fn available_ports(&self) -> AppResult<Vec<PortInfo>> {
        let ports = serialport::available_ports()
            .map_err(|e| crate::error::BridgeError::Serial(e.to_string()))?;
        Ok(ports
            .into_iter()
            .map(|port| {
                let description = describe(&port);
                PortInfo::new(port.port_name, description)
            })
            .collect())
    }
}

/// Build the description string the identity markers are matched against.
#[cfg(feature = "serial")]
fn describe(port: &serialport::SerialPortInfo) -> String {
    use serialport::SerialPortType;

    match &port.port_type {
        SerialPortType::UsbPort(info) => {
            let parts: Vec<&str> = [info.manufacturer.as_deref(), info.product.as_deref()]
                .into_iter()
                .flatten()
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() {
                format!("USB device {:04x}:{:04x}", info.vid, info.pid)
            } else {
                parts.join(" ")
            }
        }
        SerialPortType::PciPort => "PCI Port".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth Port".to_string(),
        SerialPortType::Unknown => port.port_name.clone(),
    }
}
