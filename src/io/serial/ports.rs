// src/io/serial/ports.rs
//
// Serial port enumeration for the port picker.

use serde::Serialize;

use crate::io::IoError;

/// One selectable device
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PortDescriptor {
    /// OS device path (`/dev/ttyUSB0`, `COM3`)
    pub port: String,
    pub description: String,
}

/// Source of the host's serial devices.
pub trait PortEnumerator: Send + Sync {
    fn list_ports(&self) -> Result<Vec<PortDescriptor>, IoError>;
}

/// Enumerates through the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnumerator;

impl PortEnumerator for SystemEnumerator {
    fn list_ports(&self) -> Result<Vec<PortDescriptor>, IoError> {
        let ports = serialport::available_ports()
            .map_err(|e| IoError::Io(format!("Failed to enumerate ports: {}", e)))?;

        Ok(ports
            .into_iter()
            // On macOS, filter out /dev/tty.* devices - only show /dev/cu.* (calling unit)
            .filter(|_p| {
                #[cfg(target_os = "macos")]
                {
                    !_p.port_name.starts_with("/dev/tty.")
                }
                #[cfg(not(target_os = "macos"))]
                {
                    true
                }
            })
            .map(|p| PortDescriptor {
                description: describe(&p.port_type),
                port: p.port_name,
            })
            .collect())
    }
}

fn describe(port_type: &serialport::SerialPortType) -> String {
    match port_type {
        serialport::SerialPortType::UsbPort(info) => {
            match (info.product.as_deref(), info.manufacturer.as_deref()) {
                (Some(product), _) => product.to_string(),
                (None, Some(manufacturer)) => format!("{} USB serial", manufacturer),
                (None, None) => format!("USB serial {:04x}:{:04x}", info.vid, info.pid),
            }
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        serialport::SerialPortType::PciPort => "PCI".to_string(),
        serialport::SerialPortType::Unknown => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::{SerialPortType, UsbPortInfo};

    #[test]
    fn test_usb_description_prefers_product() {
        let info = UsbPortInfo {
            vid: 0x0403,
            pid: 0x6001,
            serial_number: None,
            manufacturer: Some("FTDI".to_string()),
            product: Some("FT232R USB UART".to_string()),
        };
        assert_eq!(describe(&SerialPortType::UsbPort(info.clone())), "FT232R USB UART");

        let bare = UsbPortInfo {
            product: None,
            manufacturer: None,
            ..info
        };
        assert_eq!(describe(&SerialPortType::UsbPort(bare)), "USB serial 0403:6001");
    }

    #[test]
    fn test_non_usb_description() {
        assert_eq!(describe(&SerialPortType::PciPort), "PCI");
        assert_eq!(describe(&SerialPortType::Unknown), "Unknown");
    }
}
