//! Serial port handling
//!
//! Discovery and opening of the serial device carrying the link. The codec
//! never touches these; it only sees the resulting [`Transport`].
//!
//! [`Transport`]: super::Transport

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use tracing::{debug, warn};

use super::{IoTransport, SerialTransport, TransportError};
use crate::config::LinkConfig;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/cu.usbserial" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// Best human-readable label: USB product, then manufacturer, then device name
    pub fn display_name(&self) -> String {
        [self.product.as_deref(), self.manufacturer.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or_else(|| basename(&self.name))
            .to_string()
    }

    /// True for USB serial adapters
    pub fn is_usb(&self) -> bool {
        self.vid.is_some()
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => (
                Some(usb_info.vid),
                Some(usb_info.pid),
                usb_info.manufacturer,
                usb_info.product,
                usb_info.serial_number,
            ),
            _ => (None, None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
            serial_number,
        }
    }
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Sort key so that:
///  - USB serial adapters come first (cu.usbserial*, ttyUSB*), sorted numerically
///  - then ttyS*/COM* hardware ports
///  - then everything else, by name
///
/// macOS dial-in devices (tty.*) sort after their callout twins (cu.*).
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let base = basename(name);
    let numeric = |rest: &str| rest.parse::<usize>().unwrap_or(usize::MAX);

    if let Some(rest) = base.strip_prefix("cu.usbserial") {
        return (0, numeric(rest.trim_start_matches('-')), base.to_string());
    }
    if let Some(rest) = base.strip_prefix("ttyUSB") {
        return (0, numeric(rest), base.to_string());
    }
    if let Some(rest) = base.strip_prefix("ttyS") {
        return (1, numeric(rest), base.to_string());
    }
    if let Some(rest) = base.strip_prefix("COM") {
        return (1, numeric(rest), base.to_string());
    }
    if base.starts_with("tty.") {
        return (3, 0, base.to_string());
    }
    (2, 0, base.to_string())
}

/// List all available serial ports with deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => warn!("serial port enumeration failed: {}", e),
    }

    // Linux-only: pick up USB adapters the enumeration API missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port as 8N1 without flow control.
///
/// `timeout` bounds each read; a read that sees no byte in time fails with
/// [`TransportError::Timeout`] once wrapped in a transport.
pub fn open_port(
    name: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, TransportError> {
    debug!("opening {} at {} baud (timeout {:?})", name, baud_rate, timeout);
    let port = serialport::new(name, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(timeout)
        .open()?;
    port.clear(serialport::ClearBuffer::All)?;
    Ok(port)
}

/// Open the configured port and wrap it as a transport.
///
/// The device is released when the transport is dropped.
pub fn open_transport(config: &LinkConfig) -> Result<SerialTransport, TransportError> {
    let port = open_port(&config.port_name, config.baud_rate, config.timeout())?;
    Ok(IoTransport::new(port))
}

/// Open the configured port for use with [`super::GarminCodec`] on a tokio runtime
pub fn open_async_port(config: &LinkConfig) -> Result<tokio_serial::SerialStream, TransportError> {
    use tokio_serial::SerialPortBuilderExt;

    debug!(
        "opening {} at {} baud (async)",
        config.port_name, config.baud_rate
    );
    let stream = tokio_serial::new(&config.port_name, config.baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(config.timeout())
        .open_native_async()
        .map_err(|e| TransportError::Serial(e.to_string()))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {}", port.name, port.display_name());
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/tty.usbserial",
            "/dev/ttyS1",
            "/dev/ttyUSB10",
            "/dev/someport",
            "/dev/ttyUSB0",
            "/dev/cu.usbserial",
            "/dev/ttyS0",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo::bare(n.to_string()))
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/ttyUSB0",
                "/dev/ttyUSB10",
                "/dev/cu.usbserial",
                "/dev/ttyS0",
                "/dev/ttyS1",
                "/dev/someport",
                "/dev/tty.usbserial",
            ]
        );
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut port = PortInfo::bare("/dev/cu.usbserial".to_string());
        assert_eq!(port.display_name(), "cu.usbserial");

        port.manufacturer = Some("Prolific".to_string());
        assert_eq!(port.display_name(), "Prolific");

        port.product = Some(" USB-Serial Controller ".to_string());
        assert_eq!(port.display_name(), "USB-Serial Controller");
        assert!(!port.is_usb());
    }
}
