//! Device drivers and the capability traits they implement.
//!
//! [`capabilities`] defines the two traits the sweep is written against.
//! [`zaber`] and [`obp`] talk to the real bench over USB serial and are
//! gated behind the `instrument_serial` feature; [`mock`] simulates both
//! roles for tests, demos and `--mock` runs.

pub mod capabilities;
pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod obp;
#[cfg(feature = "instrument_serial")]
pub mod zaber;

pub use capabilities::{RotationStage, Spectrometer};
pub use mock::{MockSpectrometer, MockStage};
#[cfg(feature = "instrument_serial")]
pub use obp::ObpSpectrometer;
#[cfg(feature = "instrument_serial")]
pub use zaber::{ZaberAxis, ZaberChain};

#[cfg(feature = "instrument_serial")]
use anyhow::Context;
#[cfg(feature = "instrument_serial")]
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use crate::error::GonioError;

/// Resolve a USB serial number to a port path.
///
/// Both instruments present as USB serial adapters whose device paths move
/// around between reboots; the USB serial number is the stable identity.
#[cfg(feature = "instrument_serial")]
pub(crate) fn find_port_by_usb_serial(usb_serial: &str) -> anyhow::Result<String> {
    let ports = serialport::available_ports().context("enumerating serial ports")?;
    for port in &ports {
        if let serialport::SerialPortType::UsbPort(info) = &port.port_type {
            if info.serial_number.as_deref() == Some(usb_serial) {
                debug!(port = %port.port_name, usb_serial, "Matched serial port");
                return Ok(port.port_name.clone());
            }
        }
    }
    let attached: Vec<String> = ports.iter().map(describe_port).collect();
    Err(GonioError::DeviceNotFound(format!(
        "no serial port with USB serial {usb_serial:?}; attached: [{}]",
        attached.join(", ")
    ))
    .into())
}

/// One human readable line per attached serial port.
#[cfg(feature = "instrument_serial")]
pub fn describe_ports() -> anyhow::Result<Vec<String>> {
    let ports = serialport::available_ports().context("enumerating serial ports")?;
    Ok(ports.iter().map(describe_port).collect())
}

#[cfg(feature = "instrument_serial")]
fn describe_port(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(info) => format!(
            "{} (USB {:04x}:{:04x}, serial {})",
            port.port_name,
            info.vid,
            info.pid,
            info.serial_number.as_deref().unwrap_or("unknown")
        ),
        other => format!("{} ({other:?})", port.port_name),
    }
}

#[cfg(all(test, feature = "instrument_serial"))]
mod tests {
    use super::*;

    #[test]
    fn describes_a_usb_port() {
        let port = serialport::SerialPortInfo {
            port_name: "/dev/ttyUSB0".to_string(),
            port_type: serialport::SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x0403,
                pid: 0x6001,
                serial_number: Some("A10NGBR4A".to_string()),
                manufacturer: Some("FTDI".to_string()),
                product: Some("FT232R USB UART".to_string()),
            }),
        };
        let line = describe_port(&port);
        assert!(line.contains("/dev/ttyUSB0"));
        assert!(line.contains("A10NGBR4A"));
        assert!(line.contains("0403:6001"));
    }
}
