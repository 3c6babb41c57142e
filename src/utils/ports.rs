//! Serial port device detection.

use log::{debug, info};
use serialport::{available_ports, SerialPortType};

//==============================================================================
// Public Interface
//==============================================================================

/// Whether the serial device `path` is currently known to the system.
pub(crate) fn port_present(path: &str) -> bool {
    check_requested_port(&enumerate_serial_ports(), path)
}

//==============================================================================
// Private stuff
//==============================================================================

fn check_requested_port(ports: &[String], path: &str) -> bool {
    ports.iter().any(|detected| detected == path)
}

/// Enumerates the serial devices on the system, USB controllers and on-board
/// UARTs alike.
fn enumerate_serial_ports() -> Vec<String> {
    match available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|p| {
                if let SerialPortType::UsbPort(info) = &p.port_type {
                    debug!(
                        "{}: ({} / {})",
                        p.port_name,
                        info.manufacturer.as_deref().unwrap_or(""),
                        info.product.as_deref().unwrap_or("")
                    );
                }
                p.port_name
            })
            .collect(),
        Err(ref e) => {
            info!("error: {}", e.to_string());
            Vec::new()
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[test]
fn requested_port_must_match_exactly() {
    let ports = vec!["/dev/ttyUSB0".to_string(), "/dev/ttyAMA0".to_string()];
    assert!(check_requested_port(&ports, "/dev/ttyAMA0"));
    assert!(!check_requested_port(&ports, "/dev/ttyUSB"));
    assert!(!check_requested_port(&[], "/dev/ttyAMA0"));
}
