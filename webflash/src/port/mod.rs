//! Serial capability boundary.
//!
//! The session controller never touches an OS handle directly. It asks a
//! [`PortProvider`] (the capability) for a [`Port`], opens it, and hands it to
//! a transport which becomes its sole owner.
//!
//! ```text
//! +------------------+
//! |    Controller    |
//! +--------+---------+
//!          | request_port / poll_events
//!          v
//! +--------+---------+      +------------------+
//! |   PortProvider   | ---> |       Port       |
//! +--------+---------+      +--------+---------+
//!          |                         |
//!          v                         v
//! +--------+---------+      +--------+---------+
//! | NativePortProvider|     |    NativePort    |
//! |   (serialport)   |      |   (serialport)   |
//! +------------------+      +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::fmt;
use std::io::{Read, Write};

use crate::error::Result;

/// Identity of a serial port, stable while the device stays plugged in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortId(String);

impl PortId {
    /// Create an id from a port name or path.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The port name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How much of the serial capability the environment exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// No serial capability at all.
    Missing,
    /// The capability exists but cannot request ports.
    NoRequest,
    /// Ports can be requested.
    Usable,
}

/// Notification emitted by the capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A port appeared.
    Connected(PortId),
    /// A port went away.
    Disconnected(PortId),
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Port info carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// Label used in choosers and listings.
    pub fn label(&self) -> String {
        match (&self.product, self.vid, self.pid) {
            (Some(product), Some(vid), Some(pid)) => {
                format!("{} ({product}, {vid:04x}:{pid:04x})", self.name)
            },
            (None, Some(vid), Some(pid)) => format!("{} ({vid:04x}:{pid:04x})", self.name),
            _ => self.name.clone(),
        }
    }
}

/// A serial port granted by the capability.
///
/// A port is handed out closed; the controller opens it at the handshake baud
/// rate and closes it during teardown.
pub trait Port: Read + Write + Send {
    /// Identity of the port.
    fn id(&self) -> &PortId;

    /// Open the port at the given baud rate.
    fn open(&mut self, baud_rate: u32) -> Result<()>;

    /// Whether the port is currently open.
    fn is_open(&self) -> bool;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Close the port and release resources.
    ///
    /// Closing a port that is not open is a no-op.
    fn close(&mut self) -> Result<()>;

    /// The OS serial port behind this port, if it is one.
    ///
    /// Loaders that drive the device through their own serial stack use this
    /// to get a second handle on the same open port.
    #[cfg(feature = "native")]
    fn as_native(&self) -> Option<&NativePort> {
        None
    }
}

/// The serial capability: grants ports and reports plug events.
pub trait PortProvider {
    /// Whether the host runs in a secure context.
    fn is_secure_context(&self) -> bool {
        true
    }

    /// How much of the capability is available.
    fn capability(&self) -> Capability;

    /// Ask for a port. May fail with `UserCancelled` or `PermissionDenied`.
    fn request_port(&mut self) -> Result<Box<dyn Port>>;

    /// Drain pending connect/disconnect notifications.
    fn poll_events(&mut self) -> Vec<PortEvent> {
        Vec::new()
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{FirstAvailable, FixedPort, NativePort, NativePortEnumerator, NativePortProvider, PortChooser};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_info_label() {
        let mut info = PortInfo::named("/dev/ttyUSB0");
        assert_eq!(info.label(), "/dev/ttyUSB0");

        info.vid = Some(0x10c4);
        info.pid = Some(0xea60);
        assert_eq!(info.label(), "/dev/ttyUSB0 (10c4:ea60)");

        info.product = Some("CP2102".into());
        assert_eq!(info.label(), "/dev/ttyUSB0 (CP2102, 10c4:ea60)");
    }

    #[test]
    fn test_port_id_display() {
        assert_eq!(PortId::new("COM3").to_string(), "COM3");
    }
}
