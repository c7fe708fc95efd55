//! Native serial capability using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{Capability, Port, PortEnumerator, PortEvent, PortId, PortInfo, PortProvider},
    },
    log::{debug, trace},
    serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits},
    std::{
        collections::BTreeSet,
        io::{Read, Write},
        time::Duration,
    },
};

/// Default read/write timeout of a native port.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// The platform's serial handle type.
#[cfg(unix)]
pub type NativeSerial = serialport::TTYPort;
/// The platform's serial handle type.
#[cfg(windows)]
pub type NativeSerial = serialport::COMPort;

/// Native serial port. Handed out closed by [`NativePortProvider`].
pub struct NativePort {
    id: PortId,
    timeout: Duration,
    port: Option<NativeSerial>,
}

impl NativePort {
    /// Create a closed port for the given path.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: PortId::new(name),
            timeout: DEFAULT_TIMEOUT,
            port: None,
        }
    }

    /// Set the read/write timeout used when the port is opened.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A second OS handle on the open port.
    pub fn try_clone_native(&self) -> Result<NativeSerial> {
        let port = self.port.as_ref().ok_or(Error::PortClosed)?;
        Ok(port.try_clone_native()?)
    }

    fn inner(&mut self) -> std::io::Result<&mut NativeSerial> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
    }
}

fn map_open_error(err: serialport::Error) -> Error {
    match err.kind {
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            Error::PermissionDenied(err.description)
        },
        _ => Error::Serial(err),
    }
}

impl Port for NativePort {
    fn id(&self) -> &PortId {
        &self.id
    }

    fn open(&mut self, baud_rate: u32) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        debug!("Opening {} at {baud_rate} baud", self.id);
        let port = serialport::new(self.id.as_str(), baud_rate)
            .timeout(self.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native()
            .map_err(map_open_error)?;
        self.port = Some(port);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        trace!("Setting DTR to {level}");
        match self.port {
            Some(ref mut p) => Ok(p.write_data_terminal_ready(level)?),
            None => Err(Error::PortClosed),
        }
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("Setting RTS to {level}");
        match self.port {
            Some(ref mut p) => Ok(p.write_request_to_send(level)?),
            None => Err(Error::PortClosed),
        }
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the handle closes it
        if self.port.take().is_some() {
            debug!("Closed {}", self.id);
        }
        Ok(())
    }

    fn as_native(&self) -> Option<&NativePort> {
        Some(self)
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner()?.read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner()?.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner()?.flush()
    }
}

/// Native port enumerator.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| match p.port_type {
                serialport::SerialPortType::UsbPort(info) => PortInfo {
                    name: p.port_name,
                    vid: Some(info.vid),
                    pid: Some(info.pid),
                    manufacturer: info.manufacturer,
                    product: info.product,
                    serial_number: info.serial_number,
                },
                _ => PortInfo::named(p.port_name),
            })
            .collect())
    }
}

/// Picks one port out of the available ones.
///
/// This is the native counterpart of a browser's port chooser: returning
/// `Error::UserCancelled` means the operator dismissed it.
pub trait PortChooser: Send {
    /// Choose a port.
    fn choose(&mut self, ports: &[PortInfo]) -> Result<PortInfo>;
}

/// Always use the named port, whether or not it is enumerated.
pub struct FixedPort(pub String);

impl PortChooser for FixedPort {
    fn choose(&mut self, ports: &[PortInfo]) -> Result<PortInfo> {
        Ok(ports
            .iter()
            .find(|p| p.name == self.0 || p.name.eq_ignore_ascii_case(&self.0))
            .cloned()
            .unwrap_or_else(|| PortInfo::named(self.0.clone())))
    }
}

/// Use the first USB port, else the first port of any kind.
pub struct FirstAvailable;

impl PortChooser for FirstAvailable {
    fn choose(&mut self, ports: &[PortInfo]) -> Result<PortInfo> {
        ports
            .iter()
            .find(|p| p.vid.is_some())
            .or_else(|| ports.first())
            .cloned()
            .ok_or_else(|| Error::PermissionDenied("no serial ports available".to_string()))
    }
}

/// Native serial capability.
///
/// Plug events are derived by diffing the enumerated port names between two
/// calls to [`PortProvider::poll_events`].
pub struct NativePortProvider {
    chooser: Box<dyn PortChooser>,
    timeout: Duration,
    known: BTreeSet<String>,
}

impl NativePortProvider {
    /// Create a provider that picks ports with `chooser`.
    pub fn new(chooser: Box<dyn PortChooser>) -> Self {
        let known = Self::snapshot().unwrap_or_default();
        Self {
            chooser,
            timeout: DEFAULT_TIMEOUT,
            known,
        }
    }

    /// Set the timeout of the ports this provider hands out.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn snapshot() -> Result<BTreeSet<String>> {
        Ok(NativePortEnumerator::list_ports()?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }
}

impl PortProvider for NativePortProvider {
    fn capability(&self) -> Capability {
        Capability::Usable
    }

    fn request_port(&mut self) -> Result<Box<dyn Port>> {
        let ports = NativePortEnumerator::list_ports()?;
        let chosen = self.chooser.choose(&ports)?;
        debug!("Port granted: {}", chosen.label());
        Ok(Box::new(NativePort::new(chosen.name).with_timeout(self.timeout)))
    }

    fn poll_events(&mut self) -> Vec<PortEvent> {
        let current = match Self::snapshot() {
            Ok(current) => current,
            Err(e) => {
                debug!("Port enumeration failed: {e}");
                return Vec::new();
            },
        };

        let mut events: Vec<PortEvent> = self
            .known
            .difference(&current)
            .map(|name| PortEvent::Disconnected(PortId::new(name.clone())))
            .collect();
        events.extend(
            current
                .difference(&self.known)
                .map(|name| PortEvent::Connected(PortId::new(name.clone()))),
        );
        self.known = current;
        events
    }
}
