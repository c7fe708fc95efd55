//! Bootloader boundary.
//!
//! The chip-specific protocol (sync, chip detection, stub upload, compressed
//! chunked writes with MD5 verification) lives in an external bootloader
//! library. This module only fixes the seams the controller talks to:
//!
//! - [`Transport`]: the line-control and byte channel over an open port.
//!   [`SerialTransport`] is the stock implementation.
//! - [`Loader`]: the protocol handle bound to a transport.
//! - [`LoaderFactory`]: creates loaders at the handshake baud rate.

use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::port::{Port, PortId};

/// Width of the reset pulse sent by [`SerialTransport::reset_signal`].
const RESET_PULSE: Duration = Duration::from_millis(100);

/// Byte channel and line-control signals over an open port.
///
/// The transport owns the port; the port is closed separately from
/// [`Transport::disconnect`] so teardown can run each step on its own.
pub trait Transport: Read + Write + Send {
    /// The underlying port.
    fn port(&self) -> &dyn Port;

    /// Mutable access to the underlying port.
    fn port_mut(&mut self) -> &mut dyn Port;

    /// Set DTR (boot-select on common auto-reset circuits).
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (reset on common auto-reset circuits).
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Pulse the reset line so the chip restarts into its application.
    fn reset_signal(&mut self) -> Result<()>;

    /// Stop using the channel. The port stays open.
    fn disconnect(&mut self) -> Result<()>;
}

/// Stock transport over any [`Port`].
pub struct SerialTransport {
    port: Box<dyn Port>,
    active: bool,
}

impl SerialTransport {
    /// Wrap an open port.
    pub fn new(port: Box<dyn Port>) -> Self {
        Self { port, active: true }
    }

    /// Identity of the wrapped port.
    pub fn port_id(&self) -> &PortId {
        self.port.id()
    }

    fn ensure_active(&self) -> std::io::Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport disconnected",
            ))
        }
    }
}

impl Transport for SerialTransport {
    fn port(&self) -> &dyn Port {
        self.port.as_ref()
    }

    fn port_mut(&mut self) -> &mut dyn Port {
        self.port.as_mut()
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        trace!("transport: DTR={level}");
        self.port.set_dtr(level)
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        trace!("transport: RTS={level}");
        self.port.set_rts(level)
    }

    fn reset_signal(&mut self) -> Result<()> {
        debug!("Pulsing reset on {}", self.port.id());
        self.port.set_dtr(false)?;
        self.port.set_rts(true)?;
        thread::sleep(RESET_PULSE);
        self.port.set_rts(false)
    }

    fn disconnect(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        if self.port.is_open() {
            self.port.flush()?;
        }
        Ok(())
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.ensure_active()?;
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.ensure_active()?;
        self.port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.ensure_active()?;
        self.port.flush()
    }
}

/// Identification returned by a successful chip probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChipInfo {
    /// Chip model, e.g. "ESP32-S3". Empty when the loader cannot tell.
    pub name: String,
    /// Silicon revision, if reported.
    pub revision: Option<String>,
}

impl ChipInfo {
    /// Chip info with a model name only.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            revision: None,
        }
    }
}

/// One image to write.
#[derive(Debug, Clone, Copy)]
pub struct FlashEntry<'a> {
    /// Image bytes.
    pub data: &'a [u8],
    /// Flash offset.
    pub address: u32,
    /// File name shown in loader logs.
    pub file_name: &'a str,
}

/// Flash size handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashSize {
    /// Keep the size stored in the image header.
    #[default]
    Keep,
    /// Detect the size and patch the header.
    Detect,
}

/// Options of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashOptions {
    /// Erase the whole chip before writing.
    pub erase_all: bool,
    /// Compress chunks on the wire.
    pub compress: bool,
    /// Verify the written region with an MD5 digest.
    pub calculate_md5: bool,
    /// Flash size handling.
    pub flash_size: FlashSize,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            erase_all: false,
            compress: true,
            calculate_md5: true,
            flash_size: FlashSize::Keep,
        }
    }
}

/// Progress callback: `(entry_index, bytes_written, total_bytes)`.
pub type ProgressFn<'a> = dyn FnMut(usize, usize, usize) + 'a;

/// Bootloader protocol handle.
///
/// Every operation receives the transport it is bound to; the loader never
/// owns the port.
pub trait Loader: Send {
    /// Sync with the ROM bootloader and identify the chip.
    fn probe(&mut self, transport: &mut dyn Transport) -> Result<ChipInfo>;

    /// Write images, reporting progress as bytes are acknowledged.
    fn write_flash(
        &mut self,
        transport: &mut dyn Transport,
        entries: &[FlashEntry<'_>],
        options: &FlashOptions,
        progress: &mut ProgressFn<'_>,
    ) -> Result<()>;

    /// Erase the whole flash.
    fn erase_flash(&mut self, transport: &mut dyn Transport) -> Result<()>;

    /// Restart the chip into its application.
    fn hard_reset(&mut self, _transport: &mut dyn Transport) -> Result<()> {
        Err(Error::Unsupported("hard reset".to_string()))
    }

    /// Release loader state before the transport goes away.
    fn disconnect(&mut self, _transport: &mut dyn Transport) -> Result<()> {
        Ok(())
    }
}

/// Creates protocol handles.
pub trait LoaderFactory {
    /// Create a loader that talks at `baud_rate`.
    fn create(&self, baud_rate: u32) -> Box<dyn Loader>;
}
