//! ROM bootloader backend built on `espflash`.
//!
//! The controller has already pulsed the boot-select lines by the time
//! [`Loader::probe`] runs, so the connection is made without a second reset.
//! espflash talks through its own handle on the same open port; the session's
//! transport keeps the original one until teardown.

use std::borrow::Cow;

use espflash::connection::{Connection, ResetAfterOperation, ResetBeforeOperation};
use espflash::flasher::Flasher;
use espflash::image_format::Segment;
use espflash::target::ProgressCallbacks;
use log::{debug, info};
use serialport::{SerialPortType, UsbPortInfo};
use webflash::{
    ChipInfo, Error, FlashEntry, FlashOptions, Loader, LoaderFactory, Result, Transport,
    loader::ProgressFn,
};

/// Factory of espflash-backed loaders.
pub struct EspflashLoaders;

impl LoaderFactory for EspflashLoaders {
    fn create(&self, baud_rate: u32) -> Box<dyn Loader> {
        Box::new(EspflashLoader {
            baud_rate,
            flasher: None,
        })
    }
}

struct EspflashLoader {
    baud_rate: u32,
    flasher: Option<Flasher>,
}

impl EspflashLoader {
    fn flasher(&mut self) -> Result<&mut Flasher> {
        self.flasher
            .as_mut()
            .ok_or_else(|| Error::Protocol("chip has not been probed".to_string()))
    }
}

/// USB identity of `name`, or a blank one for non-USB ports.
fn usb_info(name: &str) -> UsbPortInfo {
    serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .find(|p| p.port_name == name)
        .and_then(|p| match p.port_type {
            SerialPortType::UsbPort(info) => Some(info),
            _ => None,
        })
        .unwrap_or(UsbPortInfo {
            vid: 0,
            pid: 0,
            serial_number: None,
            manufacturer: None,
            product: None,
        })
}

/// Sort an espflash failure into the error kinds the session classifies.
fn map_error(err: &espflash::Error) -> Error {
    classify(err.to_string())
}

fn classify(message: String) -> Error {
    let lower = message.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        Error::Timeout(message)
    } else if lower.contains("connect") || lower.contains("sync") || lower.contains("boot") {
        Error::NotInBootMode(message)
    } else {
        Error::Protocol(message)
    }
}

impl Loader for EspflashLoader {
    fn probe(&mut self, transport: &mut dyn Transport) -> Result<ChipInfo> {
        let port = transport.port();
        let native = port
            .as_native()
            .ok_or_else(|| Error::Unsupported(format!("{} is not an OS serial port", port.id())))?;
        let serial = native.try_clone_native()?;

        debug!("espflash: syncing with {} at {} baud", port.id(), self.baud_rate);
        let connection = Connection::new(
            serial,
            usb_info(port.id().as_str()),
            ResetAfterOperation::NoReset,
            ResetBeforeOperation::NoReset,
            self.baud_rate,
        );
        let mut flasher = Flasher::connect(connection, true, true, false, None, None)
            .map_err(|e| map_error(&e))?;

        let device = flasher.device_info().map_err(|e| map_error(&e))?;
        let chip = ChipInfo {
            name: device.chip.to_string(),
            revision: device.revision.map(|(major, minor)| format!("v{major}.{minor}")),
        };
        info!("espflash: detected {}", chip.name);
        self.flasher = Some(flasher);
        Ok(chip)
    }

    fn write_flash(
        &mut self,
        _transport: &mut dyn Transport,
        entries: &[FlashEntry<'_>],
        options: &FlashOptions,
        progress: &mut ProgressFn<'_>,
    ) -> Result<()> {
        let flasher = self.flasher()?;
        if options.erase_all {
            debug!("espflash: erasing whole flash before write");
            flasher.erase_flash().map_err(|e| map_error(&e))?;
        }

        let segments: Vec<Segment<'_>> = entries
            .iter()
            .map(|entry| Segment {
                addr: entry.address,
                data: Cow::Borrowed(entry.data),
            })
            .collect();
        let mut bridge = ProgressBridge::new(entries, progress);
        flasher
            .write_bins_to_flash(&segments, &mut bridge)
            .map_err(|e| map_error(&e))
    }

    fn erase_flash(&mut self, _transport: &mut dyn Transport) -> Result<()> {
        self.flasher()?.erase_flash().map_err(|e| map_error(&e))
    }

    fn hard_reset(&mut self, transport: &mut dyn Transport) -> Result<()> {
        // espflash holds a second handle on the port until dropped.
        self.flasher = None;
        transport.reset_signal()
    }

    fn disconnect(&mut self, _transport: &mut dyn Transport) -> Result<()> {
        self.flasher = None;
        Ok(())
    }
}

/// Turns espflash's per-segment block counts into byte progress.
struct ProgressBridge<'p, 'f> {
    sizes: Vec<(u32, usize)>,
    progress: &'p mut ProgressFn<'f>,
    index: usize,
    blocks: usize,
}

impl<'p, 'f> ProgressBridge<'p, 'f> {
    fn new(entries: &[FlashEntry<'_>], progress: &'p mut ProgressFn<'f>) -> Self {
        Self {
            sizes: entries.iter().map(|e| (e.address, e.data.len())).collect(),
            progress,
            index: 0,
            blocks: 0,
        }
    }

    fn size(&self) -> usize {
        self.sizes.get(self.index).map_or(0, |(_, size)| *size)
    }
}

impl ProgressCallbacks for ProgressBridge<'_, '_> {
    fn init(&mut self, addr: u32, total: usize) {
        self.index = self
            .sizes
            .iter()
            .position(|(start, _)| *start == addr)
            .unwrap_or(self.index);
        self.blocks = total;
        let size = self.size();
        (self.progress)(self.index, 0, size);
    }

    fn update(&mut self, current: usize) {
        let size = self.size();
        let written = if self.blocks == 0 {
            size
        } else {
            (size * current.min(self.blocks)) / self.blocks
        };
        (self.progress)(self.index, written, size);
    }

    fn verifying(&mut self) {
        debug!("espflash: verifying segment {}", self.index);
    }

    fn finish(&mut self, skipped: bool) {
        if skipped {
            debug!("espflash: segment {} already up to date", self.index);
        }
        let size = self.size();
        (self.progress)(self.index, size, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webflash::Failure;

    #[test]
    fn test_sync_failures_get_the_boot_hint() {
        let err = classify("Failed to connect to the device".to_string());
        assert!(matches!(err, Error::NotInBootMode(_)));
        assert_eq!(
            Failure::from_connect_error(&err).message,
            webflash::error::BOOT_HINT
        );

        let err = classify("Timeout while running Sync command".to_string());
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_boot_related());
    }

    #[test]
    fn test_other_failures_are_protocol_errors() {
        let err = classify("Flash chip returned an invalid checksum".to_string());
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_progress_bridge_reports_bytes() {
        let app = vec![0u8; 4096];
        let part = vec![0u8; 100];
        let entries = [
            FlashEntry {
                data: &part,
                address: 0x8000,
                file_name: "partitions.bin",
            },
            FlashEntry {
                data: &app,
                address: 0x10000,
                file_name: "app.bin",
            },
        ];
        let mut seen = Vec::new();
        let mut record =
            |index: usize, written: usize, total: usize| seen.push((index, written, total));
        {
            let mut bridge = ProgressBridge::new(&entries, &mut record);
            bridge.init(0x10000, 4);
            bridge.update(1);
            bridge.update(4);
            bridge.verifying();
            bridge.finish(false);
        }

        assert_eq!(
            seen,
            vec![(1, 0, 4096), (1, 1024, 4096), (1, 4096, 4096), (1, 4096, 4096)]
        );
    }

    #[test]
    fn test_write_before_sync_is_refused() {
        let mut loader = EspflashLoader {
            baud_rate: 115_200,
            flasher: None,
        };
        assert!(matches!(loader.flasher(), Err(Error::Protocol(_))));
    }
}
