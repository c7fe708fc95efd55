//! Bootloader backends available to the terminal host.
//!
//! Real boards are driven by [`EspflashLoaders`]. `--dry-run` swaps in a
//! rehearsal board that accepts every command, so the whole session can be
//! exercised without hardware.

use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use log::{debug, trace};
use webflash::{
    Capability, ChipInfo, Error, FlashEntry, FlashOptions, Loader, LoaderFactory, Port, PortId,
    PortProvider, Result, Transport, loader::ProgressFn,
};

use crate::Cli;
use crate::esp::EspflashLoaders;

/// Name of the simulated port.
pub const REHEARSAL_PORT: &str = "dry-run";

/// Chip reported by the rehearsal board.
pub const REHEARSAL_CHIP: &str = "ESP32 (dry run)";

const CHUNK: usize = 0x4000;
const CHUNK_PACE: Duration = Duration::from_millis(10);
const ERASE_PACE: Duration = Duration::from_millis(100);

/// Pick the loader factory.
pub(crate) fn loaders(cli: &Cli) -> Box<dyn LoaderFactory> {
    if cli.dry_run {
        Box::new(RehearsalLoaders)
    } else {
        Box::new(EspflashLoaders)
    }
}

/// Capability that always grants the simulated port.
#[derive(Debug, Default)]
pub struct RehearsalProvider {
    grants: usize,
}

impl PortProvider for RehearsalProvider {
    fn capability(&self) -> Capability {
        Capability::Usable
    }

    fn request_port(&mut self) -> Result<Box<dyn Port>> {
        self.grants += 1;
        debug!("Granting rehearsal port (grant #{})", self.grants);
        Ok(Box::new(RehearsalPort::new()))
    }
}

/// A port that swallows writes and never answers.
pub struct RehearsalPort {
    id: PortId,
    open: bool,
    written: usize,
}

impl RehearsalPort {
    fn new() -> Self {
        Self {
            id: PortId::new(REHEARSAL_PORT),
            open: false,
            written: 0,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::PortClosed)
        }
    }
}

impl Port for RehearsalPort {
    fn id(&self) -> &PortId {
        &self.id
    }

    fn open(&mut self, baud_rate: u32) -> Result<()> {
        debug!("Rehearsal port opened at {baud_rate} baud");
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.ensure_open()?;
        trace!("DTR={level}");
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.ensure_open()?;
        trace!("RTS={level}");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        debug!("Rehearsal port closed after {} bytes", self.written);
        self.open = false;
        Ok(())
    }
}

impl Read for RehearsalPort {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(0)
    }
}

impl Write for RehearsalPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Factory of rehearsal loaders.
pub struct RehearsalLoaders;

impl LoaderFactory for RehearsalLoaders {
    fn create(&self, baud_rate: u32) -> Box<dyn Loader> {
        Box::new(RehearsalLoader { baud_rate })
    }
}

/// Loader that streams images into the transport and reports progress.
struct RehearsalLoader {
    baud_rate: u32,
}

impl Loader for RehearsalLoader {
    fn probe(&mut self, transport: &mut dyn Transport) -> Result<ChipInfo> {
        transport.flush()?;
        debug!("Rehearsal probe at {} baud", self.baud_rate);
        Ok(ChipInfo {
            name: REHEARSAL_CHIP.to_string(),
            revision: Some("v3.0".to_string()),
        })
    }

    fn write_flash(
        &mut self,
        transport: &mut dyn Transport,
        entries: &[FlashEntry<'_>],
        options: &FlashOptions,
        progress: &mut ProgressFn<'_>,
    ) -> Result<()> {
        if options.erase_all {
            self.erase_flash(transport)?;
        }
        for (index, entry) in entries.iter().enumerate() {
            debug!(
                "Writing {} ({} bytes) at {:#x}",
                entry.file_name,
                entry.data.len(),
                entry.address
            );
            let total = entry.data.len();
            let mut written = 0;
            progress(index, 0, total);
            for chunk in entry.data.chunks(CHUNK) {
                if webflash::is_interrupted_requested() {
                    return Err(Error::Protocol("write interrupted".to_string()));
                }
                transport.write_all(chunk)?;
                written += chunk.len();
                progress(index, written, total);
                thread::sleep(CHUNK_PACE);
            }
        }
        transport.flush()?;
        Ok(())
    }

    fn erase_flash(&mut self, transport: &mut dyn Transport) -> Result<()> {
        transport.flush()?;
        thread::sleep(ERASE_PACE);
        Ok(())
    }

    fn hard_reset(&mut self, transport: &mut dyn Transport) -> Result<()> {
        transport.reset_signal()
    }
}
