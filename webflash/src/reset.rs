//! Manual reset into the ROM bootloader.
//!
//! On the usual auto-reset circuit DTR drives the boot-select strap and RTS
//! drives reset (both active when asserted). The chip samples boot-select
//! when it leaves reset, so boot-select must still be held after RTS is
//! released and only be let go once the boot ROM has settled. Releasing it
//! earlier boots the application instead.

use std::thread;
use std::time::Duration;

use log::debug;

use crate::config::ResetTiming;
use crate::error::Result;
use crate::loader::Transport;

/// Drive the chip into bootloader mode, sleeping between steps.
pub fn enter_bootloader(transport: &mut dyn Transport, timing: &ResetTiming) -> Result<()> {
    enter_bootloader_with(transport, timing, thread::sleep)
}

/// Same as [`enter_bootloader`] with an injectable wait.
pub fn enter_bootloader_with(
    transport: &mut dyn Transport,
    timing: &ResetTiming,
    mut wait: impl FnMut(Duration),
) -> Result<()> {
    debug!("Entering bootloader on {}", transport.port().id());

    transport.set_dtr(false)?;
    transport.set_rts(false)?;
    wait(Duration::from_millis(timing.release_ms));

    // Boot-select and reset low
    transport.set_dtr(true)?;
    transport.set_rts(true)?;
    wait(Duration::from_millis(timing.hold_ms));

    // Out of reset with boot-select still held
    transport.set_rts(false)?;
    wait(Duration::from_millis(timing.boot_settle_ms));

    transport.set_dtr(false)?;
    Ok(())
}
