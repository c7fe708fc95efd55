//! Device-session controller.
//!
//! The [`Controller`] is the only thing that mutates a [`Session`]. Every
//! public operation runs to completion, records its outcome in the status
//! banner and the session log, and never lets an error escape unreported:
//! the returned [`Outcome`] is a copy for hosts that want an exit code.
//!
//! ```text
//!            connect()              flash_firmware() / erase_flash()
//!  Idle ---------------> Connecting ----> Connected ----------------> Flashing
//!   ^                        |               ^  |                        |
//!   |        failure         |               |  +------ finished --------+
//!   +------------------------+               |
//!   +------------- disconnect() / port gone / drop ----------------------+
//! ```

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{DEFAULT_FLASH_ADDRESS, FlasherConfig};
use crate::env::{EnvironmentGate, Readiness};
use crate::error::{Error, Failure, FailureKind, Result};
use crate::firmware::{self, AssetClient, Firmware};
use crate::loader::{FlashEntry, FlashOptions, LoaderFactory, SerialTransport, Transport};
use crate::port::{Capability, PortEvent, PortProvider};
use crate::reset;
use crate::session::{Blocked, Link, LogEntry, Progress, Session, Status, StatusVariant};
use crate::ui::{self, View};

/// Result of a controller operation. The failure has already been reported.
pub type Outcome = std::result::Result<(), Failure>;

/// Chip label used when the loader cannot name the chip.
pub const UNKNOWN_CHIP: &str = "ESP device";

/// Receives session updates as they happen.
///
/// Hosts that render continuously (a progress bar, a scrolling log) install
/// one with [`Controller::set_listener`]. Hosts that render on demand can
/// ignore it and call [`Controller::view`].
pub trait SessionListener {
    /// The status banner changed.
    fn on_status(&mut self, _status: &Status) {}

    /// The status banner was removed.
    fn on_status_cleared(&mut self) {}

    /// The progress bar changed.
    fn on_progress(&mut self, _progress: &Progress) {}

    /// A line was appended to the session log.
    fn on_log(&mut self, _entry: &LogEntry) {}
}

/// Where a firmware image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareOrigin {
    /// Downloaded from the asset server.
    Asset,
    /// Picked by the operator.
    UserFile,
}

/// Short human form of a delay: whole seconds as `1s`, anything else in ms.
fn describe_delay(delay: Duration) -> String {
    let ms = delay.as_millis();
    if ms > 0 && ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{ms}ms")
    }
}

/// Resolve a flash offset from free text.
///
/// Blank text gives `0x1000`. The text is first read as a number literal:
/// decimal with optional sign, fraction and exponent (`4096`, `+8192`,
/// `1e3`, `.5`), or `0x`/`0o`/`0b` prefixed. A non-negative value is floored.
/// Otherwise the leading hex digits are used (`1a00`). Negative values, text
/// with no usable digits and values beyond `u32` give `0x1000`.
pub fn parse_address(text: &str) -> u32 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return DEFAULT_FLASH_ADDRESS;
    }

    match parse_literal(trimmed) {
        Some(value) if value >= 0.0 => floor_to_address(value),
        _ => parse_leading_hex(trimmed).unwrap_or(DEFAULT_FLASH_ADDRESS),
    }
}

/// Numeric value of a whole literal, `None` when the text is not one.
fn parse_literal(text: &str) -> Option<f64> {
    for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        let Some(head) = text.get(..2) else { break };
        if head.eq_ignore_ascii_case(prefix) {
            let digits = &text[2..];
            if digits.is_empty() {
                return None;
            }
            return digits.chars().try_fold(0.0_f64, |acc, c| {
                c.to_digit(radix)
                    .map(|d| acc * f64::from(radix) + f64::from(d))
            });
        }
    }

    let lower = text.to_ascii_lowercase();
    if lower.contains("inf") || lower.contains("nan") {
        return None;
    }
    text.parse::<f64>().ok()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn floor_to_address(value: f64) -> u32 {
    let floored = value.floor();
    if floored <= f64::from(u32::MAX) {
        floored as u32
    } else {
        DEFAULT_FLASH_ADDRESS
    }
}

/// Leading hex digits after an optional sign and `0x` prefix.
fn parse_leading_hex(text: &str) -> Option<u32> {
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let rest = rest
        .strip_prefix("0x")
        .or_else(|| rest.strip_prefix("0X"))
        .unwrap_or(rest);
    let end = rest
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    let value = u32::from_str_radix(&rest[..end], 16).ok()?;
    if negative && value != 0 {
        return None;
    }
    Some(value)
}

/// Owns the session and every collaborator it talks to.
pub struct Controller {
    config: FlasherConfig,
    provider: Box<dyn PortProvider>,
    loaders: Box<dyn LoaderFactory>,
    assets: Box<dyn AssetClient>,
    gate: EnvironmentGate,
    session: Session,
    listener: Option<Box<dyn SessionListener>>,
}

impl Controller {
    /// Create a controller with a fresh session.
    pub fn new(
        config: FlasherConfig,
        provider: Box<dyn PortProvider>,
        loaders: Box<dyn LoaderFactory>,
        assets: Box<dyn AssetClient>,
    ) -> Self {
        Self {
            config,
            provider,
            loaders,
            assets,
            gate: EnvironmentGate::default(),
            session: Session::new(),
            listener: None,
        }
    }

    /// Install a listener for live updates.
    pub fn set_listener(&mut self, listener: Box<dyn SessionListener>) {
        self.listener = Some(listener);
    }

    /// The session, read-only.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Active configuration.
    pub fn config(&self) -> &FlasherConfig {
        &self.config
    }

    /// Re-check the environment, updating the banner if the answer changed.
    pub fn refresh_environment(&mut self) -> Readiness {
        let before = self.session.status.clone();
        let readiness = self
            .gate
            .evaluate(self.provider.as_ref(), &mut self.session.status);
        if self.session.status != before {
            if let Some(listener) = self.listener.as_mut() {
                match self.session.status.as_ref() {
                    Some(status) => listener.on_status(status),
                    None => listener.on_status_cleared(),
                }
            }
        }
        readiness
    }

    /// Re-check the environment and project the session for rendering.
    pub fn view(&mut self) -> View<'_> {
        let ready = self.refresh_environment().ready;
        ui::project(&self.session, ready)
    }

    /// Set the start-address field.
    pub fn set_start_address(&mut self, text: impl Into<String>) {
        self.session.form.start_address = text.into();
    }

    /// Set the erase-all checkbox.
    pub fn set_erase_all(&mut self, erase_all: bool) {
        self.session.form.erase_all = erase_all;
    }

    /// Arm the one-shot automatic flash for the next successful connect.
    pub fn arm_auto_flash(&mut self) {
        self.session.auto_flash_pending = true;
    }

    /// Clear the session log.
    pub fn clear_log(&mut self) {
        self.session.log.clear();
    }

    /// Connect to a device and identify the chip.
    pub fn connect(&mut self) -> Outcome {
        if self.session.is_connecting() || self.session.has_port() {
            debug!("connect ignored in {:?}", self.session.phase());
            return Ok(());
        }
        if self.provider.capability() != Capability::Usable {
            let failure = Failure::new(
                FailureKind::EnvironmentUnsupported,
                "This environment does not support serial access.",
            );
            self.set_status(&failure.message, StatusVariant::Danger);
            return Err(failure);
        }
        if !self.session.begin_connect() {
            return Ok(());
        }

        self.set_status("Connecting...", StatusVariant::Info);

        match self.open_link() {
            Ok(link) => {
                let chip = link.chip().to_string();
                let auto_flash = self.session.complete_connect(link);
                self.set_status(&format!("Connected: {chip}"), StatusVariant::Success);
                self.note(format!("Connected. Chip: {chip}"));

                if auto_flash {
                    let delay = self.config.auto_flash_delay();
                    self.note(format!("Auto-flashing in {}...", describe_delay(delay)));
                    self.session.scheduled_flash = Some(Instant::now() + delay);
                }
                Ok(())
            },
            Err(err) => {
                self.session.abort_connect();
                self.note(format!("Connect failed: {err}"));
                let failure = Failure::from_connect_error(&err);
                self.set_status(&failure.message, StatusVariant::Danger);
                Err(failure)
            },
        }
    }

    fn open_link(&mut self) -> Result<Link> {
        let mut port = self.provider.request_port()?;
        port.open(self.config.baud_rate)?;
        info!("Opened {} at {} baud", port.id(), self.config.baud_rate);

        let mut transport: Box<dyn Transport> = Box::new(SerialTransport::new(port));

        self.note("Sending bootloader reset...");
        if let Err(err) = reset::enter_bootloader(transport.as_mut(), &self.config.reset) {
            warn!("Bootloader reset failed: {err}");
            self.note(format!("Reset sequence failed: {err}"));
        }

        let mut loader = self.loaders.create(self.config.baud_rate);
        match loader.probe(transport.as_mut()) {
            Ok(chip) => {
                let name = if chip.name.is_empty() {
                    UNKNOWN_CHIP.to_string()
                } else {
                    chip.name
                };
                Ok(Link::new(transport, loader, name))
            },
            Err(err) => {
                self.note(format!("Chip detection failed: {err}"));
                if let Err(e) = transport.disconnect() {
                    debug!("transport release failed: {e}");
                }
                if let Err(e) = transport.port_mut().close() {
                    debug!("port release failed: {e}");
                }
                Err(err)
            },
        }
    }

    /// Tear the link down. With `announce`, report it on the banner.
    ///
    /// Does nothing when no link is held.
    pub fn disconnect(&mut self, announce: bool) {
        let Some(link) = self.session.release_link() else {
            return;
        };
        self.teardown(link);
        if announce {
            self.set_status("Device disconnected.", StatusVariant::Info);
        }
    }

    fn teardown(&mut self, link: Link) {
        info!("Closing {}", link.port_id());
        let (mut transport, loader) = link.into_parts();

        if let Some(mut loader) = loader {
            if let Err(err) = loader.disconnect(transport.as_mut()) {
                self.teardown_failed("loader", &err);
            }
        }
        if let Err(err) = transport.disconnect() {
            self.teardown_failed("transport", &err);
        }
        if let Err(err) = transport.port_mut().close() {
            self.teardown_failed("port", &err);
        }
    }

    fn teardown_failed(&mut self, step: &str, err: &Error) {
        let failure = Failure::from_teardown_error(step, err);
        warn!("{failure}");
        self.note(failure.message);
    }

    /// Route a capability notification.
    pub fn handle_port_event(&mut self, event: &PortEvent) {
        match event {
            PortEvent::Disconnected(id) if self.session.port_id() == Some(id) => {
                self.disconnect(false);
                self.set_status("Device was disconnected.", StatusVariant::Warning);
            },
            PortEvent::Disconnected(id) => debug!("ignoring removal of {id}"),
            PortEvent::Connected(id) => debug!("port {id} appeared"),
        }
    }

    /// Write the loaded firmware at the address in the form.
    pub fn flash_firmware(&mut self) -> Outcome {
        match self.session.begin_flash() {
            Ok(()) => {},
            Err(Blocked::Busy) => return Ok(()),
            Err(Blocked::NotConnected) => return Err(self.precondition("Not connected to a device.")),
            Err(Blocked::NoFirmware) => return Err(self.precondition("No firmware loaded.")),
        }

        let address = parse_address(&self.session.form.start_address);
        let erase_all = self.session.form.erase_all;
        self.set_status("Flashing firmware...", StatusVariant::Info);
        self.note(format!("Flashing at {address:#x} (erase all: {erase_all})."));
        self.set_progress(Progress::new(0.0, "Preparing..."));

        let options = FlashOptions {
            erase_all,
            ..FlashOptions::default()
        };
        let outcome = match self.write_image(address, &options) {
            Ok(()) => {
                self.restart_device();
                self.set_status("Flash complete! The device is restarting.", StatusVariant::Success);
                self.note("Done.");
                Ok(())
            },
            Err(err) => {
                let failure = Failure::from_flash_error(&err);
                self.set_status(&failure.message, StatusVariant::Danger);
                self.note(format!("Error: {err}"));
                Err(failure)
            },
        };

        self.session.finish_transfer();
        outcome
    }

    fn write_image(&mut self, address: u32, options: &FlashOptions) -> Result<()> {
        let Self {
            session, listener, ..
        } = self;
        let Session {
            link,
            firmware,
            progress,
            ..
        } = session;

        let (Some(link), Some(firmware)) = (link.as_mut(), firmware.as_ref()) else {
            return Err(Error::PortClosed);
        };
        let (transport, loader) = link.parts_mut().ok_or(Error::PortClosed)?;

        let entry = FlashEntry {
            data: firmware.data(),
            address,
            file_name: firmware.file_name(),
        };
        let mut on_progress = |_index: usize, written: usize, total: usize| {
            *progress = Progress::from_bytes(written, total);
            if let Some(listener) = listener.as_mut() {
                listener.on_progress(progress);
            }
        };

        loader.write_flash(transport, &[entry], options, &mut on_progress)
    }

    fn restart_device(&mut self) {
        let result = match self.session.link.as_mut().and_then(Link::parts_mut) {
            Some((transport, loader)) => match loader.hard_reset(transport) {
                Ok(()) => Ok(()),
                Err(err) => {
                    debug!("hard reset unavailable ({err}), pulsing reset line");
                    transport.reset_signal()
                },
            },
            None => Err(Error::PortClosed),
        };

        if let Err(err) = result {
            warn!("Device reset failed: {err}");
            self.note("Could not reset the device automatically.");
        }
    }

    /// Erase the whole flash.
    ///
    /// Ignored unless connected and idle.
    pub fn erase_flash(&mut self) -> Outcome {
        if let Err(blocked) = self.session.begin_erase() {
            debug!("erase ignored: {blocked:?}");
            return Ok(());
        }

        self.set_status("Erasing flash... (please wait)", StatusVariant::Info);
        self.note("Erasing flash...");

        let result = match self.session.link.as_mut().and_then(Link::parts_mut) {
            Some((transport, loader)) => loader.erase_flash(transport),
            None => Err(Error::PortClosed),
        };
        let outcome = match result {
            Ok(()) => {
                self.set_status("Flash erased.", StatusVariant::Success);
                self.note("Flash erase complete.");
                Ok(())
            },
            Err(err) => {
                let failure = Failure::from_erase_error(&err);
                self.set_status(&failure.message, StatusVariant::Danger);
                self.note(failure.message.clone());
                Err(failure)
            },
        };

        self.session.finish_transfer();
        outcome
    }

    /// Download an image from the asset server.
    pub fn load_from_remote(&mut self, name: &str) -> Outcome {
        self.note(format!("Loading firmware from assets: {name}..."));
        self.set_status("Loading firmware from assets...", StatusVariant::Info);

        let result = firmware::fetch_remote(self.assets.as_ref(), name);
        self.settle_load(result, FirmwareOrigin::Asset)
    }

    /// Download the configured default image.
    pub fn load_default_firmware(&mut self) -> Outcome {
        let name = self.config.default_firmware.clone();
        self.load_from_remote(&name)
    }

    /// Read an image the operator picked.
    pub fn load_from_user_file(&mut self, path: &std::path::Path) -> Outcome {
        let result = firmware::read_user_file(path);
        self.settle_load(result, FirmwareOrigin::UserFile)
    }

    /// Install an image the host already holds in memory.
    pub fn install_firmware(&mut self, firmware: Firmware, origin: FirmwareOrigin) {
        let name = firmware.name().to_string();
        let len = firmware.len();
        self.session.firmware = Some(firmware);

        match origin {
            FirmwareOrigin::Asset => {
                self.session.firmware_label = format!("Loaded: {name}");
                self.note(format!("Loaded firmware: {name} ({len} bytes)."));
                self.set_status("Firmware ready. Press Connect to start.", StatusVariant::Info);
            },
            FirmwareOrigin::UserFile => {
                self.session.firmware_label = format!("Selected: {name}");
                self.note(format!("Selected firmware: {name} ({len} bytes)."));
                self.set_status(
                    "Firmware ready. Connect the device, then press Flash.",
                    StatusVariant::Info,
                );
            },
        }
    }

    fn settle_load(&mut self, result: Result<Firmware>, origin: FirmwareOrigin) -> Outcome {
        let outcome = match result {
            Ok(firmware) => {
                self.install_firmware(firmware, origin);
                Ok(())
            },
            Err(err) => {
                self.session.firmware = None;
                let failure = Failure::from_source_error(&err);
                self.set_status(&failure.message, StatusVariant::Danger);
                self.note(format!("Firmware load failed: {err}"));
                Err(failure)
            },
        };
        self.set_progress(Progress::default());
        outcome
    }

    /// Schedule the automatic firmware load relative to `now`.
    pub fn schedule_auto_init(&mut self, now: Instant) {
        self.session.scheduled_init = Some(now + self.config.mount.auto_init_delay());
    }

    /// Load the default firmware and arm the automatic flash.
    ///
    /// With `auto_connect` set, connecting starts right after the load.
    pub fn auto_initialize(&mut self) {
        self.note("Loading default firmware...");
        if let Err(failure) = self.load_default_firmware() {
            debug!("auto-init load failed: {failure}");
        }
        self.arm_auto_flash();

        if self.config.auto_connect {
            if let Err(failure) = self.connect() {
                debug!("auto-connect failed: {failure}");
            }
        }
    }

    /// Drive time-based work: capability events, auto-init, auto-flash.
    pub fn tick(&mut self, now: Instant) {
        for event in self.provider.poll_events() {
            self.handle_port_event(&event);
        }
        if self.session.take_due_init(now) {
            self.auto_initialize();
        }
        if self.session.take_due_flash(now) {
            if let Err(failure) = self.flash_firmware() {
                debug!("auto-flash failed: {failure}");
            }
        }
    }

    /// Release the device. Runs on drop as well.
    pub fn shutdown(&mut self) {
        self.disconnect(false);
    }

    fn precondition(&mut self, message: &str) -> Failure {
        self.set_status(message, StatusVariant::Danger);
        Failure::new(FailureKind::Precondition, message)
    }

    fn set_status(&mut self, message: &str, variant: StatusVariant) {
        match variant {
            StatusVariant::Danger | StatusVariant::Warning => warn!("{message}"),
            StatusVariant::Info | StatusVariant::Success => info!("{message}"),
        }
        let status = Status {
            message: message.to_string(),
            variant,
        };
        if let Some(listener) = self.listener.as_mut() {
            listener.on_status(&status);
        }
        self.session.status = Some(status);
    }

    fn set_progress(&mut self, progress: Progress) {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_progress(&progress);
        }
        self.session.progress = progress;
    }

    fn note(&mut self, message: impl Into<String>) {
        let entry = self.session.log.push(message);
        debug!("{}", entry.message);
        if let Some(listener) = self.listener.as_mut() {
            listener.on_log(entry);
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
