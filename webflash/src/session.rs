//! The session record and its transition table.
//!
//! A [`Session`] is owned by the controller. Its phase only changes through
//! the transition methods below, which also keep the link invariants:
//! a loader exists only inside a link, and a link always owns a transport
//! which owns the port.

use std::time::Instant;

use log::debug;
use time::OffsetDateTime;
use time::macros::format_description;

use crate::firmware::Firmware;
use crate::loader::{Loader, Transport};
use crate::port::PortId;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No port.
    #[default]
    Idle,
    /// A connect sequence is running.
    Connecting,
    /// Port and loader ready.
    Connected,
    /// A write or erase is running.
    Flashing,
}

/// Why an operation may not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    /// No port or no loader.
    NotConnected,
    /// No firmware image.
    NoFirmware,
    /// Another operation is running.
    Busy,
}

/// An open device link: transport (owning the port) plus the loader.
pub struct Link {
    transport: Box<dyn Transport>,
    loader: Option<Box<dyn Loader>>,
    chip: String,
}

impl Link {
    /// Bundle a probed transport and loader.
    pub fn new(transport: Box<dyn Transport>, loader: Box<dyn Loader>, chip: impl Into<String>) -> Self {
        Self {
            transport,
            loader: Some(loader),
            chip: chip.into(),
        }
    }

    /// Identity of the open port.
    pub fn port_id(&self) -> &PortId {
        self.transport.port().id()
    }

    /// Detected chip name.
    pub fn chip(&self) -> &str {
        &self.chip
    }

    /// Whether a loader is bound.
    pub fn has_loader(&self) -> bool {
        self.loader.is_some()
    }

    /// Transport and loader, borrowed together.
    pub fn parts_mut(&mut self) -> Option<(&mut dyn Transport, &mut dyn Loader)> {
        let loader: &mut dyn Loader = self.loader.as_deref_mut()?;
        let transport: &mut dyn Transport = self.transport.as_mut();
        Some((transport, loader))
    }

    /// Split into transport and loader for teardown.
    pub fn into_parts(self) -> (Box<dyn Transport>, Option<Box<dyn Loader>>) {
        (self.transport, self.loader)
    }
}

/// Severity of the status banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusVariant {
    /// Neutral information.
    Info,
    /// Operation succeeded.
    Success,
    /// Something needs attention.
    Warning,
    /// Operation failed.
    Danger,
}

impl StatusVariant {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Danger => "danger",
        }
    }
}

/// Status banner content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Banner text.
    pub message: String,
    /// Banner severity.
    pub variant: StatusVariant,
}

/// Label shown before any image has been flashed.
pub const NOT_FLASHED: &str = "Not flashed";

/// Progress bar content.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    percent: f64,
    label: String,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(0.0, NOT_FLASHED)
    }
}

impl Progress {
    /// Progress at `percent` (clamped to 0..=100) with a label.
    pub fn new(percent: f64, label: impl Into<String>) -> Self {
        Self {
            percent: clamp_percent(percent),
            label: label.into(),
        }
    }

    /// Progress of a write from byte counts.
    pub fn from_bytes(written: usize, total: usize) -> Self {
        let percent = percent_of(written, total);
        Self::new(percent, format!("Flashing: {}%", percent.floor()))
    }

    /// Completion in percent, always within 0..=100.
    pub fn percent(&self) -> f64 {
        self.percent
    }

    /// Label, defaulting to the rounded percentage.
    pub fn label(&self) -> String {
        if self.label.is_empty() {
            format!("{:.0}%", self.percent)
        } else {
            self.label.clone()
        }
    }
}

fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

/// `written / total` as a percentage, clamped; 0 when `total` is 0.
#[allow(clippy::cast_precision_loss)]
pub fn percent_of(written: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    clamp_percent(written as f64 / total as f64 * 100.0)
}

/// One log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Local wall-clock time, `HH:MM:SS`.
    pub time: String,
    /// Message.
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.time, self.message)
    }
}

fn clock_time() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let format = format_description!("[hour]:[minute]:[second]");
    now.format(&format).unwrap_or_default()
}

/// Append-only, timestamped session log.
#[derive(Debug, Clone, Default)]
pub struct LogBook {
    entries: Vec<LogEntry>,
}

impl LogBook {
    /// Append a message stamped with the current time.
    pub fn push(&mut self, message: impl Into<String>) -> &LogEntry {
        self.entries.push(LogEntry {
            time: clock_time(),
            message: message.into(),
        });
        &self.entries[self.entries.len() - 1]
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Whether any entry contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|e| e.message.contains(needle))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Host-owned form inputs the controller reads when flashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashForm {
    /// Free-text start address.
    pub start_address: String,
    /// Erase-all checkbox.
    pub erase_all: bool,
}

impl Default for FlashForm {
    fn default() -> Self {
        Self {
            start_address: "0x1000".to_string(),
            erase_all: false,
        }
    }
}

/// The single mutable record of one host instance.
#[derive(Default)]
pub struct Session {
    pub(crate) phase: Phase,
    pub(crate) link: Option<Link>,
    pub(crate) firmware: Option<Firmware>,
    pub(crate) firmware_label: String,
    pub(crate) auto_flash_pending: bool,
    pub(crate) scheduled_flash: Option<Instant>,
    pub(crate) scheduled_init: Option<Instant>,
    pub(crate) status: Option<Status>,
    pub(crate) progress: Progress,
    pub(crate) log: LogBook,
    pub(crate) form: FlashForm,
}

impl Session {
    /// A fresh session. Auto-flash is armed, as on first page load.
    pub fn new() -> Self {
        Self {
            auto_flash_pending: true,
            ..Self::default()
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a port is held.
    pub fn has_port(&self) -> bool {
        self.link.is_some()
    }

    /// Whether a transport exists. Always equal to [`Session::has_port`].
    pub fn has_transport(&self) -> bool {
        self.link.is_some()
    }

    /// Whether a loader is bound.
    pub fn has_loader(&self) -> bool {
        self.link.as_ref().is_some_and(Link::has_loader)
    }

    /// Identity of the open port.
    pub fn port_id(&self) -> Option<&PortId> {
        self.link.as_ref().map(Link::port_id)
    }

    /// Detected chip name.
    pub fn chip(&self) -> Option<&str> {
        self.link.as_ref().map(Link::chip)
    }

    /// Loaded firmware.
    pub fn firmware(&self) -> Option<&Firmware> {
        self.firmware.as_ref()
    }

    /// "Loaded: NAME" / "Selected: NAME", empty before any load.
    pub fn firmware_label(&self) -> &str {
        &self.firmware_label
    }

    /// Whether the next successful connect will schedule a flash.
    pub fn auto_flash_pending(&self) -> bool {
        self.auto_flash_pending
    }

    /// Deadline of a scheduled automatic flash.
    pub fn scheduled_flash(&self) -> Option<Instant> {
        self.scheduled_flash
    }

    /// Latest status banner.
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    /// Progress bar.
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Session log.
    pub fn log(&self) -> &LogBook {
        &self.log
    }

    /// Form inputs.
    pub fn form(&self) -> &FlashForm {
        &self.form
    }

    pub(crate) fn is_connecting(&self) -> bool {
        self.phase == Phase::Connecting
    }

    pub(crate) fn is_flashing(&self) -> bool {
        self.phase == Phase::Flashing
    }

    /// `Idle → Connecting`. False when already connecting or connected.
    pub(crate) fn begin_connect(&mut self) -> bool {
        if self.phase != Phase::Idle || self.link.is_some() {
            return false;
        }
        self.transition(Phase::Connecting);
        true
    }

    /// `Connecting → Connected`. Returns whether an automatic flash is due,
    /// consuming the one-shot flag when it is.
    pub(crate) fn complete_connect(&mut self, link: Link) -> bool {
        debug_assert_eq!(self.phase, Phase::Connecting);
        self.link = Some(link);
        self.transition(Phase::Connected);

        let due = self.auto_flash_pending && self.firmware.as_ref().is_some_and(|f| !f.is_empty());
        if due {
            self.auto_flash_pending = false;
        }
        due
    }

    /// `Connecting → Idle`.
    pub(crate) fn abort_connect(&mut self) {
        self.link = None;
        self.transition(Phase::Idle);
    }

    /// `Connected → Flashing` for a write.
    pub(crate) fn begin_flash(&mut self) -> Result<(), Blocked> {
        if self.phase == Phase::Flashing || self.phase == Phase::Connecting {
            return Err(Blocked::Busy);
        }
        if !self.has_loader() {
            return Err(Blocked::NotConnected);
        }
        if self.firmware.is_none() {
            return Err(Blocked::NoFirmware);
        }
        self.scheduled_flash = None;
        self.transition(Phase::Flashing);
        Ok(())
    }

    /// `Connected → Flashing` for an erase.
    pub(crate) fn begin_erase(&mut self) -> Result<(), Blocked> {
        if self.phase == Phase::Flashing || self.phase == Phase::Connecting {
            return Err(Blocked::Busy);
        }
        if !self.has_loader() {
            return Err(Blocked::NotConnected);
        }
        self.transition(Phase::Flashing);
        Ok(())
    }

    /// `Flashing → Connected`, or `Idle` if the link went away meanwhile.
    pub(crate) fn finish_transfer(&mut self) {
        let next = if self.link.is_some() {
            Phase::Connected
        } else {
            Phase::Idle
        };
        self.transition(next);
    }

    /// Any phase `→ Idle`, handing the link out for teardown.
    pub(crate) fn release_link(&mut self) -> Option<Link> {
        self.scheduled_flash = None;
        let link = self.link.take();
        if self.phase != Phase::Idle {
            self.transition(Phase::Idle);
        }
        link
    }

    /// Take a scheduled automatic flash if its deadline has passed.
    pub(crate) fn take_due_flash(&mut self, now: Instant) -> bool {
        match self.scheduled_flash {
            Some(deadline) if deadline <= now => {
                self.scheduled_flash = None;
                true
            },
            _ => false,
        }
    }

    /// Take the scheduled auto-init if its deadline has passed.
    pub(crate) fn take_due_init(&mut self, now: Instant) -> bool {
        match self.scheduled_init {
            Some(deadline) if deadline <= now => {
                self.scheduled_init = None;
                true
            },
            _ => false,
        }
    }

    fn transition(&mut self, next: Phase) {
        debug!("session: {:?} -> {next:?}", self.phase);
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::SerialTransport;
    use crate::testing::{FakeFactory, FakePort};
    use crate::loader::LoaderFactory;

    fn link() -> Link {
        let transport = SerialTransport::new(Box::new(FakePort::new("ttyFAKE")));
        Link::new(Box::new(transport), FakeFactory::default().create(115_200), "ESP32")
    }

    #[test]
    fn test_connect_transitions() {
        let mut session = Session::new();
        assert!(session.begin_connect());
        assert!(!session.begin_connect());
        assert_eq!(session.phase(), Phase::Connecting);

        session.complete_connect(link());
        assert_eq!(session.phase(), Phase::Connected);
        assert!(!session.begin_connect());
        assert!(session.has_port() && session.has_transport() && session.has_loader());
    }

    #[test]
    fn test_auto_flash_consumed_once() {
        let mut session = Session::new();
        session.firmware = Some(Firmware::new("a.bin", vec![1; 16]));

        assert!(session.begin_connect());
        assert!(session.complete_connect(link()));
        assert!(!session.auto_flash_pending());

        session.release_link();
        assert!(session.begin_connect());
        assert!(!session.complete_connect(link()));
    }

    #[test]
    fn test_auto_flash_needs_non_empty_firmware() {
        let mut session = Session::new();
        session.firmware = Some(Firmware::new("empty.bin", Vec::new()));
        assert!(session.begin_connect());
        assert!(!session.complete_connect(link()));
        assert!(session.auto_flash_pending());
    }

    #[test]
    fn test_flash_preconditions() {
        let mut session = Session::new();
        assert_eq!(session.begin_flash(), Err(Blocked::NotConnected));

        session.begin_connect();
        assert_eq!(session.begin_flash(), Err(Blocked::Busy));
        session.complete_connect(link());
        assert_eq!(session.begin_flash(), Err(Blocked::NoFirmware));
        assert_eq!(session.phase(), Phase::Connected);

        session.firmware = Some(Firmware::new("a.bin", vec![0]));
        assert_eq!(session.begin_flash(), Ok(()));
        assert_eq!(session.begin_flash(), Err(Blocked::Busy));
        assert_eq!(session.begin_erase(), Err(Blocked::Busy));

        session.finish_transfer();
        assert_eq!(session.phase(), Phase::Connected);
    }

    #[test]
    fn test_release_link_during_transfer() {
        let mut session = Session::new();
        session.begin_connect();
        session.complete_connect(link());
        session.begin_erase().unwrap();

        assert!(session.release_link().is_some());
        session.finish_transfer();
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.release_link().is_none());
    }

    #[test]
    fn test_progress_clamping() {
        assert!((percent_of(0, 0) - 0.0).abs() < f64::EPSILON);
        assert!((percent_of(50, 100) - 50.0).abs() < f64::EPSILON);
        assert!((percent_of(300, 100) - 100.0).abs() < f64::EPSILON);
        assert!((Progress::new(-5.0, "").percent() - 0.0).abs() < f64::EPSILON);
        assert!((Progress::new(f64::NAN, "").percent() - 0.0).abs() < f64::EPSILON);
        assert_eq!(Progress::new(42.4, "").label(), "42%");
        assert_eq!(Progress::from_bytes(1, 3).label(), "Flashing: 33%");
    }

    #[test]
    fn test_log_entries_are_stamped() {
        let mut log = LogBook::default();
        log.push("hello");
        let line = log.entries()[0].to_string();
        assert!(line.ends_with("] hello"));
        assert_eq!(log.entries()[0].time.len(), 8);
    }
}
