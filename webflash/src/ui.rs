//! UI projection.
//!
//! Hosts never read the session piecemeal to decide what to show. They call
//! [`project`] and render the resulting [`View`].

use crate::session::{LogEntry, Progress, Session, Status};

/// Which controls accept input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ButtonStates {
    /// Connect button.
    pub connect: bool,
    /// Disconnect button.
    pub disconnect: bool,
    /// Flash button.
    pub flash: bool,
    /// Firmware file input.
    pub file_input: bool,
    /// Erase-all checkbox.
    pub erase_checkbox: bool,
}

/// Everything a host renders.
#[derive(Debug, Clone)]
pub struct View<'a> {
    /// Control states.
    pub buttons: ButtonStates,
    /// Status banner, hidden when `None`.
    pub status: Option<&'a Status>,
    /// Progress percentage, always within 0..=100.
    pub progress_percent: f64,
    /// Progress label.
    pub progress_label: String,
    /// Firmware label.
    pub firmware_label: &'a str,
    /// Session log.
    pub log: &'a [LogEntry],
}

/// Derive control states from the session.
pub fn buttons(session: &Session, env_ready: bool) -> ButtonStates {
    let port = session.has_port();
    let connecting = session.is_connecting();
    let flashing = session.is_flashing();

    ButtonStates {
        connect: env_ready && !port && !connecting && !flashing,
        disconnect: port && !flashing,
        flash: port && session.has_loader() && session.firmware().is_some() && !flashing,
        file_input: !flashing,
        erase_checkbox: port && !flashing,
    }
}

/// Project the session onto a [`View`].
pub fn project(session: &Session, env_ready: bool) -> View<'_> {
    let progress: &Progress = session.progress();
    View {
        buttons: buttons(session, env_ready),
        status: session.status(),
        progress_percent: progress.percent(),
        progress_label: progress.label(),
        firmware_label: session.firmware_label(),
        log: session.log().entries(),
    }
}
