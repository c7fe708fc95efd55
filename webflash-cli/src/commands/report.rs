//! Terminal rendering of session updates.

use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::Write as _;
use webflash::{LogEntry, Progress, SessionListener, Status, StatusVariant};

use crate::use_fancy_output;

/// How lines reach the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineMode {
    /// Cooked terminal: an indicatif bar for progress.
    Stream,
    /// Raw mode: explicit carriage returns, progress on one rewritten line.
    Raw,
}

/// Prints status changes, log entries and progress to stderr.
pub(crate) struct TerminalReporter {
    quiet: bool,
    show_log: bool,
    mode: LineMode,
    bar: Option<ProgressBar>,
    last_percent: Option<u64>,
}

impl TerminalReporter {
    /// Create a reporter.
    pub(crate) fn new(quiet: bool, show_log: bool, mode: LineMode) -> Self {
        Self {
            quiet,
            show_log,
            mode,
            bar: None,
            last_percent: None,
        }
    }

    fn line(&mut self, text: &str) {
        match (&self.bar, self.mode) {
            (Some(bar), _) => bar.suspend(|| eprintln!("{text}")),
            (None, LineMode::Stream) => eprintln!("{text}"),
            (None, LineMode::Raw) => {
                if self.last_percent.take().is_some() {
                    eprint!("\r\n");
                }
                eprint!("{text}\r\n");
            },
        }
    }

    fn progress_bar() -> ProgressBar {
        if !use_fancy_output() {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(ProgressDrawTarget::stderr());
        pb
    }
}

/// Styled one-line rendering of a status banner.
pub(crate) fn format_status(status: &Status) -> String {
    match status.variant {
        StatusVariant::Info => format!("{} {}", style("ℹ").blue(), status.message),
        StatusVariant::Success => format!("{} {}", style("✓").green(), status.message),
        StatusVariant::Warning => format!("{} {}", style("⚠").yellow(), status.message),
        StatusVariant::Danger => format!("{} {}", style("✗").red(), style(&status.message).red()),
    }
}

impl SessionListener for TerminalReporter {
    fn on_status(&mut self, status: &Status) {
        if let Some(bar) = self.bar.take() {
            match status.variant {
                StatusVariant::Success => bar.finish_with_message("done"),
                StatusVariant::Danger | StatusVariant::Warning => bar.abandon(),
                StatusVariant::Info => self.bar = Some(bar),
            }
        }
        if self.quiet {
            return;
        }
        let text = format_status(status);
        self.line(&text);
    }

    fn on_status_cleared(&mut self) {
        if self.quiet {
            return;
        }
        let text = format!("{} {}", style("✓").green(), style("Status cleared.").dim());
        self.line(&text);
    }

    fn on_progress(&mut self, progress: &Progress) {
        if self.quiet {
            return;
        }
        // Truncation is intended: the bar moves in whole percent.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = progress.percent() as u64;

        match self.mode {
            LineMode::Stream => {
                if progress.percent() <= 0.0 && progress.label() == webflash::session::NOT_FLASHED {
                    return;
                }
                let bar = self.bar.get_or_insert_with(Self::progress_bar);
                bar.set_position(percent);
                bar.set_message(progress.label());
            },
            LineMode::Raw => {
                if self.last_percent == Some(percent) {
                    return;
                }
                self.last_percent = Some(percent);
                eprint!("\r{} {}", style("⏳").yellow(), progress.label());
                std::io::stderr().flush().ok();
            },
        }
    }

    fn on_log(&mut self, entry: &LogEntry) {
        if self.quiet || !self.show_log {
            return;
        }
        let text = style(entry.to_string()).dim().to_string();
        self.line(&text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_status_keeps_message() {
        console::set_colors_enabled(false);
        let status = Status {
            message: "Connected: ESP32-S3".to_string(),
            variant: StatusVariant::Success,
        };
        assert!(format_status(&status).ends_with("Connected: ESP32-S3"));
    }

    #[test]
    fn test_bar_finishes_on_outcome() {
        let mut reporter = TerminalReporter::new(false, false, LineMode::Stream);
        reporter.on_progress(&Progress::new(40.0, "Flashing: 40%"));
        assert!(reporter.bar.is_some());

        reporter.on_status(&Status {
            message: "Flash complete! The device is restarting.".to_string(),
            variant: StatusVariant::Success,
        });
        assert!(reporter.bar.is_none());
    }

    #[test]
    fn test_reset_progress_does_not_open_bar() {
        let mut reporter = TerminalReporter::new(false, false, LineMode::Stream);
        reporter.on_progress(&Progress::default());
        assert!(reporter.bar.is_none());
    }

    #[test]
    fn test_quiet_reporter_ignores_everything() {
        let mut reporter = TerminalReporter::new(true, true, LineMode::Raw);
        reporter.on_progress(&Progress::new(10.0, "Flashing: 10%"));
        assert!(reporter.last_percent.is_none());
    }
}
