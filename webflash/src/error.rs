//! Error types for webflash.
//!
//! Low-level failures are carried by [`Error`]. Before an error reaches the
//! status banner or the session log it is normalised into a [`Failure`], which
//! pairs a [`FailureKind`] with the message shown to the operator.

use std::{fmt, io};
use thiserror::Error;

/// Result type for webflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for webflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Transport-level HTTP failure (DNS, refused connection, TLS, ...).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The asset server answered with a non-success status.
    #[error("HTTP error! status: {0}")]
    HttpStatus(u16),

    /// Communication timeout.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The chip did not answer the bootloader handshake.
    #[error("Device not in boot mode: {0}")]
    NotInBootMode(String),

    /// The operator dismissed the port chooser.
    #[error("No port selected by the user")]
    UserCancelled,

    /// The capability refused access to the port.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Unsupported environment or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Bootloader protocol error reported by the loader.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The port was used while closed.
    #[error("Port is closed")]
    PortClosed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error suggests the chip is not in bootloader mode.
    ///
    /// Typed variants are checked first; other errors fall back to a
    /// best-effort look at the message text.
    pub fn is_boot_related(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::NotInBootMode(_) => true,
            Self::UserCancelled | Self::PermissionDenied(_) | Self::Unsupported(_) => false,
            other => looks_boot_related(&other.to_string()),
        }
    }
}

/// Text heuristic for boot/timeout signatures in foreign error messages.
pub fn looks_boot_related(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("boot") || lower.contains("timed out") || lower.contains("timeout")
}

/// Operator-facing failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Missing or insecure capability; fatal until the environment changes.
    EnvironmentUnsupported,
    /// The capability refused access.
    PermissionDenied,
    /// The operator cancelled the port chooser.
    UserCancelled,
    /// An operation was requested while its inputs were missing.
    Precondition,
    /// The port could not be opened or the link failed before probing.
    ConnectFailure,
    /// The chip was not detected.
    ProbeFailure,
    /// A write or erase failed.
    TransferFailure,
    /// A teardown step failed.
    TeardownFailure,
    /// Fetching or reading a firmware image failed.
    SourceLoadFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EnvironmentUnsupported => "environment unsupported",
            Self::PermissionDenied => "permission denied",
            Self::UserCancelled => "cancelled",
            Self::Precondition => "precondition",
            Self::ConnectFailure => "connect failure",
            Self::ProbeFailure => "probe failure",
            Self::TransferFailure => "transfer failure",
            Self::TeardownFailure => "teardown failure",
            Self::SourceLoadFailure => "source load failure",
        };
        f.write_str(name)
    }
}

/// Hint shown when the chip does not answer the handshake.
pub const BOOT_HINT: &str =
    "Chip not detected. Hold the BOOT button on the board and press Connect again.";

/// A normalised failure ready for the status banner and the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Failure category.
    pub kind: FailureKind,
    /// Message for the operator.
    pub message: String,
}

impl Failure {
    /// Create a failure from its parts.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an error raised while connecting.
    pub fn from_connect_error(err: &Error) -> Self {
        match err {
            Error::UserCancelled => Self::new(
                FailureKind::UserCancelled,
                "Port selection was cancelled.",
            ),
            Error::PermissionDenied(msg) => Self::new(
                FailureKind::PermissionDenied,
                format!("Serial access was denied: {msg}"),
            ),
            Error::Unsupported(msg) => Self::new(
                FailureKind::EnvironmentUnsupported,
                format!("Serial access is not available: {msg}"),
            ),
            other if other.is_boot_related() => Self::new(FailureKind::ProbeFailure, BOOT_HINT),
            other => Self::new(
                FailureKind::ConnectFailure,
                format!("Connection error: {other}"),
            ),
        }
    }

    /// Classify an error raised while writing firmware.
    pub fn from_flash_error(err: &Error) -> Self {
        Self::new(FailureKind::TransferFailure, format!("Flash failed: {err}"))
    }

    /// Classify an error raised while erasing flash.
    pub fn from_erase_error(err: &Error) -> Self {
        Self::new(FailureKind::TransferFailure, format!("Erase failed: {err}"))
    }

    /// Classify an error raised while loading a firmware image.
    pub fn from_source_error(err: &Error) -> Self {
        Self::new(
            FailureKind::SourceLoadFailure,
            format!("Could not load firmware: {err}"),
        )
    }

    /// Classify an error raised by one teardown step.
    pub fn from_teardown_error(step: &str, err: &Error) -> Self {
        Self::new(
            FailureKind::TeardownFailure,
            format!("Error while closing {step}: {err}"),
        )
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
