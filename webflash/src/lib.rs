//! # webflash
//!
//! A device-session controller for flashing firmware onto ESP microcontrollers
//! over a serial link, meant to be embedded in a host surface (a web page, a
//! terminal UI, a desktop shell).
//!
//! The crate owns the parts that are easy to get wrong:
//!
//! - the connection lifecycle and its state machine
//! - the DTR/RTS sequence that puts the chip into its ROM bootloader
//! - firmware acquisition from a file or from the asset server
//! - progress, status and log bookkeeping for the host to render
//! - recovery from cancelled prompts, denied access and unplugged devices
//!
//! The bootloader protocol itself (sync, stub upload, compressed writes) is
//! an external collaborator behind the [`Loader`] trait.
//!
//! ## Features
//!
//! - `native` (default): serial ports via the `serialport` crate
//! - `serde`: (de)serialisation of [`FlasherConfig`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use webflash::{Controller, FlasherConfig, HttpAssetClient, LoaderFactory};
//!
//! fn run(loaders: Box<dyn LoaderFactory>) {
//!     let config = FlasherConfig::default();
//!     let assets = HttpAssetClient::from_config(&config);
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let provider = webflash::NativePortProvider::new(Box::new(webflash::port::FirstAvailable));
//!         let mut controller = Controller::new(config, Box::new(provider), loaders, Box::new(assets));
//!
//!         controller.load_default_firmware().ok();
//!         if controller.connect().is_ok() {
//!             controller.flash_firmware().ok();
//!         }
//!         for entry in controller.session().log().entries() {
//!             println!("{entry}");
//!         }
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod config;
pub mod controller;
pub mod env;
pub mod error;
pub mod firmware;
pub mod loader;
pub mod mount;
pub mod port;
pub mod reset;
pub mod session;
pub mod ui;

#[cfg(test)]
mod testing;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current wait should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator, NativePortProvider};
pub use {
    config::{FlasherConfig, MountConfig, ResetTiming},
    controller::{Controller, FirmwareOrigin, Outcome, SessionListener, parse_address},
    env::{EnvironmentGate, Readiness},
    error::{Error, Failure, FailureKind, Result},
    firmware::{AssetClient, Firmware, HttpAssetClient},
    loader::{ChipInfo, FlashEntry, FlashOptions, Loader, LoaderFactory, SerialTransport, Transport},
    mount::{MountHost, MountOutcome, MountWatcher},
    port::{Capability, Port, PortEvent, PortId, PortInfo, PortProvider},
    session::{LogEntry, Phase, Progress, Session, Status, StatusVariant},
    ui::{ButtonStates, View},
};
