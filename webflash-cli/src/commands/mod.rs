//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.
//! Device commands drive a [`Controller`] and render its updates with a
//! [`report::TerminalReporter`].

pub(crate) mod check;
pub(crate) mod completions;
pub(crate) mod fetch;
pub(crate) mod flash;
pub(crate) mod report;
pub(crate) mod session;

use anyhow::Result;
use webflash::{Controller, HttpAssetClient, LoaderFactory, Outcome};

use crate::config::Config;
use crate::{Cli, CliError, serial, was_interrupted};
use report::{LineMode, TerminalReporter};

/// Build a controller wired to the terminal.
pub(crate) fn build_controller(
    cli: &Cli,
    config: &Config,
    loaders: Box<dyn LoaderFactory>,
    mode: LineMode,
) -> Controller {
    let assets = HttpAssetClient::from_config(&config.flasher);
    let mut controller = Controller::new(
        config.flasher.clone(),
        serial::port_provider(cli, config),
        loaders,
        Box::new(assets),
    );
    let show_log = cli.verbose > 0 || mode == LineMode::Raw;
    controller.set_listener(Box::new(TerminalReporter::new(cli.quiet, show_log, mode)));
    controller
}

/// Turn a reported outcome into a CLI error.
pub(crate) fn settle(outcome: Outcome) -> Result<()> {
    outcome.map_err(|failure| CliError::from_failure(failure).into())
}

/// Fail with the cancel class once Ctrl-C was pressed.
pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}
