//! Probe, flash, and erase command implementations.

use anyhow::Result;
use console::style;
use std::path::PathBuf;
use webflash::Controller;

use super::{build_controller, ensure_not_interrupted, report::LineMode, settle};
use crate::config::Config;
use crate::{Cli, CliError, backend};

/// Where the image to flash comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Source {
    /// A local file.
    File(PathBuf),
    /// A named image on the asset server.
    Remote(String),
    /// The configured default image on the asset server.
    Default,
}

/// Connect and stop early if Ctrl-C arrived meanwhile.
fn connect(controller: &mut Controller) -> Result<()> {
    settle(controller.connect())?;
    ensure_not_interrupted()
}

/// Probe command implementation.
pub(crate) fn cmd_probe(cli: &Cli, config: &Config) -> Result<()> {
    let mut controller = build_controller(cli, config, backend::loaders(cli), LineMode::Stream);

    connect(&mut controller)?;
    if let Some(chip) = controller.session().chip() {
        println!("{chip}");
    }
    controller.disconnect(false);
    Ok(())
}

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    source: &Source,
    address: &str,
    erase_all: bool,
) -> Result<()> {
    if let Source::File(path) = source {
        if !path.is_file() {
            return Err(
                CliError::Usage(format!("firmware file not found: {}", path.display())).into(),
            );
        }
    }

    let mut controller = build_controller(cli, config, backend::loaders(cli), LineMode::Stream);
    controller.set_start_address(address);
    controller.set_erase_all(erase_all);

    // Firmware present at connect time would arm the auto-flash deadline.
    connect(&mut controller)?;

    let loaded = match source {
        Source::File(path) => controller.load_from_user_file(path),
        Source::Remote(name) => controller.load_from_remote(name),
        Source::Default => controller.load_default_firmware(),
    };
    settle(loaded)?;
    ensure_not_interrupted()?;

    settle(controller.flash_firmware())?;
    controller.disconnect(false);

    if !cli.quiet {
        eprintln!("\n{} Flashing completed", style("🎉").green().bold());
    }
    Ok(())
}

/// Erase command implementation.
pub(crate) fn cmd_erase(cli: &Cli, config: &Config) -> Result<()> {
    let mut controller = build_controller(cli, config, backend::loaders(cli), LineMode::Stream);

    connect(&mut controller)?;
    settle(controller.erase_flash())?;
    controller.disconnect(false);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn dry_run_cli() -> Cli {
        Cli::try_parse_from(["webflash", "--dry-run", "--quiet", "flash"]).unwrap()
    }

    #[test]
    fn test_missing_port_is_runtime_error() {
        let cli = Cli::try_parse_from([
            "webflash",
            "--quiet",
            "--non-interactive",
            "--port",
            "/dev/webflash-no-such-port",
            "flash",
        ])
        .unwrap();
        let mut config = Config::default();
        config.flasher = config.flasher.without_delays();

        let err = cmd_flash(&cli, &config, &Source::Default, "0x1000", false).unwrap_err();
        match err.downcast_ref::<CliError>() {
            Some(CliError::Runtime(msg)) => assert!(msg.starts_with("Connection error")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_usage_error() {
        let err = cmd_flash(
            &dry_run_cli(),
            &Config::default(),
            &Source::File(PathBuf::from("/nonexistent/app.bin")),
            "0x1000",
            false,
        )
        .unwrap_err();
        match err.downcast_ref::<CliError>() {
            Some(CliError::Usage(msg)) => assert!(msg.contains("not found")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_dry_run_flash_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.bin");
        std::fs::write(&path, vec![0xE9; 5000]).unwrap();

        let mut config = Config::default();
        config.flasher = config.flasher.without_delays();
        cmd_flash(&dry_run_cli(), &config, &Source::File(path), "0x10000", true).unwrap();
    }

    #[test]
    fn test_dry_run_probe_and_erase() {
        let mut config = Config::default();
        config.flasher = config.flasher.without_delays();
        cmd_probe(&dry_run_cli(), &config).unwrap();
        cmd_erase(&dry_run_cli(), &config).unwrap();
    }

    #[test]
    fn test_unreachable_asset_server_is_runtime_error() {
        let mut config = Config::default();
        config.flasher = config
            .flasher
            .without_delays()
            .with_asset_base_url("http://127.0.0.1:9/assets");
        config.flasher.http_timeout_ms = 500;

        let err = cmd_flash(
            &dry_run_cli(),
            &config,
            &Source::Remote("missing.bin".to_string()),
            "0x1000",
            false,
        )
        .unwrap_err();
        match err.downcast_ref::<CliError>() {
            Some(CliError::Runtime(msg)) => assert!(msg.starts_with("Could not load firmware")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
