//! Firmware download command.

use anyhow::{Context, Result};
use console::style;
use std::fs;
use std::path::{Path, PathBuf};
use webflash::firmware::FALLBACK_FILE_NAME;

use super::{build_controller, report::LineMode, settle};
use crate::config::Config;
use crate::{Cli, CliError, backend};

/// Download an image from the asset server and save it.
pub(crate) fn cmd_fetch(
    cli: &Cli,
    config: &Config,
    name: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let mut controller = build_controller(cli, config, backend::loaders(cli), LineMode::Stream);

    let outcome = match name {
        Some(name) => controller.load_from_remote(name),
        None => controller.load_default_firmware(),
    };
    settle(outcome)?;

    let firmware = controller
        .session()
        .firmware()
        .ok_or_else(|| CliError::Runtime("no firmware was loaded".to_string()))?;
    let path = output.map_or_else(|| default_output(firmware.file_name()), Path::to_path_buf);

    fs::write(&path, firmware.data())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Saved {} bytes to {}",
            style("✓").green(),
            firmware.len(),
            style(path.display()).yellow()
        );
    }
    Ok(())
}

/// Last path component of an asset name, in the working directory.
fn default_output(name: &str) -> PathBuf {
    Path::new(name)
        .file_name()
        .map_or_else(|| PathBuf::from(FALLBACK_FILE_NAME), PathBuf::from)
}
