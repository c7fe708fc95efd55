//! Configuration file support for webflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (WEBFLASH_*)
//! 3. A file given with `--config`
//! 4. Local config file (./webflash.toml)
//! 5. Global config file (~/.config/webflash/config.toml)
//!
//! Files are merged table by table before they are deserialised, so a local
//! file only needs the keys it changes.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use webflash::FlasherConfig;

/// Name of the local configuration file.
pub const LOCAL_CONFIG: &str = "webflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Session settings handed to the controller.
    #[serde(default)]
    pub flasher: FlasherConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        Self::load_with(None)
    }

    /// Load the global and local files, then merge `extra` (the `--config`
    /// file) on top of them.
    pub fn load_with(extra: Option<&Path>) -> Self {
        let mut layers: Vec<PathBuf> = Self::global_config_path().into_iter().collect();
        layers.push(PathBuf::from(LOCAL_CONFIG));
        if let Some(path) = extra {
            if !path.exists() {
                warn!("Config file {} does not exist, ignoring it", path.display());
            }
            layers.push(path.to_path_buf());
        }
        Self::load_layers(&layers)
    }

    /// Merge the given files in order; later files win key by key.
    fn load_layers(paths: &[PathBuf]) -> Self {
        let mut table = toml::Table::new();
        for path in paths {
            if let Some(layer) = read_table(path) {
                debug!("Loaded config from {}", path.display());
                merge_tables(&mut table, layer);
            }
        }
        Self::from_table(table)
    }

    fn from_table(table: toml::Table) -> Self {
        match toml::Value::Table(table).try_into() {
            Ok(config) => config,
            Err(e) => {
                warn!("Invalid configuration, using defaults: {e}");
                Self::default()
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "webflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }
}

/// Read a TOML file into a table. Missing or broken files yield `None`.
fn read_table(path: &Path) -> Option<toml::Table> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match content.parse::<toml::Table>() {
            Ok(table) => Some(table),
            Err(e) => {
                warn!("Failed to parse config file {}: {}", path.display(), e);
                None
            },
        },
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            None
        },
    }
}

/// Merge `other` into `base`; nested tables merge key by key.
fn merge_tables(base: &mut toml::Table, other: toml::Table) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            },
            (_, value) => {
                base.insert(key, value);
            },
        }
    }
}
