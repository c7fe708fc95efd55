//! Session configuration.
//!
//! All timings are stored in milliseconds so the structure maps directly onto
//! a TOML table when the `serde` feature is enabled.

use std::time::Duration;

/// Baud rate used for the bootloader handshake.
pub const HANDSHAKE_BAUD: u32 = 115_200;

/// Default flash offset when the address field cannot be parsed.
pub const DEFAULT_FLASH_ADDRESS: u32 = 0x1000;

/// Firmware served by the asset server when nothing else is chosen.
pub const DEFAULT_FIRMWARE: &str = "sketch_oct15a.ino.bin";

/// Line-control timings of the manual bootloader reset.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResetTiming {
    /// Pause after deasserting both lines.
    pub release_ms: u64,
    /// Hold time with reset and boot-select asserted.
    pub hold_ms: u64,
    /// Boot-ROM settle time before boot-select is released.
    pub boot_settle_ms: u64,
}

impl Default for ResetTiming {
    fn default() -> Self {
        Self {
            release_ms: 100,
            hold_ms: 100,
            boot_settle_ms: 400,
        }
    }
}

impl ResetTiming {
    /// All delays set to zero.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            release_ms: 0,
            hold_ms: 0,
            boot_settle_ms: 0,
        }
    }
}

/// Mount watcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MountConfig {
    /// Interval between anchor checks.
    pub poll_interval_ms: u64,
    /// Maximum number of anchor checks.
    pub max_attempts: u32,
    /// Delay between binding and the automatic firmware load.
    pub auto_init_delay_ms: u64,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            max_attempts: 80,
            auto_init_delay_ms: 500,
        }
    }
}

impl MountConfig {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Total time the watcher waits before giving up.
    pub fn deadline(&self) -> Duration {
        self.poll_interval() * self.max_attempts
    }

    /// Auto-init delay as a `Duration`.
    pub fn auto_init_delay(&self) -> Duration {
        Duration::from_millis(self.auto_init_delay_ms)
    }
}

/// Configuration of a flashing session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FlasherConfig {
    /// Baud rate the port is opened at.
    pub baud_rate: u32,
    /// Bootloader reset timings.
    pub reset: ResetTiming,
    /// Delay before an automatic flash after connecting.
    pub auto_flash_delay_ms: u64,
    /// Base URL of the firmware asset directory.
    pub asset_base_url: String,
    /// Firmware loaded automatically after binding.
    pub default_firmware: String,
    /// Upper bound on a downloaded image.
    pub max_firmware_bytes: u64,
    /// HTTP timeout for asset downloads.
    pub http_timeout_ms: u64,
    /// Start connecting right after the automatic firmware load.
    ///
    /// Off by default: hosts that require a user gesture before opening the
    /// port chooser must leave it disabled.
    pub auto_connect: bool,
    /// Mount watcher settings.
    pub mount: MountConfig,
}

impl Default for FlasherConfig {
    fn default() -> Self {
        Self {
            baud_rate: HANDSHAKE_BAUD,
            reset: ResetTiming::default(),
            auto_flash_delay_ms: 1000,
            asset_base_url: "http://127.0.0.1:8050/assets".to_string(),
            default_firmware: DEFAULT_FIRMWARE.to_string(),
            max_firmware_bytes: 16 * 1024 * 1024,
            http_timeout_ms: 10_000,
            auto_connect: false,
            mount: MountConfig::default(),
        }
    }
}

impl FlasherConfig {
    /// Auto-flash delay as a `Duration`.
    pub fn auto_flash_delay(&self) -> Duration {
        Duration::from_millis(self.auto_flash_delay_ms)
    }

    /// HTTP timeout as a `Duration`.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Set the asset base URL.
    #[must_use]
    pub fn with_asset_base_url(mut self, url: impl Into<String>) -> Self {
        self.asset_base_url = url.into();
        self
    }

    /// Remove every delay (reset sequence, auto-flash, auto-init, polling).
    #[must_use]
    pub fn without_delays(mut self) -> Self {
        self.reset = ResetTiming::immediate();
        self.auto_flash_delay_ms = 0;
        self.mount.poll_interval_ms = 0;
        self.mount.auto_init_delay_ms = 0;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let config = FlasherConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.reset.release_ms, 100);
        assert_eq!(config.reset.hold_ms, 100);
        assert_eq!(config.reset.boot_settle_ms, 400);
        assert_eq!(config.auto_flash_delay(), Duration::from_secs(1));
        assert!(!config.auto_connect);
    }

    #[test]
    fn test_mount_deadline() {
        let mount = MountConfig::default();
        assert_eq!(mount.deadline(), Duration::from_secs(16));
    }

    #[test]
    fn test_without_delays() {
        let config = FlasherConfig::default().without_delays();
        assert_eq!(config.reset, ResetTiming::immediate());
        assert_eq!(config.auto_flash_delay_ms, 0);
        assert_eq!(config.mount.deadline(), Duration::ZERO);
    }
}
