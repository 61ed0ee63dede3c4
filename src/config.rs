//! Service configuration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::i2c::{DEFAULT_ADDRESS, MAX_WRITE_RETRIES};
use crate::traits::{ControlError, Result};

/// Runtime configuration; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// 7-bit address of the motor controller.
    pub i2c_address: u16,
    /// Bus on which an answering controller means a PTZ camera.
    pub ptz_bus: u32,
    /// Directory holding the `i2c-N` nodes.
    pub i2c_dev_dir: PathBuf,
    /// Attempts per logical I2C write.
    pub max_write_retries: u32,
    /// Minimum spacing of mutating requests, in milliseconds.
    pub rate_limit_ms: u64,
    /// Wall-clock budget of the startup metadata probe, in milliseconds.
    pub metadata_probe_timeout_ms: u64,
    /// File persisting the focus level.
    pub settings_path: PathBuf,
    /// Focus level used when none has been stored.
    pub default_focus_level: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            i2c_address: DEFAULT_ADDRESS,
            ptz_bus: 1,
            i2c_dev_dir: PathBuf::from("/dev"),
            max_write_retries: MAX_WRITE_RETRIES,
            rate_limit_ms: 100,
            metadata_probe_timeout_ms: 5000,
            settings_path: PathBuf::from("/var/lib/arducam-ctl/settings.json"),
            default_focus_level: 512,
        }
    }
}

impl Config {
    /// Load from a JSON file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        let config: Self = serde_json::from_str(&text)
            .map_err(|err| ControlError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the hardware cannot use.
    pub fn validate(&self) -> Result<()> {
        if self.i2c_address > 0x7F {
            return Err(ControlError::Config(format!(
                "i2c_address {:#x} is not a 7-bit address",
                self.i2c_address
            )));
        }
        if self.max_write_retries == 0 {
            return Err(ControlError::Config(
                "max_write_retries must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// Rate limit as a duration.
    pub const fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    /// Metadata probe timeout as a duration.
    pub const fn metadata_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_probe_timeout_ms)
    }
}
