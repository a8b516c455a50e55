use crate::error::{DriverError, Result};
use crate::protocol::MAX_BOARDS;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Timing and sizing of the driver. Every default matches the board firmware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct ArrayConfig {
    pub max_boards: usize,
    /// A mode is trusted this long after the last confirmed frame.
    pub inactivity_allowed_ms: u64,
    pub start_attempts: u8,
    /// How long each start attempt waits for a confirming frame.
    pub start_window_ms: u64,
    /// A frame this recent confirms a start.
    pub confirm_window_ms: u64,
    pub calibration_timeout_ms: u64,
    pub calibration_data_timeout_ms: u64,
    pub alive_timeout_ms: u64,
    pub test_period_ms: u64,
    /// Boards registered at startup, in slot order.
    pub devices: Vec<String>,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            max_boards: MAX_BOARDS,
            inactivity_allowed_ms: 10_000,
            start_attempts: 8,
            start_window_ms: 50,
            confirm_window_ms: 100,
            calibration_timeout_ms: 10_000,
            calibration_data_timeout_ms: 1_000,
            alive_timeout_ms: 50,
            test_period_ms: 300,
            devices: Vec::new(),
        }
    }
}

impl ArrayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_boards == 0 || self.max_boards > MAX_BOARDS {
            return Err(DriverError::InvalidConfig(format!(
                "max_boards must be 1..={MAX_BOARDS}, got {}",
                self.max_boards
            )));
        }
        if self.devices.len() > self.max_boards {
            return Err(DriverError::InvalidConfig(format!(
                "{} devices listed but max_boards is {}",
                self.devices.len(),
                self.max_boards
            )));
        }
        if self.start_attempts == 0 {
            return Err(DriverError::InvalidConfig(
                "start_attempts must be positive".into(),
            ));
        }
        if self.start_window_ms == 0 || self.confirm_window_ms == 0 {
            return Err(DriverError::InvalidConfig(
                "start and confirm windows must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        let cfg: ArrayConfig = serde_yaml::from_str(raw).context("parsing array config")?;
        cfg.validate()?;
        Ok(cfg)
    }
}

pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<ArrayConfig> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading config: {}", path.display()))?;
    ArrayConfig::from_yaml_str(&raw).with_context(|| format!("loading config: {}", path.display()))
}
