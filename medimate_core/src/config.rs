//! Configuration file support for Medimate.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/medimate/config.toml`.

use crate::report::MAX_WINDOW_DAYS;
use crate::time_codec::MINUTES_PER_DAY;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub report: ReportConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Dispenser hardware and registration defaults
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Physical slot count N; valid slots are `0..N`
    #[serde(default = "default_slot_count")]
    pub slot_count: u32,

    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            slot_count: default_slot_count(),
            default_timezone: default_timezone(),
        }
    }
}

/// Compliance report defaults
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
        }
    }
}

/// Missed-dose policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Minutes after a scheduled time before an unresolved dose counts as missed
    #[serde(default = "default_miss_grace_minutes")]
    pub miss_grace_minutes: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            miss_grace_minutes: default_miss_grace_minutes(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("medimate")
}

fn default_slot_count() -> u32 {
    7
}

fn default_timezone() -> String {
    "UTC".into()
}

fn default_window_days() -> u32 {
    7
}

fn default_miss_grace_minutes() -> u32 {
    60
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("medimate").join("config.toml")
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.device.slot_count == 0 {
            return Err(Error::Config("device.slot_count must be at least 1".into()));
        }
        if self.report.window_days == 0 || self.report.window_days > MAX_WINDOW_DAYS {
            return Err(Error::Config(format!(
                "report.window_days must be between 1 and {}",
                MAX_WINDOW_DAYS
            )));
        }
        // Missed-dose detection only looks back one day
        if u32::from(MINUTES_PER_DAY) <= self.schedule.miss_grace_minutes {
            return Err(Error::Config(format!(
                "schedule.miss_grace_minutes must be below {}",
                MINUTES_PER_DAY
            )));
        }
        Ok(())
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
