//! Tracker settings management

use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Default seconds between reconciliation cycles
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 300;
/// Default seconds without a sighting before a process counts as dormant
pub const DEFAULT_DORMANT_TIMEOUT_SECS: u64 = 10 * 60;

const MAX_CHECK_INTERVAL_SECS: u64 = 24 * 60 * 60;
const MAX_DORMANT_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

/// Persisted tracker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seconds between reconciliation cycles
    pub check_interval_secs: u64,
    /// Seconds since last sighting after which a stopped process is dormant
    pub dormant_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            dormant_timeout_secs: DEFAULT_DORMANT_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    /// Default database location under the platform data directory
    pub fn default_database_path() -> Result<PathBuf, ConfigError> {
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDirectory)?;
        Ok(data_dir.join("proctrack").join("proctrack.db"))
    }

    /// Reject values the scheduler cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CHECK_INTERVAL_SECS).contains(&self.check_interval_secs) {
            return Err(ConfigError::InvalidInterval {
                got: self.check_interval_secs,
                max: MAX_CHECK_INTERVAL_SECS,
            });
        }
        if !(1..=MAX_DORMANT_TIMEOUT_SECS).contains(&self.dormant_timeout_secs) {
            return Err(ConfigError::InvalidDormantTimeout {
                got: self.dormant_timeout_secs,
                max: MAX_DORMANT_TIMEOUT_SECS,
            });
        }
        Ok(())
    }
}

/// Runtime configuration handed to the reconciler and scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// User every status record is written for
    pub username: String,
    pub check_interval: Duration,
    pub dormant_timeout: TimeDelta,
}

impl TrackerConfig {
    pub fn from_settings(username: String, settings: &Settings) -> Result<Self, ConfigError> {
        settings.validate()?;
        // validate() bounds the timeout well inside i64 seconds
        let dormant_timeout = TimeDelta::try_seconds(settings.dormant_timeout_secs as i64).ok_or(
            ConfigError::InvalidDormantTimeout {
                got: settings.dormant_timeout_secs,
                max: MAX_DORMANT_TIMEOUT_SECS,
            },
        )?;

        Ok(Self {
            username,
            check_interval: Duration::from_secs(settings.check_interval_secs),
            dormant_timeout,
        })
    }
}
