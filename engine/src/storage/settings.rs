//! Settings file management

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    /// Also write logs to the storage logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Retry configuration for deployment steps
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            log_to_file: false,
            retry: RetrySettings::default(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file is missing
    pub async fn load(file: &File) -> Result<Self, EngineError> {
        match file.read_json_opt::<Settings>().await {
            Ok(Some(settings)) => {
                settings.validate()?;
                Ok(settings)
            }
            Ok(None) => {
                debug!("No settings file at {}, using defaults", file.path().display());
                Ok(Self::default())
            }
            Err(e) => Err(EngineError::ConfigError(format!(
                "Unable to read {}: {}",
                file.path().display(),
                e
            ))),
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.retry.max_attempts == 0 {
            return Err(EngineError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.max_delay_secs < self.retry.base_delay_secs {
            return Err(EngineError::ConfigError(
                "retry.max_delay_secs must not be below retry.base_delay_secs".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts per step before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay handed to the retry scheduler
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    /// Upper bound on any single retry delay
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_secs() -> u64 {
    5
}

fn default_max_delay_secs() -> u64 {
    300
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}
