//! Logging setup for the engine and its inspection binary

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt as tfmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::errors::EngineError;

/// File name prefix of the daily rolling log
const LOG_FILE_PREFIX: &str = "hubspoke.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(EngineError::ConfigError(format!("Invalid log level: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub log_level: LogLevel,

    /// Emit to stdout
    pub stdout: bool,

    /// Directory for a daily rolling JSON log, if any
    pub log_dir: Option<PathBuf>,

    /// JSON lines on stdout instead of human-readable output
    pub json_format: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            stdout: true,
            log_dir: None,
            json_format: false,
        }
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the configured level. Fails if a subscriber is
/// already installed.
pub fn init_logging(options: LogOptions) -> Result<(), EngineError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.log_level.as_str()));

    let mut layers = Vec::new();

    if options.stdout {
        let stdout = tfmt::layer().with_target(false);
        if options.json_format {
            layers.push(stdout.json().boxed());
        } else {
            layers.push(stdout.boxed());
        }
    }

    if let Some(dir) = &options.log_dir {
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        layers.push(
            tfmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(appender)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| EngineError::ConfigError(format!("Logging already initialized: {}", e)))
}
