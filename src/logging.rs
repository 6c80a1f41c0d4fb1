use serde::Deserialize;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{HookError, Result};

const LOG_FILE_PREFIX: &str = "hookdeploy";

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// `[logging]` table
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Also write logs here when set
    pub directory: Option<PathBuf>,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            rotation: LogRotation::Daily,
        }
    }
}

/// Installs the global subscriber: console output plus, when a directory
/// is configured, a rolling log file. Keep the returned guard alive for as
/// long as file logs should be flushed.
pub fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| HookError::Config(format!("Invalid log level '{}': {}", config.level, e)))?;

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer()); // Console output

    let Some(directory) = &config.directory else {
        registry.init();
        return Ok(None);
    };

    std::fs::create_dir_all(directory)?;
    let file_appender =
        RollingFileAppender::new(config.rotation.into(), directory, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    registry
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false), // Disable ANSI colors for file logs
        )
        .init();

    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config: LoggingConfig = toml::from_str("").unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.rotation, LogRotation::Daily);
        assert!(config.directory.is_none());
    }

    #[test]
    fn parses_rotation() {
        let config: LoggingConfig =
            toml::from_str("level = \"debug\"\ndirectory = \"logs\"\nrotation = \"hourly\"")
                .unwrap();
        assert_eq!(config.rotation, LogRotation::Hourly);
        assert_eq!(config.directory, Some(PathBuf::from("logs")));
    }
}
