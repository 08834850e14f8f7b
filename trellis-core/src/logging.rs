//! Logging bridge.
//!
//! Everything in Trellis logs through `tracing`. This module installs a
//! `tracing-subscriber` from a [`LogConfig`], which can be read from the
//! `[logger_root]` section of an INI settings file:
//!
//! ```ini
//! [logger_root]
//! level = DEBUG
//! ```
//!
//! `RUST_LOG` wins over the configured level when set.
//!
//! ```no_run
//! use trellis_core::logging::*;
//!
//! let _guard = LogConfig::new()
//!     .level(LogLevel::Debug)
//!     .format(LogFormat::Plain)
//!     .init();
//!
//! info!("Logging initialized");
//! ```

use crate::error::{Error, Result};
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trellis_config::Settings;

pub use tracing::{debug, error, info, trace, warn};

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level name; `WARNING`, `CRITICAL` and `NOTSET` are accepted too
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "TRACE" | "NOTSET" => Some(LogLevel::Trace),
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "ERROR" | "CRITICAL" | "FATAL" => Some(LogLevel::Error),
            _ => None,
        }
    }

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

/// Output format for log messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured, machine-readable
    Json,
    Plain,
    Compact,
}

/// Output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    File(String),
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    pub targets: bool,
    pub colors: bool,
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `[logger_root] level` from raw INI sections; other sections
    /// are ignored
    pub fn from_settings(settings: &Settings) -> Self {
        let mut config = Self::default();
        if let Some(level) = settings
            .section("logger_root")
            .and_then(|section| section.get("level"))
            .and_then(|level| LogLevel::parse(level))
        {
            config.level = level;
        }
        if settings.debug() {
            config.format = LogFormat::Plain;
        }
        config
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_targets(mut self, enable: bool) -> Self {
        self.targets = enable;
        self
    }

    pub fn with_colors(mut self, enable: bool) -> Self {
        self.colors = enable;
        self
    }

    /// Install the global subscriber.
    ///
    /// Keep the returned guard alive; dropping it flushes pending logs.
    /// Fails if a global subscriber is already installed.
    pub fn init(self) -> Result<WorkerGuard> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_str()));

        let (writer, guard) = match &self.output {
            LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
            LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
            LogOutput::File(path) => {
                let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
                tracing_appender::non_blocking(file)
            }
        };

        let registry = tracing_subscriber::registry().with(env_filter);
        let installed = match self.format {
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(writer).with_target(self.targets))
                .try_init(),
            LogFormat::Plain => registry
                .with(
                    fmt::layer()
                        .with_writer(writer)
                        .with_target(self.targets)
                        .with_ansi(self.colors),
                )
                .try_init(),
            LogFormat::Compact => registry
                .with(
                    fmt::layer()
                        .compact()
                        .with_writer(writer)
                        .with_target(self.targets)
                        .with_ansi(self.colors),
                )
                .try_init(),
        };
        installed.map_err(|e| Error::Internal(format!("Logging already initialized: {}", e)))?;

        Ok(guard)
    }
}

impl Default for LogConfig {
    /// JSON to STDOUT at INFO
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            output: LogOutput::Stdout,
            targets: true,
            colors: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!(LogLevel::parse("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("CRITICAL"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_from_settings_reads_logger_root() {
        let settings = Settings::builder()
            .ini("test", "[app]\ndebug = true\n\n[logger_root]\nlevel = WARNING\n")
            .unwrap()
            .build()
            .unwrap();
        let config = LogConfig::from_settings(&settings);
        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.format, LogFormat::Plain);
    }

    #[test]
    fn test_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.output, LogOutput::Stdout);
    }
}
