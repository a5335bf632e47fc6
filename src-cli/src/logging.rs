//! Structured logging setup.
//!
//! The console is reserved for download status, so the console layer stays
//! quiet unless verbosity is raised and writes to stderr. Everything the
//! library logs also goes to a JSON log file rotated by `tracing-appender`.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Crates whose events pass the filters.
const OWN_TARGETS: [&str; 2] = ["playfetch", "playfetch_core"];

/// Logging configuration options.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory where log files are stored.
    pub log_directory: PathBuf,
    /// Log file name prefix ("playfetch" -> "playfetch.2026-01-15").
    pub log_file_prefix: String,
    /// Maximum level printed to the console.
    pub console_level: Level,
    /// Maximum level written to the log file.
    pub file_level: Level,
    /// How often to rotate log files.
    pub rotation: LogRotation,
    /// Whether to include file/line info on the console.
    pub include_file_line: bool,
    /// Whether to log span enter/exit events.
    pub log_span_events: bool,
}

/// Log rotation frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRotation {
    /// A new file every hour.
    Hourly,
    /// A new file every day.
    Daily,
    /// A single file.
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LoggingConfig {
    /// Verbose console and file output.
    #[must_use]
    pub fn development() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_file_prefix: "playfetch".to_string(),
            console_level: Level::DEBUG,
            file_level: Level::TRACE,
            rotation: LogRotation::Hourly,
            include_file_line: true,
            log_span_events: true,
        }
    }

    /// Errors only on the console; debug detail in the file.
    #[must_use]
    pub fn production() -> Self {
        Self {
            log_directory: default_log_directory(),
            log_file_prefix: "playfetch".to_string(),
            console_level: Level::ERROR,
            file_level: Level::DEBUG,
            rotation: LogRotation::Daily,
            include_file_line: false,
            log_span_events: false,
        }
    }

    /// Production settings with the console level raised by `verbosity`
    /// (`-v` info, `-vv` debug, `-vvv` trace).
    #[must_use]
    pub fn for_verbosity(verbosity: u8) -> Self {
        let level = match verbosity {
            0 => Level::ERROR,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        let config = if verbosity >= 2 {
            Self::development()
        } else {
            Self::production()
        };
        config.with_console_level(level)
    }

    /// Set the log directory.
    #[must_use]
    pub fn with_log_directory(mut self, path: PathBuf) -> Self {
        self.log_directory = path;
        self
    }

    /// Set the console log level.
    #[must_use]
    pub const fn with_console_level(mut self, level: Level) -> Self {
        self.console_level = level;
        self
    }

    /// Set the log rotation frequency.
    #[must_use]
    pub const fn with_rotation(mut self, rotation: LogRotation) -> Self {
        self.rotation = rotation;
        self
    }
}

/// Keeps file logging active. Dropping it flushes pending entries.
pub struct LoggingGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the console filter.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    if !config.log_directory.exists() {
        std::fs::create_dir_all(&config.log_directory).map_err(|e| {
            LoggingError::DirectoryCreationFailed {
                path: config.log_directory.clone(),
                reason: e.to_string(),
            }
        })?;
    }

    let file_appender = RollingFileAppender::new(
        config.rotation.into(),
        &config.log_directory,
        &config.log_file_prefix,
    );
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(config.console_level)?,
    };
    let file_filter = build_filter(config.file_level)?;

    let span_events = if config.log_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(config.include_file_line)
        .with_line_number(config.include_file_line)
        .with_span_events(span_events.clone())
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .json()
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Default log directory.
#[must_use]
pub fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("playfetch")
        .join("logs")
}

/// Warnings from dependencies, `level` for our own crates.
fn build_filter(level: Level) -> Result<EnvFilter, LoggingError> {
    let level = level_to_directive(level);
    let directives = OWN_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(format!("warn,{directives}"))
        .map_err(|e| LoggingError::InvalidFilter(e.to_string()))
}

const fn level_to_directive(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Errors that can occur during logging initialization.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// Failed to create the log directory.
    #[error("Failed to create log directory {path}: {reason}")]
    DirectoryCreationFailed {
        /// The path that could not be created.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// A filter directive did not parse.
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    /// A global subscriber was already installed.
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_production() {
        let config = LoggingConfig::default();
        assert_eq!(config.console_level, Level::ERROR);
        assert_eq!(config.file_level, Level::DEBUG);
        assert_eq!(config.rotation, LogRotation::Daily);
        assert_eq!(config.log_file_prefix, "playfetch");
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(LoggingConfig::for_verbosity(0).console_level, Level::ERROR);
        assert_eq!(LoggingConfig::for_verbosity(1).console_level, Level::INFO);

        let debug = LoggingConfig::for_verbosity(2);
        assert_eq!(debug.console_level, Level::DEBUG);
        assert_eq!(debug.file_level, Level::TRACE);
        assert!(debug.include_file_line);

        assert_eq!(LoggingConfig::for_verbosity(9).console_level, Level::TRACE);
    }

    #[test]
    fn test_config_builder() {
        let config = LoggingConfig::production()
            .with_log_directory(PathBuf::from("/tmp/playfetch-logs"))
            .with_rotation(LogRotation::Never);
        assert_eq!(config.log_directory, PathBuf::from("/tmp/playfetch-logs"));
        assert_eq!(config.rotation, LogRotation::Never);
    }

    #[test]
    fn test_log_rotation_conversion() {
        assert!(matches!(Rotation::from(LogRotation::Hourly), Rotation::HOURLY));
        assert!(matches!(Rotation::from(LogRotation::Daily), Rotation::DAILY));
        assert!(matches!(Rotation::from(LogRotation::Never), Rotation::NEVER));
    }

    #[test]
    fn test_filter_directives_parse() {
        for level in [Level::ERROR, Level::INFO, Level::TRACE] {
            assert!(build_filter(level).is_ok());
        }
    }

    #[test]
    fn test_default_log_directory() {
        let dir = default_log_directory();
        assert!(dir.ends_with("playfetch/logs"));
    }
}
