//! Application configuration management.
//!
//! Settings live in `<config_dir>/playfetch/config.json`. Missing fields take
//! their defaults, so older files keep loading as settings are added.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::coordinator::CoordinatorConfig;
use crate::descriptor::{DEFAULT_OUTPUT_TEMPLATE, Quality};
use crate::engine::DEFAULT_SOCKET_TIMEOUT;
use crate::error::{Error, Result};
use crate::flags::AbortPrecedence;
use crate::history::HISTORY_FILE_NAME;
use crate::inference::InferenceConfig;
use crate::pool::{clamp_concurrency, default_concurrency};
use crate::ytdlp::YtDlpConfig;

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Default destination folder.
    pub download_folder: PathBuf,
    /// Default quality.
    pub quality: Quality,
    /// Concurrent downloads, 1-8.
    pub concurrency: usize,
    /// Base output template.
    pub output_template: String,
    /// Engine socket timeout in seconds.
    pub socket_timeout_secs: u64,
    /// Which flag wins when both pause and cancel are set.
    pub abort_precedence: AbortPrecedence,
    /// History file name inside each destination folder.
    pub history_file_name: String,
    /// `yt-dlp` executable.
    pub ytdlp_path: PathBuf,
    /// Directory containing ffmpeg, if not on `PATH`.
    pub ffmpeg_location: Option<PathBuf>,
    /// Metadata inference for MP3 downloads.
    pub inference: InferenceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_folder: default_download_folder(),
            quality: Quality::default(),
            concurrency: default_concurrency(),
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            socket_timeout_secs: DEFAULT_SOCKET_TIMEOUT.as_secs(),
            abort_precedence: AbortPrecedence::default(),
            history_file_name: HISTORY_FILE_NAME.to_string(),
            ytdlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_location: None,
            inference: InferenceConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, creating it with
    /// defaults if missing.
    pub fn load() -> Result<Self> {
        let path = config_file_path();
        if !path.exists() {
            debug!("Config file not found, using defaults");
            let config = Self::default();
            if let Err(e) = config.save_to(&path) {
                warn!("Failed to save default config: {}", e);
            }
            return Ok(config);
        }
        Self::load_from(&path)
    }

    /// Load configuration from `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::FileSystem {
            path: path.to_path_buf(),
            message: format!("Failed to read config file: {e}"),
        })?;

        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;
        config.validate();

        info!("Loaded config from {}", path.display());
        debug!("Download folder: {}", config.download_folder.display());
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| Error::FileSystem {
                path: parent.to_path_buf(),
                message: format!("Failed to create config directory: {e}"),
            })?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| Error::FileSystem {
            path: path.to_path_buf(),
            message: format!("Failed to write config file: {e}"),
        })?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Clamp out-of-range values.
    pub fn validate(&mut self) {
        let clamped = clamp_concurrency(self.concurrency);
        if clamped != self.concurrency {
            warn!(
                "Concurrency {} out of range, using {}",
                self.concurrency, clamped
            );
            self.concurrency = clamped;
        }
        if self.socket_timeout_secs == 0 {
            self.socket_timeout_secs = DEFAULT_SOCKET_TIMEOUT.as_secs();
        }
        if self.history_file_name.trim().is_empty() {
            self.history_file_name = HISTORY_FILE_NAME.to_string();
        }
    }

    /// Engine socket timeout.
    #[must_use]
    pub const fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    /// Settings for the coordinator.
    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            concurrency: clamp_concurrency(self.concurrency),
            output_template: self.output_template.clone(),
            socket_timeout: self.socket_timeout(),
            abort_precedence: self.abort_precedence,
            history_file_name: self.history_file_name.clone(),
        }
    }

    /// Settings for the `yt-dlp` engine.
    #[must_use]
    pub fn engine_config(&self) -> YtDlpConfig {
        YtDlpConfig {
            program: self.ytdlp_path.clone(),
            ffmpeg_location: self.ffmpeg_location.clone(),
            socket_timeout: self.socket_timeout(),
        }
    }

    /// Path of the default config file.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        config_file_path()
    }
}

/// Default destination folder: the user's download directory.
#[must_use]
pub fn default_download_folder() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("playfetch")
        .join("config.json")
}
