//! Interface to the delegated media download engine.
//!
//! The engine performs extraction and transfer; Playfetch only drives it.
//! Progress is reported through a callback that may return
//! [`EngineError::Aborted`] to unwind the running download at that point.

use std::path::PathBuf;
use std::time::Duration;

use crate::descriptor::TaskDescriptor;
use crate::error::EngineError;
use crate::item::MediaInfo;

/// Default per-request socket timeout.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine-reported transfer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    /// Bytes are being received.
    Downloading,
    /// A file finished downloading.
    Finished,
}

/// One progress report from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineProgress {
    /// Transfer status.
    pub status: ProgressStatus,
    /// Bytes received so far for the current file.
    pub downloaded_bytes: u64,
    /// Exact size of the current file, when known.
    pub total_bytes: Option<u64>,
    /// Estimated size, used when the exact size is unknown.
    pub total_bytes_estimate: Option<u64>,
    /// File being written.
    pub filename: Option<String>,
}

impl EngineProgress {
    /// A `downloading` report with an exact total.
    #[must_use]
    pub const fn downloading(downloaded_bytes: u64, total_bytes: Option<u64>) -> Self {
        Self {
            status: ProgressStatus::Downloading,
            downloaded_bytes,
            total_bytes,
            total_bytes_estimate: None,
            filename: None,
        }
    }

    /// A `finished` report for `filename`.
    pub fn finished(filename: impl Into<String>) -> Self {
        Self {
            status: ProgressStatus::Finished,
            downloaded_bytes: 0,
            total_bytes: None,
            total_bytes_estimate: None,
            filename: Some(filename.into()),
        }
    }

    /// Known total size (exact, else estimated), ignoring zero.
    #[must_use]
    pub fn known_total(&self) -> Option<u64> {
        self.total_bytes
            .or(self.total_bytes_estimate)
            .filter(|&total| total > 0)
    }

    /// `floor(downloaded / total * 100)`, clamped to 100, when the total is known.
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        self.known_total().map(|total| {
            let percent = u128::from(self.downloaded_bytes) * 100 / u128::from(total);
            percent.min(100) as u8
        })
    }
}

/// Everything the engine needs for one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRequest {
    /// Source URL.
    pub url: String,
    /// Format-selection expression.
    pub format: String,
    /// Destination folder.
    pub folder: PathBuf,
    /// Output naming template, relative to `folder`.
    pub output_template: String,
    /// Continue partially downloaded files with the same name.
    pub continue_partial: bool,
    /// Per-request socket timeout.
    pub socket_timeout: Duration,
    /// Convert to MP3 and embed metadata and thumbnail.
    pub extract_audio: bool,
}

impl EngineRequest {
    /// Build the request for a task descriptor.
    #[must_use]
    pub fn from_descriptor(descriptor: &TaskDescriptor, socket_timeout: Duration) -> Self {
        Self {
            url: descriptor.url().to_string(),
            format: descriptor.quality().format_selector().to_string(),
            folder: descriptor.folder().to_path_buf(),
            output_template: descriptor.output_template().to_string(),
            continue_partial: true,
            socket_timeout,
            extract_audio: descriptor.quality().is_audio_only(),
        }
    }
}

/// Progress callback handed to [`DownloadEngine::download`].
pub type ProgressHook<'a> = dyn FnMut(&EngineProgress) -> Result<(), EngineError> + 'a;

/// Delegated download engine.
///
/// Implementations block the calling thread for the whole operation.
pub trait DownloadEngine: Send + Sync {
    /// Fetch flat playlist or video information without downloading.
    fn fetch_info(&self, url: &str) -> Result<MediaInfo, EngineError>;

    /// Download one URL, reporting progress through `on_progress`.
    ///
    /// When `on_progress` returns an error the engine must stop and return
    /// that error. On success, returns the final file path after any
    /// post-processing, when the engine reports one.
    fn download(
        &self,
        request: &EngineRequest,
        on_progress: &mut ProgressHook<'_>,
    ) -> Result<Option<PathBuf>, EngineError>;
}
