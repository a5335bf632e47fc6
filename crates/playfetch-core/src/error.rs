//! Error types for Playfetch core operations.
//!
//! Failures of a single download never surface through [`Error`]: they are
//! absorbed into a [`TaskOutcome`](crate::task::TaskOutcome). The crate-wide
//! error type covers coordinator preconditions, configuration, persistence
//! and the delegated collaborators (engine, tagging, inference).

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Playfetch core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The download engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Reading or writing ID3 tags failed.
    #[error(transparent)]
    Tagging(#[from] TagError),

    /// The metadata-inference service failed.
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// An operation needs fetched entries but none are loaded.
    #[error("No playlist or video loaded; fetch info first")]
    NothingFetched,

    /// `start` was called with every item deselected.
    #[error("No items selected")]
    NoItemsSelected,

    /// `resume` was called before any batch was started.
    #[error("No previous batch to resume")]
    NoBatch,

    /// An item key is not present in the registry.
    #[error("Unknown item: {0}")]
    UnknownItem(String),

    /// The user supplied an unusable URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// File system operation failed.
    #[error("File system error at {path}: {message}")]
    FileSystem {
        /// Path where the error occurred.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The worker pool is no longer accepting jobs.
    #[error("Worker pool error: {0}")]
    Pool(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Typed failures reported by the delegated download engine.
///
/// The variants mirror the failure classes the outcome table distinguishes.
/// [`EngineError::Aborted`] is what a progress callback returns to unwind a
/// paused or cancelled download.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The content is not available from the current region.
    #[error("Geo-restricted: {0}")]
    GeoRestricted(String),

    /// The engine could not extract media information.
    #[error("Extractor error: {0}")]
    Extractor(String),

    /// The transfer itself failed.
    #[error("Download error: {0}")]
    Download(String),

    /// A network operation exceeded the socket timeout.
    #[error("Network timeout.")]
    Timeout,

    /// The progress callback requested an abort.
    #[error("Paused/Cancelled")]
    Aborted,

    /// The engine executable could not be started.
    #[error("Download engine not available: {program}: {reason}")]
    NotAvailable {
        /// Program that was launched.
        program: String,
        /// Why it could not be started.
        reason: String,
    },

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

/// Errors that can occur while reading or writing ID3 tags.
#[derive(Debug, Error)]
pub enum TagError {
    /// The file is not an MP3 file.
    #[error("Not an MP3 file: {path}")]
    NotMp3 {
        /// Offending path.
        path: PathBuf,
    },

    /// Reading existing tags failed.
    #[error("Failed to read tags from {path}: {reason}")]
    ReadFailed {
        /// File that was read.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Writing tags failed.
    #[error("Failed to write tags to {path}: {reason}")]
    WriteFailed {
        /// File that was written.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// Cover art could not be downloaded.
    #[error("Failed to fetch cover art from {url}: {reason}")]
    CoverFetchFailed {
        /// Cover URL.
        url: String,
        /// Underlying reason.
        reason: String,
    },
}

/// Errors that can occur when calling the metadata-inference service.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// No API key was configured.
    #[error("No API key configured for metadata inference")]
    MissingApiKey,

    /// Transport-level failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The service answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The response could not be turned into a tag record.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::Extractor("Video unavailable".to_string());
        assert_eq!(err.to_string(), "Extractor error: Video unavailable");
        assert_eq!(EngineError::Timeout.to_string(), "Network timeout.");
    }

    #[test]
    fn test_engine_error_converts_transparently() {
        let err: Error = EngineError::Download("HTTP Error 403".to_string()).into();
        assert!(matches!(err, Error::Engine(_)));
        assert_eq!(err.to_string(), "Download error: HTTP Error 403");
    }

    #[test]
    fn test_file_system_error_display() {
        let err = Error::FileSystem {
            path: PathBuf::from("/test/path"),
            message: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("/test/path"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_inference_api_error_display() {
        let err = InferenceError::Api {
            status: 429,
            message: "quota".to_string(),
        };
        assert_eq!(err.to_string(), "API error (status 429): quota");
    }
}
