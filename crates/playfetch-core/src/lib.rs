//! `Playfetch` Core Library
//!
//! This crate provides the core functionality for the `Playfetch` downloader:
//! - Fetching flat playlist or video info and tracking per-item progress
//! - Concurrent downloads on a bounded worker pool
//! - Cooperative pause, resume and cancel across all running downloads
//! - A per-folder append-only download history
//! - Optional LLM-assisted ID3 tagging of MP3 downloads
//! - Application configuration management
//!
//! # Error Handling
//!
//! Coordinator operations return [`Result`]. Failures of a single download
//! never surface as errors; they end up in that task's [`TaskOutcome`] and
//! history record.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use playfetch_core::{Coordinator, CoordinatorConfig, Quality, YtDlpEngine};
//!
//! let coordinator = Coordinator::new(Arc::new(YtDlpEngine::new()), CoordinatorConfig::default());
//! coordinator.fetch("https://www.youtube.com/playlist?list=...").await?;
//! coordinator.start("/music", Quality::AudioOnly).await?;
//! coordinator.wait_idle().await;
//! ```

pub mod config;
pub mod coordinator;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod events;
pub mod flags;
pub mod history;
pub mod inference;
pub mod item;
pub mod metadata;
pub mod pool;
pub mod task;
pub mod ytdlp;

pub use config::{AppConfig, default_download_folder};
pub use coordinator::{BatchHandle, BatchState, Coordinator, CoordinatorConfig};
pub use descriptor::{
    DEFAULT_OUTPUT_TEMPLATE, FALLBACK_FORMAT_SELECTOR, Quality, TaskDescriptor,
    effective_template, ordinal_template,
};
pub use engine::{
    DEFAULT_SOCKET_TIMEOUT, DownloadEngine, EngineProgress, EngineRequest, ProgressHook,
    ProgressStatus,
};
pub use error::{EngineError, Error, InferenceError, Result, TagError};
pub use events::{DownloadEvent, EventSender, StatusLevel};
pub use flags::{AbortPrecedence, ControlFlags, FlagSnapshot};
pub use history::{HISTORY_FILE_NAME, HistoryLog, HistoryRecord, HistoryStatus};
pub use inference::{
    GeminiInferrer, InferenceConfig, MetadataInferrer, TagOutcome, Tagger, build_prompt,
    parse_tag_record,
};
pub use item::{ItemRegistry, ItemState, MediaEntry, MediaInfo, MediaKind, derive_item_key};
pub use metadata::{RawMetadata, TagRecord, embed_tags, fetch_cover, read_raw_metadata};
pub use pool::{
    DEFAULT_CONCURRENCY, JobHandle, MAX_CONCURRENCY, MIN_CONCURRENCY, WorkerPool,
    clamp_concurrency,
};
pub use task::{DownloadTask, TaskOutcome, classify_failure};
pub use ytdlp::{YtDlpConfig, YtDlpEngine};
