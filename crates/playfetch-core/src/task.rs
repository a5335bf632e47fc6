//! One download, start to finish.
//!
//! A [`DownloadTask`] runs on a pool worker. It drives the engine with a
//! progress hook that observes the shared [`ControlFlags`], classifies how
//! the download ended, optionally retags the resulting MP3, and always ends
//! by emitting exactly one history record.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::descriptor::TaskDescriptor;
use crate::engine::{
    DEFAULT_SOCKET_TIMEOUT, DownloadEngine, EngineProgress, EngineRequest, ProgressStatus,
};
use crate::error::EngineError;
use crate::events::{EventSender, StatusLevel};
use crate::flags::{AbortPrecedence, ControlFlags, FlagSnapshot};
use crate::history::HistoryRecord;
use crate::inference::{TagOutcome, Tagger};
use crate::metadata::is_mp3;

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The download completed.
    Success {
        /// Resolved output file, when the engine reported one.
        filename: Option<String>,
    },
    /// Geo-restricted content; nothing was downloaded.
    Skipped,
    /// The download failed. Holds the user-visible message.
    Failed(String),
    /// Stopped by a pause request.
    Paused,
    /// Stopped by a cancel request.
    Cancelled,
}

impl TaskOutcome {
    /// Whether the download completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Message recorded in the history entry; `None` on success.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Success { .. } => None,
            Self::Skipped => Some("Geo-restricted; skipped.".to_string()),
            Self::Failed(message) => Some(message.clone()),
            Self::Paused => Some("Paused.".to_string()),
            Self::Cancelled => Some("Cancelled.".to_string()),
        }
    }

    /// Status line reported when the task ends, if any.
    fn status(&self) -> Option<(String, StatusLevel)> {
        match self {
            Self::Success { .. } => None,
            Self::Skipped => Some(("Geo-restricted; skipped.".to_string(), StatusLevel::Warning)),
            Self::Failed(message) => Some((message.clone(), StatusLevel::Error)),
            Self::Paused => Some(("Download paused.".to_string(), StatusLevel::Warning)),
            Self::Cancelled => Some(("Download cancelled.".to_string(), StatusLevel::Warning)),
        }
    }
}

/// Classify an engine failure, first match wins.
///
/// Typed engine failures are reported as such even when a flag is set.
/// Aborts and unclassified failures are attributed to whichever flag is set,
/// checking them in `precedence` order, and only otherwise reported as
/// unexpected.
#[must_use]
pub fn classify_failure(
    error: &EngineError,
    flags: FlagSnapshot,
    precedence: AbortPrecedence,
) -> TaskOutcome {
    match error {
        EngineError::GeoRestricted(_) => TaskOutcome::Skipped,
        EngineError::Extractor(_) | EngineError::Download(_) | EngineError::Timeout => {
            TaskOutcome::Failed(error.to_string())
        }
        EngineError::Aborted | EngineError::NotAvailable { .. } | EngineError::Other(_) => {
            let by_flag = match precedence {
                AbortPrecedence::PauseFirst => {
                    if flags.pause {
                        Some(TaskOutcome::Paused)
                    } else if flags.cancel {
                        Some(TaskOutcome::Cancelled)
                    } else {
                        None
                    }
                }
                AbortPrecedence::CancelFirst => {
                    if flags.cancel {
                        Some(TaskOutcome::Cancelled)
                    } else if flags.pause {
                        Some(TaskOutcome::Paused)
                    } else {
                        None
                    }
                }
            };
            by_flag.unwrap_or_else(|| TaskOutcome::Failed(format!("Unexpected error: {error}")))
        }
    }
}

/// Turns raw engine progress into monotone per-item events.
#[derive(Debug, Default)]
struct ProgressTracker {
    last_percent: Option<u8>,
    completed: Option<String>,
}

impl ProgressTracker {
    fn observe(&mut self, progress: &EngineProgress, key: &str, events: &EventSender) {
        match progress.status {
            ProgressStatus::Downloading => {
                if let Some(percent) = progress.percent() {
                    self.emit(percent, key, events);
                }
            }
            ProgressStatus::Finished => {
                self.emit(100, key, events);
                if self.completed.is_none() {
                    let filename = progress.filename.clone().unwrap_or_default();
                    events.finished(key, &filename);
                    self.completed = Some(filename);
                }
            }
        }
    }

    fn emit(&mut self, percent: u8, key: &str, events: &EventSender) {
        let percent = percent.min(100).max(self.last_percent.unwrap_or(0));
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            events.progress(key, percent);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panicked".to_string())
}

/// A single download bound to its descriptor and shared collaborators.
pub struct DownloadTask {
    descriptor: TaskDescriptor,
    flags: ControlFlags,
    events: EventSender,
    engine: Arc<dyn DownloadEngine>,
    tagger: Option<Tagger>,
    precedence: AbortPrecedence,
    socket_timeout: Duration,
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("descriptor", &self.descriptor)
            .field("precedence", &self.precedence)
            .field("tagging", &self.tagger.is_some())
            .finish_non_exhaustive()
    }
}

impl DownloadTask {
    /// Create a task with default precedence, timeout and no tagging.
    #[must_use]
    pub fn new(
        descriptor: TaskDescriptor,
        flags: ControlFlags,
        events: EventSender,
        engine: Arc<dyn DownloadEngine>,
    ) -> Self {
        Self {
            descriptor,
            flags,
            events,
            engine,
            tagger: None,
            precedence: AbortPrecedence::default(),
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
        }
    }

    /// Retag successful MP3 downloads with `tagger`.
    #[must_use]
    pub fn with_tagger(mut self, tagger: Option<Tagger>) -> Self {
        self.tagger = tagger;
        self
    }

    /// Set which flag wins when both are set at abort time.
    #[must_use]
    pub const fn with_precedence(mut self, precedence: AbortPrecedence) -> Self {
        self.precedence = precedence;
        self
    }

    /// Set the engine's socket timeout.
    #[must_use]
    pub const fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// The task's descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    /// Run the download on the current thread.
    ///
    /// Never fails or panics: every ending is folded into the returned
    /// outcome, and the history record is always the last event emitted.
    pub fn run(self) -> TaskOutcome {
        let started_at = Utc::now();
        let key = self.descriptor.key();
        let request = EngineRequest::from_descriptor(&self.descriptor, self.socket_timeout);
        debug!("Starting download of '{}' ({})", key, request.url);

        let mut tracker = ProgressTracker::default();
        let result = {
            let flags = &self.flags;
            let events = &self.events;
            let tracker = &mut tracker;
            let mut hook = |progress: &EngineProgress| -> Result<(), EngineError> {
                if flags.should_abort() {
                    return Err(EngineError::Aborted);
                }
                tracker.observe(progress, key, events);
                Ok(())
            };
            panic::catch_unwind(AssertUnwindSafe(|| self.engine.download(&request, &mut hook)))
                .unwrap_or_else(|payload| Err(EngineError::Other(panic_message(payload.as_ref()))))
        };

        let outcome = match result {
            Ok(final_path) => TaskOutcome::Success {
                filename: final_path
                    .map(|p| p.display().to_string())
                    .or(tracker.completed),
            },
            Err(error) => {
                let outcome = classify_failure(&error, self.flags.snapshot(), self.precedence);
                debug!("Download of '{}' ended with {:?}: {}", key, outcome, error);
                outcome
            }
        };

        match &outcome {
            TaskOutcome::Success { .. } => info!("Downloaded '{}'", key),
            TaskOutcome::Paused | TaskOutcome::Cancelled => info!("Stopped '{}': {:?}", key, outcome),
            _ => warn!("Download of '{}' failed: {:?}", key, outcome.error_message()),
        }

        if let Some((message, level)) = outcome.status() {
            self.events.status(message, level);
        }

        if let TaskOutcome::Success {
            filename: Some(filename),
        } = &outcome
        {
            let tagged =
                panic::catch_unwind(AssertUnwindSafe(|| self.tag_if_audio(Path::new(filename))));
            if let Err(payload) = tagged {
                let reason = panic_message(payload.as_ref());
                warn!("Tagging '{}' panicked: {}", key, reason);
                self.events
                    .status(format!("Tagging failed: {reason}"), StatusLevel::Warning);
            }
        }

        self.events.history(HistoryRecord::for_task(
            &self.descriptor,
            started_at,
            outcome.error_message(),
        ));
        outcome
    }

    fn tag_if_audio(&self, path: &Path) {
        let Some(tagger) = &self.tagger else {
            return;
        };
        if !self.descriptor.quality().is_audio_only() || !is_mp3(path) {
            return;
        }

        let name = path.file_name().map_or_else(
            || path.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        match tagger.tag_file(path) {
            Ok(TagOutcome::Inferred) => {
                self.events.status(format!("Tagged: {name}"), StatusLevel::Info);
            }
            Ok(TagOutcome::Fallback(reason)) => {
                self.events.status(
                    format!("Fallback tagging applied to {name}: {reason}"),
                    StatusLevel::Info,
                );
            }
            Err(e) => {
                warn!("Tagging '{}' failed: {}", name, e);
                self.events
                    .status(format!("Tagging failed: {e}"), StatusLevel::Warning);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Quality;
    use crate::engine::ProgressHook;
    use crate::events::DownloadEvent;
    use crate::history::HistoryStatus;
    use crate::item::MediaInfo;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Replays progress steps, then returns a fixed result.
    struct ScriptedEngine {
        steps: Vec<EngineProgress>,
        result: Result<Option<PathBuf>, EngineError>,
        before_step: Mutex<Option<Box<dyn FnMut(usize) + Send>>>,
    }

    impl ScriptedEngine {
        fn new(steps: Vec<EngineProgress>, result: Result<Option<PathBuf>, EngineError>) -> Self {
            Self {
                steps,
                result,
                before_step: Mutex::new(None),
            }
        }
    }

    impl DownloadEngine for ScriptedEngine {
        fn fetch_info(&self, _url: &str) -> Result<MediaInfo, EngineError> {
            Err(EngineError::Other("not scripted".to_string()))
        }

        fn download(
            &self,
            _request: &EngineRequest,
            on_progress: &mut ProgressHook<'_>,
        ) -> Result<Option<PathBuf>, EngineError> {
            for (i, step) in self.steps.iter().enumerate() {
                if let Some(before) = self.before_step.lock().unwrap().as_mut() {
                    before(i);
                }
                on_progress(step)?;
            }
            self.result.clone()
        }
    }

    struct PanickingEngine;

    impl DownloadEngine for PanickingEngine {
        fn fetch_info(&self, _url: &str) -> Result<MediaInfo, EngineError> {
            unreachable!()
        }

        fn download(
            &self,
            _request: &EngineRequest,
            _on_progress: &mut ProgressHook<'_>,
        ) -> Result<Option<PathBuf>, EngineError> {
            panic!("boom");
        }
    }

    fn descriptor() -> TaskDescriptor {
        TaskDescriptor::new("https://x/watch?v=a", "a", "/tmp", Quality::P720, "")
    }

    fn run_task(
        engine: impl DownloadEngine + 'static,
        flags: &ControlFlags,
        precedence: AbortPrecedence,
    ) -> (TaskOutcome, Vec<DownloadEvent>) {
        let (events, mut rx) = EventSender::channel();
        let outcome = DownloadTask::new(descriptor(), flags.clone(), events, Arc::new(engine))
            .with_precedence(precedence)
            .run();
        let mut collected = Vec::new();
        while let Ok(event) = rx.try_recv() {
            collected.push(event);
        }
        (outcome, collected)
    }

    fn progress_values(events: &[DownloadEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                DownloadEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    fn history(events: &[DownloadEvent]) -> Vec<&HistoryRecord> {
        events
            .iter()
            .filter_map(|e| match e {
                DownloadEvent::History(record) => Some(record),
                _ => None,
            })
            .collect()
    }

    mod classification_tests {
        use super::*;

        const BOTH: FlagSnapshot = FlagSnapshot {
            cancel: true,
            pause: true,
        };

        #[test]
        fn test_typed_failures_ignore_flags() {
            let geo = EngineError::GeoRestricted("x".to_string());
            assert_eq!(
                classify_failure(&geo, BOTH, AbortPrecedence::PauseFirst),
                TaskOutcome::Skipped
            );
            let extractor = EngineError::Extractor("gone".to_string());
            assert_eq!(
                classify_failure(&extractor, BOTH, AbortPrecedence::PauseFirst),
                TaskOutcome::Failed("Extractor error: gone".to_string())
            );
            assert_eq!(
                classify_failure(&EngineError::Timeout, FlagSnapshot::default(), AbortPrecedence::PauseFirst),
                TaskOutcome::Failed("Network timeout.".to_string())
            );
        }

        #[test]
        fn test_pause_masks_cancel_by_default() {
            assert_eq!(
                classify_failure(&EngineError::Aborted, BOTH, AbortPrecedence::PauseFirst),
                TaskOutcome::Paused
            );
        }

        #[test]
        fn test_cancel_first_precedence() {
            assert_eq!(
                classify_failure(&EngineError::Aborted, BOTH, AbortPrecedence::CancelFirst),
                TaskOutcome::Cancelled
            );
            let pause_only = FlagSnapshot {
                cancel: false,
                pause: true,
            };
            assert_eq!(
                classify_failure(&EngineError::Aborted, pause_only, AbortPrecedence::CancelFirst),
                TaskOutcome::Paused
            );
        }

        #[test]
        fn test_other_failure_while_cancelled_is_cancelled() {
            let flags = FlagSnapshot {
                cancel: true,
                pause: false,
            };
            assert_eq!(
                classify_failure(&EngineError::Other("x".to_string()), flags, AbortPrecedence::PauseFirst),
                TaskOutcome::Cancelled
            );
        }

        #[test]
        fn test_unexpected_without_flags() {
            assert_eq!(
                classify_failure(
                    &EngineError::Other("boom".to_string()),
                    FlagSnapshot::default(),
                    AbortPrecedence::PauseFirst
                ),
                TaskOutcome::Failed("Unexpected error: boom".to_string())
            );
        }

        #[test]
        fn test_history_messages() {
            assert_eq!(TaskOutcome::Paused.error_message().as_deref(), Some("Paused."));
            assert_eq!(TaskOutcome::Cancelled.error_message().as_deref(), Some("Cancelled."));
            assert_eq!(
                TaskOutcome::Skipped.error_message().as_deref(),
                Some("Geo-restricted; skipped.")
            );
            assert!(TaskOutcome::Success { filename: None }.error_message().is_none());
        }
    }

    #[test]
    fn test_success_emits_monotone_progress_then_completion_then_history() {
        let engine = ScriptedEngine::new(
            vec![
                EngineProgress::downloading(10, Some(100)),
                EngineProgress::downloading(60, Some(100)),
                EngineProgress::downloading(40, Some(100)),
                EngineProgress::finished("/tmp/01 - a.mp4"),
            ],
            Ok(None),
        );
        let (outcome, events) = run_task(engine, &ControlFlags::new(), AbortPrecedence::PauseFirst);

        assert_eq!(
            outcome,
            TaskOutcome::Success {
                filename: Some("/tmp/01 - a.mp4".to_string())
            }
        );
        assert_eq!(progress_values(&events), vec![10, 60, 100]);
        assert!(matches!(events.last(), Some(DownloadEvent::History(r)) if r.is_ok()));

        let finished_at = events
            .iter()
            .position(|e| matches!(e, DownloadEvent::Finished { .. }))
            .unwrap();
        let last_progress = events
            .iter()
            .rposition(|e| matches!(e, DownloadEvent::Progress { .. }))
            .unwrap();
        assert!(last_progress < finished_at);
    }

    #[test]
    fn test_multi_stream_reports_one_completion() {
        let engine = ScriptedEngine::new(
            vec![
                EngineProgress::downloading(50, Some(100)),
                EngineProgress::finished("/tmp/a.f137.mp4"),
                EngineProgress::downloading(10, Some(100)),
                EngineProgress::finished("/tmp/a.f140.m4a"),
            ],
            Ok(Some(PathBuf::from("/tmp/a.mp4"))),
        );
        let (outcome, events) = run_task(engine, &ControlFlags::new(), AbortPrecedence::PauseFirst);

        let completions: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, DownloadEvent::Finished { .. }))
            .collect();
        assert_eq!(completions.len(), 1);
        assert_eq!(progress_values(&events), vec![50, 100]);
        assert_eq!(
            outcome,
            TaskOutcome::Success {
                filename: Some("/tmp/a.mp4".to_string())
            }
        );
    }

    #[test]
    fn test_unknown_total_emits_no_progress() {
        let engine = ScriptedEngine::new(vec![EngineProgress::downloading(10, None)], Ok(None));
        let (_, events) = run_task(engine, &ControlFlags::new(), AbortPrecedence::PauseFirst);
        assert!(progress_values(&events).is_empty());
        assert_eq!(history(&events).len(), 1);
    }

    #[test]
    fn test_extractor_failure_records_error() {
        let engine = ScriptedEngine::new(
            vec![],
            Err(EngineError::Extractor("Video unavailable".to_string())),
        );
        let (outcome, events) = run_task(engine, &ControlFlags::new(), AbortPrecedence::PauseFirst);

        assert_eq!(
            outcome,
            TaskOutcome::Failed("Extractor error: Video unavailable".to_string())
        );
        let records = history(&events);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, HistoryStatus::Error);
        assert_eq!(
            records[0].error.as_deref(),
            Some("Extractor error: Video unavailable")
        );
        assert!(
            events
                .iter()
                .any(|e| matches!(e, DownloadEvent::Status { level: StatusLevel::Error, .. }))
        );
    }

    #[test]
    fn test_geo_restriction_is_skipped_with_warning() {
        let engine = ScriptedEngine::new(vec![], Err(EngineError::GeoRestricted("x".to_string())));
        let (outcome, events) = run_task(engine, &ControlFlags::new(), AbortPrecedence::PauseFirst);
        assert_eq!(outcome, TaskOutcome::Skipped);
        assert!(events.iter().any(|e| matches!(
            e,
            DownloadEvent::Status { message, level: StatusLevel::Warning } if message == "Geo-restricted; skipped."
        )));
    }

    #[test]
    fn test_pause_before_first_callback_aborts() {
        let flags = ControlFlags::new();
        flags.request_pause();
        let engine = ScriptedEngine::new(
            vec![
                EngineProgress::downloading(10, Some(100)),
                EngineProgress::finished("/tmp/a.mp4"),
            ],
            Ok(None),
        );
        let (outcome, events) = run_task(engine, &flags, AbortPrecedence::PauseFirst);

        assert_eq!(outcome, TaskOutcome::Paused);
        assert!(progress_values(&events).is_empty());
        assert_eq!(history(&events)[0].error.as_deref(), Some("Paused."));
    }

    #[test]
    fn test_cancel_mid_download() {
        let flags = ControlFlags::new();
        let engine = ScriptedEngine::new(
            vec![
                EngineProgress::downloading(30, Some(100)),
                EngineProgress::downloading(60, Some(100)),
                EngineProgress::finished("/tmp/a.mp4"),
            ],
            Ok(None),
        );
        let cancel = flags.clone();
        *engine.before_step.lock().unwrap() = Some(Box::new(move |i| {
            if i == 1 {
                cancel.request_cancel();
            }
        }));
        let (outcome, events) = run_task(engine, &flags, AbortPrecedence::PauseFirst);

        assert_eq!(outcome, TaskOutcome::Cancelled);
        assert_eq!(progress_values(&events), vec![30]);
        assert!(!events.iter().any(|e| matches!(e, DownloadEvent::Finished { .. })));
        assert_eq!(history(&events)[0].error.as_deref(), Some("Cancelled."));
    }

    #[test]
    fn test_tagging_panic_still_records_history() {
        use crate::error::InferenceError;
        use crate::inference::MetadataInferrer;
        use crate::metadata::{RawMetadata, TagRecord};

        struct PanickingInferrer;

        impl MetadataInferrer for PanickingInferrer {
            fn infer(&self, _raw: &RawMetadata) -> Result<TagRecord, InferenceError> {
                panic!("inferrer exploded");
            }
        }

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("01 - a.mp3");
        std::fs::write(&path, [0xFF_u8, 0xFB, 0x90, 0x00, 0, 0, 0, 0]).unwrap();

        let tagger = Tagger::new(Some(Arc::new(PanickingInferrer)));

        let descriptor =
            TaskDescriptor::new("https://x/watch?v=a", "a", dir.path(), Quality::AudioOnly, "");
        let engine = ScriptedEngine::new(vec![], Ok(Some(path)));
        let (events, mut rx) = EventSender::channel();
        let outcome = DownloadTask::new(descriptor, ControlFlags::new(), events, Arc::new(engine))
            .with_tagger(Some(tagger))
            .run();

        let mut collected = Vec::new();
        while let Ok(event) = rx.try_recv() {
            collected.push(event);
        }
        assert!(outcome.is_success());
        assert_eq!(history(&collected).len(), 1);
        assert!(matches!(collected.last(), Some(DownloadEvent::History(r)) if r.is_ok()));
        assert!(collected.iter().any(|e| matches!(
            e,
            DownloadEvent::Status { message, level: StatusLevel::Warning }
                if message == "Tagging failed: inferrer exploded"
        )));
    }

    #[test]
    fn test_engine_panic_is_contained() {
        let (outcome, events) =
            run_task(PanickingEngine, &ControlFlags::new(), AbortPrecedence::PauseFirst);
        assert_eq!(outcome, TaskOutcome::Failed("Unexpected error: boom".to_string()));
        assert_eq!(history(&events).len(), 1);
    }
}
