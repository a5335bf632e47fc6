//! Batch coordinator.
//!
//! The [`Coordinator`] owns the control flags, the worker pool and the item
//! registry. User intents (fetch, start, pause, resume, cancel) become flag
//! writes and task submissions; a single event-loop task consumes what the
//! tasks emit, updates item progress, appends history and forwards events to
//! subscribers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock, mpsc};
use tracing::{debug, error, info, warn};

use crate::descriptor::{DEFAULT_OUTPUT_TEMPLATE, Quality, TaskDescriptor, ordinal_template};
use crate::engine::{DEFAULT_SOCKET_TIMEOUT, DownloadEngine};
use crate::error::{EngineError, Error, Result};
use crate::events::{DownloadEvent, EventSender, StatusLevel};
use crate::flags::{AbortPrecedence, ControlFlags};
use crate::history::{HISTORY_FILE_NAME, HistoryLog, HistoryRecord};
use crate::inference::Tagger;
use crate::item::{ItemRegistry, ItemState, MediaInfo};
use crate::pool::{DEFAULT_CONCURRENCY, JobHandle, WorkerPool};
use crate::task::{DownloadTask, TaskOutcome};

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Initial pool size (clamped to 1-8).
    pub concurrency: usize,
    /// Base output template; each item's name is prefixed with its ordinal.
    pub output_template: String,
    /// Engine socket timeout.
    pub socket_timeout: Duration,
    /// Which flag wins when both are set at abort time.
    pub abort_precedence: AbortPrecedence,
    /// History file name inside each destination folder.
    pub history_file_name: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            output_template: DEFAULT_OUTPUT_TEMPLATE.to_string(),
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            abort_precedence: AbortPrecedence::default(),
            history_file_name: HISTORY_FILE_NAME.to_string(),
        }
    }
}

/// Lifecycle of the current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    /// No batch has been started since the last fetch.
    Idle,
    /// Tasks are in flight and no stop was requested.
    Running,
    /// Pause or cancel was requested; in-flight tasks are winding down.
    Draining,
    /// Every submitted task has reported its history record.
    Complete,
}

/// Parameters of the last started batch, replayed by resume.
#[derive(Debug, Clone)]
struct BatchParams {
    folder: PathBuf,
    quality: Quality,
    template: String,
}

/// One item picked for submission.
struct PendingItem {
    key: String,
    url: String,
    ordinal: usize,
}

/// Submitted tasks of one `start` or `resume` call.
#[derive(Debug)]
pub struct BatchHandle {
    jobs: Vec<(String, JobHandle<TaskOutcome>)>,
}

impl BatchHandle {
    /// Number of submitted tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether nothing was submitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Keys of the submitted items, in submission order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.jobs.iter().map(|(key, _)| key.as_str())
    }

    /// Wait for every task and collect its outcome by key.
    ///
    /// Task outcomes are available before the event loop has necessarily
    /// consumed their events; use [`Coordinator::wait_idle`] for that.
    pub async fn join(self) -> Vec<(String, Result<TaskOutcome>)> {
        let mut outcomes = Vec::with_capacity(self.jobs.len());
        for (key, job) in self.jobs {
            outcomes.push((key, job.join().await));
        }
        outcomes
    }
}

/// State shared with the event loop.
struct Shared {
    registry: RwLock<ItemRegistry>,
    history: HistoryLog,
    in_flight: AtomicUsize,
    /// Submitted tasks per item key, until their history record is consumed.
    running: Mutex<HashMap<String, usize>>,
    idle: Notify,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<DownloadEvent>>>,
}

impl Shared {
    fn forward(&self, event: &DownloadEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn running(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_running(&self, key: &str) {
        *self.running().entry(key.to_string()).or_insert(0) += 1;
    }

    fn mark_stopped(&self, key: &str) {
        let mut running = self.running();
        if let Some(count) = running.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                running.remove(key);
            }
        }
    }

    fn is_running(&self, key: &str) -> bool {
        self.running().contains_key(key)
    }

    fn forward_status(&self, message: String, level: StatusLevel) {
        log_status(&message, level);
        self.forward(&DownloadEvent::status(message, level));
    }

    async fn apply(&self, event: DownloadEvent) {
        match &event {
            DownloadEvent::Status { message, level } => {
                log_status(message, *level);
                self.forward(&event);
            }
            DownloadEvent::Progress { key, percent } => {
                if !self.registry.write().await.set_progress(key, *percent) {
                    debug!("Progress for unknown item '{}' ignored", key);
                }
                self.forward(&event);
            }
            DownloadEvent::Finished { key, filename } => {
                if !self.registry.write().await.set_progress(key, 100) {
                    debug!("Completion for unknown item '{}' ignored", key);
                }
                self.forward(&event);
                let name = Path::new(filename)
                    .file_name()
                    .map_or_else(|| filename.clone(), |n| n.to_string_lossy().into_owned());
                self.forward_status(format!("Finished: {name}"), StatusLevel::Success);
            }
            DownloadEvent::History(record) => {
                self.persist(record).await;
                self.forward(&event);
                self.mark_stopped(&record.key);
                self.task_done();
            }
        }
    }

    async fn persist(&self, record: &HistoryRecord) {
        let history = self.history.clone();
        let owned = record.clone();
        let written = tokio::task::spawn_blocking(move || history.append(&owned))
            .await
            .map_err(|e| Error::Pool(e.to_string()))
            .and_then(|result| result);
        if let Err(e) = written {
            self.forward_status(format!("History write failed: {e}"), StatusLevel::Warning);
        }
    }

    fn task_done(&self) {
        let previous = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous <= 1 {
            info!("All submitted downloads have finished");
            self.idle.notify_waiters();
        }
    }
}

fn log_status(message: &str, level: StatusLevel) {
    match level {
        StatusLevel::Error => error!("{}", message),
        StatusLevel::Warning => warn!("{}", message),
        StatusLevel::Info | StatusLevel::Success => info!("{}", message),
    }
}

async fn run_event_loop(mut rx: mpsc::UnboundedReceiver<DownloadEvent>, shared: Arc<Shared>) {
    while let Some(event) = rx.recv().await {
        shared.apply(event).await;
    }
    debug!("Event loop stopped");
}

/// Orchestrates fetching, selection and concurrent downloads.
///
/// Must be created inside a tokio runtime.
pub struct Coordinator {
    engine: Arc<dyn DownloadEngine>,
    tagger: Option<Tagger>,
    config: CoordinatorConfig,
    flags: ControlFlags,
    pool: WorkerPool,
    events: EventSender,
    shared: Arc<Shared>,
    batch: RwLock<Option<BatchParams>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("flags", &self.flags)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Create a coordinator and start its event loop.
    #[must_use]
    pub fn new(engine: Arc<dyn DownloadEngine>, config: CoordinatorConfig) -> Self {
        let (events, rx) = EventSender::channel();
        let shared = Arc::new(Shared {
            registry: RwLock::new(ItemRegistry::default()),
            history: HistoryLog::new(config.history_file_name.clone()),
            in_flight: AtomicUsize::new(0),
            running: Mutex::new(HashMap::new()),
            idle: Notify::new(),
            subscribers: Mutex::new(Vec::new()),
        });
        tokio::spawn(run_event_loop(rx, Arc::clone(&shared)));

        Self {
            engine,
            tagger: None,
            pool: WorkerPool::new(config.concurrency),
            config,
            flags: ControlFlags::new(),
            events,
            shared,
            batch: RwLock::new(None),
        }
    }

    /// Retag audio-only downloads with `tagger`.
    #[must_use]
    pub fn with_tagger(mut self, tagger: Option<Tagger>) -> Self {
        self.tagger = tagger;
        self
    }

    /// Receive every event the coordinator processes, after it was applied.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DownloadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Shared control flags (read-only view for callers).
    #[must_use]
    pub const fn flags(&self) -> &ControlFlags {
        &self.flags
    }

    /// History log used for persisted records.
    #[must_use]
    pub fn history(&self) -> &HistoryLog {
        &self.shared.history
    }

    /// Fetch flat info for `url` and rebuild the item registry from it.
    pub async fn fetch(&self, url: &str) -> Result<MediaInfo> {
        let url = url.trim().to_string();
        if url.is_empty() {
            return Err(Error::InvalidUrl("URL is empty".to_string()));
        }

        self.events.status("Fetching info…", StatusLevel::Info);
        let engine = Arc::clone(&self.engine);
        let info = tokio::task::spawn_blocking(move || engine.fetch_info(&url))
            .await
            .map_err(|e| EngineError::Other(format!("Info fetch failed: {e}")))??;

        self.load(&info).await;
        Ok(info)
    }

    /// Replace the registry with the entries of `info`.
    ///
    /// Forgets the previous batch, so resume needs a new start first.
    pub async fn load(&self, info: &MediaInfo) {
        if self.shared.in_flight.load(Ordering::SeqCst) > 0 {
            warn!("Loading new entries while downloads are still running");
        }
        let registry = ItemRegistry::from_entries(info.entries.clone());
        let count = registry.len();
        *self.shared.registry.write().await = registry;
        *self.batch.write().await = None;
        self.events
            .status(format!("Loaded {count} item(s)."), StatusLevel::Info);
    }

    /// Snapshot of all items in playlist order.
    pub async fn items(&self) -> Vec<ItemState> {
        self.shared.registry.read().await.iter().cloned().collect()
    }

    /// Snapshot of one item.
    pub async fn item(&self, key: &str) -> Option<ItemState> {
        self.shared.registry.read().await.get(key).cloned()
    }

    /// Items whose label contains `text`, case-insensitively.
    pub async fn filter(&self, text: &str) -> Vec<ItemState> {
        self.shared
            .registry
            .read()
            .await
            .filter(text)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Check or uncheck one item.
    pub async fn set_selected(&self, key: &str, selected: bool) -> Result<()> {
        if self
            .shared
            .registry
            .write()
            .await
            .set_selected(key, selected)
        {
            Ok(())
        } else {
            Err(Error::UnknownItem(key.to_string()))
        }
    }

    /// Select all items, or deselect all if every item is selected.
    /// Returns the new selection state.
    pub async fn toggle_select_all(&self) -> bool {
        self.shared.registry.write().await.toggle_select_all()
    }

    /// Change the number of concurrent downloads (clamped to 1-8).
    pub fn set_concurrency(&self, requested: usize) -> usize {
        let applied = self.pool.resize(requested);
        info!("Concurrency set to {}", applied);
        applied
    }

    /// Current number of concurrent downloads.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.pool.size()
    }

    /// Tasks submitted whose history record has not been consumed yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Current batch state.
    pub async fn batch_state(&self) -> BatchState {
        if self.batch.read().await.is_none() {
            return BatchState::Idle;
        }
        if self.in_flight() == 0 {
            BatchState::Complete
        } else if self.flags.should_abort() {
            BatchState::Draining
        } else {
            BatchState::Running
        }
    }

    /// Wait until every submitted task's history record has been consumed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Start downloading the selected items into `folder`.
    ///
    /// Resets both flags and the selected items' progress. Each item's
    /// output name is prefixed with its zero-padded playlist position.
    pub async fn start(&self, folder: impl Into<PathBuf>, quality: Quality) -> Result<BatchHandle> {
        let folder = folder.into();
        {
            let registry = self.shared.registry.read().await;
            if registry.is_empty() {
                return Err(Error::NothingFetched);
            }
            if registry.selected().is_empty() {
                return Err(Error::NoItemsSelected);
            }
        }
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| Error::FileSystem {
                path: folder.clone(),
                message: format!("Failed to create download folder: {e}"),
            })?;

        let (pending, width) = {
            let mut registry = self.shared.registry.write().await;
            let pending = to_pending(registry.selected());
            if pending.is_empty() {
                return Err(Error::NoItemsSelected);
            }
            registry.reset_selected_progress();
            (pending, registry.ordinal_width())
        };

        self.flags.reset();
        let params = BatchParams {
            folder,
            quality,
            template: self.config.output_template.clone(),
        };
        *self.batch.write().await = Some(params.clone());

        self.events.status(
            format!(
                "Starting downloads ({} item(s)) with concurrency = {}…",
                pending.len(),
                self.concurrency()
            ),
            StatusLevel::Info,
        );
        self.submit(pending, &params, width)
    }

    /// Ask running tasks to stop at their next progress report.
    ///
    /// Partial files stay in place for [`Coordinator::resume`].
    pub fn pause(&self) {
        self.flags.request_pause();
        self.events.status(
            "Pause requested. Current tasks will stop safely; resume will continue.",
            StatusLevel::Warning,
        );
    }

    /// Clear `pause` and resubmit the selected items that are not complete.
    ///
    /// Uses the folder, quality and per-item names of the last start, so the
    /// engine continues partial files. `cancel` stays as it is. Returns
    /// `None` when nothing needs resuming.
    ///
    /// While a pause is in effect, waits for the tasks it stops to drain
    /// first, so no item ever has two downloads running. Items whose task
    /// is still running are not resubmitted.
    pub async fn resume(&self) -> Result<Option<BatchHandle>> {
        let params = self.batch.read().await.clone().ok_or(Error::NoBatch)?;
        if self.flags.is_paused() && self.in_flight() > 0 {
            self.events.status(
                "Waiting for paused downloads to stop…",
                StatusLevel::Info,
            );
            self.wait_idle().await;
        }
        self.flags.clear_pause();

        let (pending, width) = {
            let registry = self.shared.registry.read().await;
            let incomplete = registry
                .incomplete_selected()
                .into_iter()
                .filter(|item| !self.shared.is_running(&item.key))
                .collect();
            (to_pending(incomplete), registry.ordinal_width())
        };
        if pending.is_empty() {
            self.events.status(
                "Nothing to resume; all selected items appear complete.",
                StatusLevel::Info,
            );
            return Ok(None);
        }
        if self.flags.is_cancelled() {
            self.events.status(
                "The batch was cancelled; resumed tasks will stop immediately. Start a new batch instead.",
                StatusLevel::Warning,
            );
        }

        self.events.status(
            format!("Resuming {} item(s)…", pending.len()),
            StatusLevel::Info,
        );
        self.submit(pending, &params, width).map(Some)
    }

    /// Ask running tasks to stop; the batch is abandoned.
    pub fn cancel(&self) {
        self.flags.request_cancel();
        self.events.status(
            "Cancellation requested. Active tasks will terminate shortly.",
            StatusLevel::Warning,
        );
    }

    /// Best-effort stop before exit.
    pub fn shutdown(&self) {
        info!("Shutting down coordinator");
        self.flags.request_cancel();
    }

    fn submit(
        &self,
        pending: Vec<PendingItem>,
        params: &BatchParams,
        width: usize,
    ) -> Result<BatchHandle> {
        let mut jobs = Vec::with_capacity(pending.len());
        for item in pending {
            let descriptor = TaskDescriptor::new(
                item.url,
                item.key.clone(),
                params.folder.clone(),
                params.quality.clone(),
                &ordinal_template(&params.template, item.ordinal, width),
            );
            let task = DownloadTask::new(
                descriptor,
                self.flags.clone(),
                self.events.clone(),
                Arc::clone(&self.engine),
            )
            .with_tagger(self.tagger.clone())
            .with_precedence(self.config.abort_precedence)
            .with_socket_timeout(self.config.socket_timeout);

            self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
            self.shared.mark_running(&item.key);
            match self.pool.submit(move || task.run()) {
                Ok(job) => jobs.push((item.key, job)),
                Err(e) => {
                    self.shared.mark_stopped(&item.key);
                    self.shared.task_done();
                    return Err(e);
                }
            }
        }
        debug!("Submitted {} task(s)", jobs.len());
        Ok(BatchHandle { jobs })
    }
}

fn to_pending(items: Vec<&ItemState>) -> Vec<PendingItem> {
    items
        .into_iter()
        .filter_map(|item| {
            item.url.as_ref().map(|url| PendingItem {
                key: item.key.clone(),
                url: url.clone(),
                ordinal: item.ordinal,
            })
        })
        .collect()
}
