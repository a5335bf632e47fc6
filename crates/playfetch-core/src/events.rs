//! Events flowing from download tasks to the coordinator.
//!
//! Tasks hold an [`EventSender`] and never touch shared state directly; the
//! coordinator's single consumer applies events serially.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::history::HistoryRecord;

/// Severity of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    /// Informational.
    Info,
    /// Something finished well.
    Success,
    /// Non-fatal problem.
    Warning,
    /// Failure.
    Error,
}

impl std::fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Event types emitted by download tasks and the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DownloadEvent {
    /// Human-readable status text.
    Status {
        /// Message text.
        message: String,
        /// Severity.
        level: StatusLevel,
    },
    /// Per-item progress.
    Progress {
        /// Item key.
        key: String,
        /// Progress, 0-100.
        percent: u8,
    },
    /// An item's file finished downloading.
    Finished {
        /// Item key.
        key: String,
        /// Resolved output filename.
        filename: String,
    },
    /// Terminal outcome record of one task.
    History(HistoryRecord),
}

impl DownloadEvent {
    /// Build a status event.
    pub fn status(message: impl Into<String>, level: StatusLevel) -> Self {
        Self::Status {
            message: message.into(),
            level,
        }
    }
}

/// Cloneable producer side of the event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<DownloadEvent>,
}

impl EventSender {
    /// Wrap a raw channel sender.
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<DownloadEvent>) -> Self {
        Self { tx }
    }

    /// Create a connected sender/receiver pair.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Send an event. A closed consumer is not an error for producers.
    pub fn send(&self, event: DownloadEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event consumer closed; dropping event");
        }
    }

    /// Send a status message.
    pub fn status(&self, message: impl Into<String>, level: StatusLevel) {
        self.send(DownloadEvent::status(message, level));
    }

    /// Send a progress update.
    pub fn progress(&self, key: &str, percent: u8) {
        self.send(DownloadEvent::Progress {
            key: key.to_string(),
            percent,
        });
    }

    /// Send a completion event.
    pub fn finished(&self, key: &str, filename: &str) {
        self.send(DownloadEvent::Finished {
            key: key.to_string(),
            filename: filename.to_string(),
        });
    }

    /// Send a history record.
    pub fn history(&self, record: HistoryRecord) {
        self.send(DownloadEvent::History(record));
    }
}
