//! Terminal rendering of coordinator events and interactive commands.

use std::collections::HashMap;

use playfetch_core::{DownloadEvent, HistoryRecord, ItemState, StatusLevel};

/// Progress lines are printed when an item crosses one of these steps.
const PROGRESS_STEP: u8 = 10;

/// A command typed while downloads run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Cancel,
    Summary,
    Quit,
    /// Standard input ended; nothing can resume a pause any more.
    InputClosed,
}

impl Command {
    /// Parse one input line. Unknown input yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "p" | "pause" => Some(Self::Pause),
            "r" | "resume" => Some(Self::Resume),
            "c" | "cancel" => Some(Self::Cancel),
            "s" | "status" => Some(Self::Summary),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Outcome counts, one per item, using each item's latest record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub ok: usize,
    pub failed: usize,
    pub paused: usize,
    pub cancelled: usize,
}

impl Tally {
    fn count(&mut self, error: Option<&str>) {
        match error {
            None => self.ok += 1,
            Some("Paused.") => self.paused += 1,
            Some("Cancelled.") => self.cancelled += 1,
            Some(_) => self.failed += 1,
        }
    }

    /// Whether every recorded task succeeded.
    pub const fn all_ok(&self) -> bool {
        self.failed == 0 && self.paused == 0 && self.cancelled == 0
    }
}

impl std::fmt::Display for Tally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} downloaded, {} failed, {} paused, {} cancelled",
            self.ok, self.failed, self.paused, self.cancelled
        )
    }
}

/// Turns coordinator events into printable lines.
#[derive(Debug, Default)]
pub struct Console {
    printed_step: HashMap<String, u8>,
    latest: HashMap<String, Option<String>>,
}

impl Console {
    /// Lines to print for `event`, if any.
    pub fn render(&mut self, event: &DownloadEvent) -> Option<String> {
        match event {
            DownloadEvent::Status { message, level } => Some(format!("{} {message}", marker(*level))),
            DownloadEvent::Progress { key, percent } => {
                let step = percent - percent % PROGRESS_STEP;
                let last = self.printed_step.insert(key.clone(), step);
                (last != Some(step) && *percent < 100).then(|| format!("  [{key}] {percent}%"))
            }
            DownloadEvent::Finished { .. } => None,
            DownloadEvent::History(record) => {
                self.remember(record);
                record
                    .error
                    .as_ref()
                    .map(|error| format!("  [{}] {error}", record.key))
            }
        }
    }

    fn remember(&mut self, record: &HistoryRecord) {
        self.latest.insert(record.key.clone(), record.error.clone());
    }

    /// Counts so far.
    pub fn tally(&self) -> Tally {
        let mut tally = Tally::default();
        for error in self.latest.values() {
            tally.count(error.as_deref());
        }
        tally
    }

    /// Forget printed progress so a resumed item reports again.
    pub fn reset_progress(&mut self) {
        self.printed_step.clear();
    }
}

const fn marker(level: StatusLevel) -> &'static str {
    match level {
        StatusLevel::Info => "·",
        StatusLevel::Success => "✓",
        StatusLevel::Warning => "!",
        StatusLevel::Error => "✗",
    }
}

/// One listing line per item: position, selection, progress and title.
pub fn item_line(item: &ItemState, width: usize) -> String {
    let check = if item.selected { "x" } else { " " };
    format!(
        "{:>width$}. [{check}] {:>3}%  {}",
        item.ordinal, item.percent, item.title
    )
}
