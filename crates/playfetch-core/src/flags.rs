//! Shared pause/cancel flags observed by every in-flight download.
//!
//! The flags act as a cooperative cancellation token: the coordinator writes
//! them in response to user actions, tasks only read them from inside their
//! progress callback. Clones share the same underlying state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Which flag wins when a task aborts with both `pause` and `cancel` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AbortPrecedence {
    /// Report "Paused." when both flags are set. A cancel issued while paused
    /// is therefore reported as a pause.
    #[default]
    PauseFirst,
    /// Report "Cancelled." when both flags are set.
    CancelFirst,
}

/// Point-in-time copy of both flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagSnapshot {
    /// Cancellation requested.
    pub cancel: bool,
    /// Pause requested.
    pub pause: bool,
}

impl FlagSnapshot {
    /// Whether a running task should abort.
    #[must_use]
    pub const fn should_abort(self) -> bool {
        self.cancel || self.pause
    }
}

/// Process-wide control flags shared by reference across tasks.
#[derive(Debug, Clone, Default)]
pub struct ControlFlags {
    cancel: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
}

impl ControlFlags {
    /// Create a new pair of cleared flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read both flags.
    #[must_use]
    pub fn snapshot(&self) -> FlagSnapshot {
        FlagSnapshot {
            cancel: self.cancel.load(Ordering::SeqCst),
            pause: self.pause.load(Ordering::SeqCst),
        }
    }

    /// Whether a running task should abort at its next progress callback.
    #[must_use]
    pub fn should_abort(&self) -> bool {
        self.snapshot().should_abort()
    }

    /// Whether cancellation is requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Whether a pause is requested.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Clear both flags at the start of a fresh batch.
    pub(crate) fn reset(&self) {
        self.cancel.store(false, Ordering::SeqCst);
        self.pause.store(false, Ordering::SeqCst);
    }

    pub(crate) fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_pause(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    /// Cancel stays set until the next [`reset`](Self::reset).
    pub(crate) fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_flags_are_clear() {
        let flags = ControlFlags::new();
        assert_eq!(flags.snapshot(), FlagSnapshot::default());
        assert!(!flags.should_abort());
    }

    #[test]
    fn test_clones_share_state() {
        let flags = ControlFlags::new();
        let observer = flags.clone();

        flags.request_pause();
        assert!(observer.is_paused());
        assert!(observer.should_abort());

        flags.clear_pause();
        assert!(!observer.should_abort());
    }

    #[test]
    fn test_cancel_is_sticky_until_reset() {
        let flags = ControlFlags::new();
        flags.request_cancel();
        flags.clear_pause();
        assert!(flags.is_cancelled());

        flags.reset();
        assert!(!flags.is_cancelled());
        assert!(!flags.is_paused());
    }

    #[test]
    fn test_precedence_defaults_to_pause_first() {
        assert_eq!(AbortPrecedence::default(), AbortPrecedence::PauseFirst);
        let parsed: AbortPrecedence = serde_json::from_str("\"cancel_first\"").unwrap();
        assert_eq!(parsed, AbortPrecedence::CancelFirst);
    }
}
