//! Clipboard writes with timed clearing.

use super::timer::{PendingTimer, TimerKind};
use super::EventSender;
use crate::manager::DatabaseManager;
use crate::reference;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// A clipboard the session can write to.
pub trait Clipboard: Send {
    fn set_text(&mut self, text: &str) -> anyhow::Result<()>;

    fn clear(&mut self) -> anyhow::Result<()>;
}

/// Process-local clipboard, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    contents: Arc<Mutex<Option<String>>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current text, `None` when empty.
    pub fn contents(&self) -> Option<String> {
        self.contents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Clipboard for MemoryClipboard {
    fn set_text(&mut self, text: &str) -> anyhow::Result<()> {
        *self
            .contents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(text.to_string());
        Ok(())
    }

    fn clear(&mut self) -> anyhow::Result<()> {
        *self
            .contents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}

/// Resolves references, writes the clipboard and owns the clear timer.
#[derive(Debug)]
pub struct ClipboardCoordinator<C> {
    clipboard: C,
    timer: PendingTimer,
    delay: Option<Duration>,
}

impl<C: Clipboard> ClipboardCoordinator<C> {
    /// `delay` of `None` never clears automatically.
    pub fn new(clipboard: C, delay: Option<Duration>) -> Self {
        Self {
            clipboard,
            timer: PendingTimer::new(TimerKind::ClipboardClear),
            delay,
        }
    }

    /// Copy `text` with references resolved and restart the clear countdown.
    ///
    /// Only the most recent successful copy decides when the clipboard is
    /// blanked. A failed write leaves the previous clear scheduled, since the
    /// old contents are still on the clipboard.
    pub fn copy<D>(&mut self, text: &str, db: &D, events: &EventSender) -> anyhow::Result<()>
    where
        D: DatabaseManager + ?Sized,
    {
        let resolved = reference::resolve(text, db);
        self.clipboard.set_text(&resolved)?;

        self.timer.cancel();
        if let Some(delay) = self.delay {
            self.timer.arm(delay, events);
        }
        Ok(())
    }

    /// Blank the clipboard now and drop any pending clear.
    pub fn clear(&mut self) {
        self.timer.cancel();
        if let Err(e) = self.clipboard.clear() {
            tracing::warn!("Failed to clear clipboard: {:#}", e);
        }
    }

    /// Handle the clear timer firing. Stale generations are ignored.
    pub fn on_timer(&mut self, generation: u64) -> bool {
        if !self.timer.fire(generation) {
            return false;
        }
        tracing::debug!("Clearing clipboard after timeout");
        if let Err(e) = self.clipboard.clear() {
            tracing::warn!("Failed to clear clipboard: {:#}", e);
        }
        true
    }

    pub fn clear_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }
}
