//! Session settings read from the user's configuration.

use crate::models::SortOrder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings the session consumes. Owned by the frontend's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Minutes of inactivity before the database locks. `0` disables auto-lock.
    #[serde(default = "default_lock_timeout_minutes")]
    pub lock_timeout_minutes: u32,
    /// Seconds before copied values are cleared. `0` keeps them.
    #[serde(default = "default_clear_clipboard_seconds")]
    pub clear_clipboard_seconds: u32,
    /// Save dirty databases in the background and when locking.
    #[serde(default = "default_save_automatically")]
    pub save_automatically: bool,
    /// Ordering of group listings.
    #[serde(default)]
    pub sort_order: SortOrder,
}

fn default_lock_timeout_minutes() -> u32 {
    5
}

fn default_clear_clipboard_seconds() -> u32 {
    30
}

fn default_save_automatically() -> bool {
    true
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            lock_timeout_minutes: default_lock_timeout_minutes(),
            clear_clipboard_seconds: default_clear_clipboard_seconds(),
            save_automatically: default_save_automatically(),
            sort_order: SortOrder::default(),
        }
    }
}

impl SessionSettings {
    /// Idle time before locking, `None` when auto-lock is off.
    pub fn lock_timeout(&self) -> Option<Duration> {
        (self.lock_timeout_minutes > 0)
            .then(|| Duration::from_secs(u64::from(self.lock_timeout_minutes) * 60))
    }

    /// Delay before clearing the clipboard, `None` when it is never cleared.
    pub fn clipboard_clear_delay(&self) -> Option<Duration> {
        (self.clear_clipboard_seconds > 0)
            .then(|| Duration::from_secs(u64::from(self.clear_clipboard_seconds)))
    }
}
