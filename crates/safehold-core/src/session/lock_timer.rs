//! Idle lock countdown.

use super::timer::{PendingTimer, TimerKind};
use super::EventSender;
use std::time::Duration;
use tokio::time::Instant;

/// Countdown that locks the session when no activity is reported.
///
/// A timeout of `None` disables auto-lock: `touch` then only cancels.
#[derive(Debug)]
pub struct LockTimer {
    timer: PendingTimer,
    timeout: Option<Duration>,
}

impl LockTimer {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timer: PendingTimer::new(TimerKind::Lock),
            timeout,
        }
    }

    /// Restart the countdown from now.
    pub fn touch(&mut self, events: &EventSender) {
        match self.timeout {
            Some(timeout) => {
                self.timer.arm(timeout, events);
            }
            None => self.timer.cancel(),
        }
    }

    /// Stop counting without rescheduling.
    pub fn disable(&mut self) {
        self.timer.cancel();
    }

    /// Accept an expiry event; `true` means the session should lock now.
    pub fn expire(&mut self, generation: u64) -> bool {
        self.timer.fire(generation)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }
}
