//! Periodic background save trigger.

use super::{EventSender, SessionEvent};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Fixed interval between autosave ticks.
pub const AUTOSAVE_PERIOD: Duration = Duration::from_secs(30);

/// What a single autosave tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveOutcome {
    /// The session is locked or destroyed.
    Inactive,
    /// Saving automatically is turned off.
    Disabled,
    /// Nothing to save.
    Clean,
    /// A save is still running.
    AlreadySaving,
    /// A background save was started.
    Started,
}

/// Recurring task that posts `AutosaveTick` events.
///
/// The task only enqueues ticks; deciding whether to save happens on the
/// event loop, so a slow save never blocks the loop.
#[derive(Debug, Default)]
pub struct AutosaveLoop {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl AutosaveLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking. Restarts the loop if it was already running.
    pub fn start(&mut self, events: &EventSender) {
        self.stop();

        let generation = self.generation;
        let events = events.clone();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + AUTOSAVE_PERIOD, AUTOSAVE_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if events.send(SessionEvent::AutosaveTick { generation }).is_err() {
                    break;
                }
            }
        }));
        tracing::debug!(generation, "Autosave loop started");
    }

    /// Stop ticking. Ticks already queued become stale.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!(generation = self.generation, "Autosave loop stopped");
        }
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Whether a tick of `generation` belongs to the running loop.
    pub fn accepts(&self, generation: u64) -> bool {
        self.task.is_some() && generation == self.generation
    }
}

impl Drop for AutosaveLoop {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
