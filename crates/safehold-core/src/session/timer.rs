//! Cancellable one-shot timers delivered through the session event queue.

use super::{EventSender, SessionEvent};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Locks the session after inactivity.
    Lock,
    /// Blanks the clipboard after a copy.
    ClipboardClear,
}

/// A single scheduled action of one kind.
///
/// At most one deadline is pending at a time: arming again aborts the
/// previous sleep and bumps the generation, so a `TimerFired` that was
/// already queued for the old arming is rejected by [`PendingTimer::fire`].
#[derive(Debug)]
pub struct PendingTimer {
    kind: TimerKind,
    generation: u64,
    deadline: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

impl PendingTimer {
    pub fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            generation: 0,
            deadline: None,
            task: None,
        }
    }

    /// Schedule the timer `after` from now, replacing any pending deadline.
    pub fn arm(&mut self, after: Duration, events: &EventSender) -> Instant {
        self.cancel();

        let deadline = Instant::now() + after;
        let kind = self.kind;
        let generation = self.generation;
        let events = events.clone();

        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = events.send(SessionEvent::TimerFired { kind, generation });
        }));
        self.deadline = Some(deadline);

        tracing::debug!(?kind, generation, ?after, "Timer armed");
        deadline
    }

    /// Drop the pending deadline, if any. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.deadline.take().is_some() {
            tracing::debug!(kind = ?self.kind, generation = self.generation, "Timer cancelled");
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// Accept a `TimerFired` event. Returns `false` for stale generations.
    pub fn fire(&mut self, generation: u64) -> bool {
        if self.deadline.is_none() || generation != self.generation {
            tracing::debug!(kind = ?self.kind, generation, current = self.generation, "Ignoring stale timer");
            return false;
        }
        self.deadline = None;
        self.task = None;
        self.generation = self.generation.wrapping_add(1);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }
}

impl Drop for PendingTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    async fn next_fire(rx: &mut mpsc::UnboundedReceiver<SessionEvent>, within: Duration) -> Option<u64> {
        match timeout(within, rx.recv()).await {
            Ok(Some(SessionEvent::TimerFired { generation, .. })) => Some(generation),
            _ => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_at_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = PendingTimer::new(TimerKind::Lock);
        let start = Instant::now();
        let deadline = timer.arm(Duration::from_secs(60), &tx);
        assert_eq!(deadline, start + Duration::from_secs(60));

        let generation = next_fire(&mut rx, Duration::from_secs(61)).await.unwrap();
        assert!(Instant::now() >= deadline);
        assert!(timer.fire(generation));
        assert!(!timer.is_armed());
        assert!(!timer.fire(generation), "a delivered timer must not fire twice");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = PendingTimer::new(TimerKind::ClipboardClear);
        timer.arm(Duration::from_secs(5), &tx);
        timer.cancel();

        assert_eq!(next_fire(&mut rx, Duration::from_secs(30)).await, None);
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_rejects_the_earlier_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = PendingTimer::new(TimerKind::Lock);
        timer.arm(Duration::from_secs(10), &tx);
        let stale = timer.generation;

        tokio::time::advance(Duration::from_secs(5)).await;
        timer.arm(Duration::from_secs(10), &tx);

        // Simulate an event for the first arming that was already in flight.
        assert!(!timer.fire(stale));

        assert_eq!(next_fire(&mut rx, Duration::from_secs(4)).await, None);
        let generation = next_fire(&mut rx, Duration::from_secs(7)).await.unwrap();
        assert!(timer.fire(generation));
    }
}
