//! Screensaver / idle signal sources.

use super::{EventSender, SessionEvent};
use std::sync::{Arc, Mutex};

/// A system signal that reports when the screensaver becomes active.
///
/// While subscribed, a source posts `ScreenSaverActive` events to the
/// session. The session subscribes while unlocked and unsubscribes on lock
/// and shutdown.
pub trait IdleSource: Send {
    fn subscribe(&mut self, events: EventSender) -> anyhow::Result<()>;

    fn unsubscribe(&mut self) -> anyhow::Result<()>;
}

/// Source for platforms without a screensaver signal.
#[derive(Debug, Default)]
pub struct NoIdleSource;

impl IdleSource for NoIdleSource {
    fn subscribe(&mut self, _events: EventSender) -> anyhow::Result<()> {
        Ok(())
    }

    fn unsubscribe(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Source driven by hand, e.g. from a frontend command.
#[derive(Debug, Clone, Default)]
pub struct ManualIdleSource {
    sink: Arc<Mutex<Option<EventSender>>>,
}

impl ManualIdleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self) -> bool {
        self.sink
            .lock()
            .map(|sink| sink.is_some())
            .unwrap_or(false)
    }

    /// Report a screensaver state change. Returns `false` if nobody listens.
    pub fn set_active(&self, active: bool) -> bool {
        let sink = self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match sink.as_ref() {
            Some(events) => events.send(SessionEvent::ScreenSaverActive(active)).is_ok(),
            None => false,
        }
    }
}

impl IdleSource for ManualIdleSource {
    fn subscribe(&mut self, events: EventSender) -> anyhow::Result<()> {
        *self.sink.lock().map_err(|_| anyhow::anyhow!("idle source poisoned"))? = Some(events);
        Ok(())
    }

    fn unsubscribe(&mut self) -> anyhow::Result<()> {
        self.sink
            .lock()
            .map_err(|_| anyhow::anyhow!("idle source poisoned"))?
            .take();
        Ok(())
    }
}
