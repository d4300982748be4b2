//! Observable session attributes.

use tokio::sync::watch;

/// A value with change notification.
///
/// Subscribers are only woken when the value actually changes, so a view
/// that writes back the value it was just notified about does not bounce
/// the notification again.
#[derive(Debug)]
pub struct Property<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Property<T> {
    pub fn new(value: T) -> Self {
        let (tx, _rx) = watch::channel(value);
        Self { tx }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Store `value`; returns `true` if it differed from the current one.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}
