//! One-shot broadcast wake signal for parked waiters.
//!
//! Each held lock entry owns exactly one `Notifier`. Waiters subscribe while
//! the table mutex is held, so a fire can never slip between observing the
//! busy state and starting to wait. Firing consumes the notifier, which makes
//! a double fire unrepresentable.

use tokio::sync::watch;

/// Completion signal owned by a single lock-table entry.
#[derive(Debug)]
pub(crate) struct Notifier {
    tx: watch::Sender<bool>,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Notifier { tx }
    }

    /// Subscribe a waiter. Must be called under the same table mutex
    /// acquisition that observed the busy state.
    pub(crate) fn parked(&self) -> Parked {
        Parked {
            rx: self.tx.subscribe(),
        }
    }

    /// Wake every parked waiter at once.
    pub(crate) fn fire(self) {
        let _ = self.tx.send(true);
    }
}

/// A waiter's subscription to one notifier.
#[derive(Debug)]
pub(crate) struct Parked {
    rx: watch::Receiver<bool>,
}

impl Parked {
    /// Suspend until the owning notifier fires. Resolves immediately when the
    /// fire already happened.
    pub(crate) async fn wait(mut self) {
        let _ = self.rx.wait_for(|fired| *fired).await;
    }
}
