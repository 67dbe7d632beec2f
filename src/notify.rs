//! Status-change notification (§9: prefer a single-subscriber channel over
//! a broadcast bus). Consumers that need to react to pool/session changes
//! watch a `()` signal rather than receiving a copy of the changed record.

use tokio::sync::watch;

/// Sender half, held by the component that mutates state.
#[derive(Clone)]
pub struct Notifier {
    tx: watch::Sender<u64>,
}

/// Receiver half. Cloning is cheap; each clone tracks its own last-seen tick.
#[derive(Clone)]
pub struct Subscription {
    rx: watch::Receiver<u64>,
}

impl Notifier {
    pub fn new() -> (Self, Subscription) {
        let (tx, rx) = watch::channel(0);
        (Self { tx }, Subscription { rx })
    }

    /// Bump the tick, waking any subscriber blocked in `changed`.
    pub fn notify(&self) {
        self.tx.send_modify(|tick| *tick = tick.wrapping_add(1));
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new().0
    }
}

impl Subscription {
    /// Suspend until the next [`Notifier::notify`] call.
    pub async fn changed(&mut self) {
        let _ = self.rx.changed().await;
    }
}
