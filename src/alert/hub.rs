use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{AlertSink, FallAlert};

/// Alerts buffered per listener before new ones are dropped for it.
pub const LISTENER_QUEUE_DEPTH: usize = 16;

/// Fan-out of alerts to zero or more connected listeners.
///
/// Each listener owns a bounded queue. Publishing never blocks: a full queue
/// loses the alert for that listener only, a dropped subscription is pruned.
#[derive(Clone, Default)]
pub struct AlertHub {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

struct Listener {
    tx: SyncSender<FallAlert>,
    /// Shared with the subscription; a count of one means it was dropped.
    alive: Arc<()>,
}

impl Listener {
    fn is_dropped(&self) -> bool {
        Arc::strong_count(&self.alive) == 1
    }
}

impl AlertHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> AlertSubscription {
        let (tx, rx) = mpsc::sync_channel(LISTENER_QUEUE_DEPTH);
        let alive = Arc::new(());
        self.lock_listeners().push(Listener {
            tx,
            alive: alive.clone(),
        });
        AlertSubscription { rx, _alive: alive }
    }

    /// Live subscriptions. Dropped ones are pruned here as well as on publish.
    pub fn listener_count(&self) -> usize {
        let mut listeners = self.lock_listeners();
        listeners.retain(|listener| !listener.is_dropped());
        listeners.len()
    }

    /// Push an alert to every live listener. Returns how many received it.
    pub fn publish(&self, alert: &FallAlert) -> usize {
        let mut delivered = 0;
        self.lock_listeners().retain(|listener| match listener.tx.try_send(alert.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                log::warn!("alert listener queue full; alert dropped for that listener");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        delivered
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<Listener>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AlertSink for AlertHub {
    fn notify(&mut self, alert: &FallAlert) {
        let delivered = self.publish(alert);
        log::debug!("fall alert delivered to {} listener(s)", delivered);
    }
}

/// Receiving end held by one listener.
pub struct AlertSubscription {
    rx: Receiver<FallAlert>,
    _alive: Arc<()>,
}

impl AlertSubscription {
    pub fn try_recv(&self) -> Option<FallAlert> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout`. `Disconnected` once every hub handle is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<FallAlert, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}
