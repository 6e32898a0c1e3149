use tokio::sync::broadcast;
use tracing::debug;

const SIGNAL_CAPACITY: usize = 16;

/// Process-level events that may trigger revalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The window (or terminal) regained focus.
    Focus,
    /// Network connectivity came back.
    Reconnect,
}

/// Fan-out hub for [`Signal`]s. Subscriptions that opted in listen until they are dropped.
#[derive(Debug, Clone)]
pub struct RevalidationSignals {
    tx: broadcast::Sender<Signal>,
}

impl Default for RevalidationSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl RevalidationSignals {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self { tx }
    }

    /// Returns how many listeners received the signal.
    pub fn emit(&self, signal: Signal) -> usize {
        let delivered = self.tx.send(signal).unwrap_or(0);
        debug!("{signal:?} delivered to {delivered} listeners");
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.tx.subscribe()
    }
}
