use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;
use tracing::warn;

use super::WatchResponse;
use crate::WatchError;

/// Callback invoked once per response, or once with the terminal error
pub type WatchCallback = dyn Fn(Result<WatchResponse, WatchError>) + Send + Sync + 'static;

/// State shared between a registry entry and its consumer
///
/// The canceled flag is the fast half of cancellation: the consumer side flips it
/// without waiting for the control task, which performs the serialized removal.
#[derive(Debug, Default)]
pub(crate) struct WatchShared {
    canceled: AtomicBool,
    terminal: Mutex<Option<WatchError>>,
}

impl WatchShared {
    /// Returns `true` if this call flipped the flag
    pub(crate) fn mark_canceled(&self) -> bool {
        !self.canceled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub(crate) fn terminal(&self) -> Option<WatchError> {
        self.terminal.lock().clone()
    }

    /// First writer wins; a locally canceled watch never records an error.
    fn set_terminal(
        &self,
        error: WatchError,
    ) -> bool {
        if self.is_canceled() {
            return false;
        }
        let mut slot = self.terminal.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(error);
        true
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// The bounded queue is full; the consumer is not keeping up
    Overflow,
    /// The consumer is gone
    Closed,
}

/// Where a watch's responses go
pub(crate) enum Sink {
    Queue {
        tx: Option<mpsc::Sender<WatchResponse>>,
        capacity: usize,
        shared: Arc<WatchShared>,
    },
    Callback {
        tx: Option<mpsc::UnboundedSender<Result<WatchResponse, WatchError>>>,
        shared: Arc<WatchShared>,
    },
}

impl Sink {
    /// Bounded queue sink plus the receiving half for a sequence adapter
    pub(crate) fn queue(capacity: usize) -> (Self, mpsc::Receiver<WatchResponse>, Arc<WatchShared>) {
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(WatchShared::default());
        let sink = Sink::Queue {
            tx: Some(tx),
            capacity,
            shared: shared.clone(),
        };
        (sink, rx, shared)
    }

    /// Callback sink with its own worker.
    ///
    /// The worker is an async task; each invocation runs on the blocking pool
    /// and is awaited before the next one starts.
    pub(crate) fn callback(callback: Arc<WatchCallback>) -> (Self, Arc<WatchShared>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Result<WatchResponse, WatchError>>();
        let shared = Arc::new(WatchShared::default());
        let worker_shared = shared.clone();

        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                if worker_shared.is_canceled() {
                    break;
                }
                let callback = callback.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || callback(item)).await {
                    warn!(error = %e, "watch callback panicked");
                    break;
                }
            }
            trace!("watch callback worker exited");
        });

        let sink = Sink::Callback {
            tx: Some(tx),
            shared: shared.clone(),
        };
        (sink, shared)
    }

    pub(crate) fn shared(&self) -> &Arc<WatchShared> {
        match self {
            Sink::Queue { shared, .. } => shared,
            Sink::Callback { shared, .. } => shared,
        }
    }

    pub(crate) fn deliver(
        &mut self,
        response: WatchResponse,
    ) -> Delivery {
        match self {
            Sink::Queue { tx, .. } => {
                let Some(sender) = tx else {
                    return Delivery::Closed;
                };
                match sender.try_send(response) {
                    Ok(()) => Delivery::Delivered,
                    Err(TrySendError::Full(_)) => Delivery::Overflow,
                    Err(TrySendError::Closed(_)) => Delivery::Closed,
                }
            }
            Sink::Callback { tx, .. } => {
                let Some(sender) = tx else {
                    return Delivery::Closed;
                };
                match sender.send(Ok(response)) {
                    Ok(()) => Delivery::Delivered,
                    Err(_) => Delivery::Closed,
                }
            }
        }
    }

    /// Report a terminal error and stop delivering.
    ///
    /// Queued responses stay readable; the error surfaces after them.
    pub(crate) fn fail(
        &mut self,
        error: WatchError,
    ) {
        match self {
            Sink::Queue { tx, shared, .. } => {
                shared.set_terminal(error);
                tx.take();
            }
            Sink::Callback { tx, shared, .. } => {
                if shared.set_terminal(error.clone()) {
                    if let Some(sender) = tx.take() {
                        let _ = sender.send(Err(error));
                    }
                }
                tx.take();
            }
        }
    }

    /// Stop delivering without an error
    pub(crate) fn close(&mut self) {
        match self {
            Sink::Queue { tx, .. } => {
                tx.take();
            }
            Sink::Callback { tx, .. } => {
                tx.take();
            }
        }
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        match self {
            Sink::Queue { capacity, .. } => Some(*capacity),
            Sink::Callback { .. } => None,
        }
    }
}
