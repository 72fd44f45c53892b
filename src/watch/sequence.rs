use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use tokio::sync::mpsc;
use tracing::trace;

use super::manager::Command;
use super::sink::WatchShared;
use super::Event;
use super::WatchId;
use super::WatchResponse;
use crate::WatchError;

/// Cancels one watch
///
/// Cloneable and callable from any task. Cancellation is idempotent: only the
/// first call reaches the manager.
#[derive(Clone)]
pub struct WatchCanceller {
    id: WatchId,
    shared: Arc<WatchShared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for WatchCanceller {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchCanceller")
            .field("id", &self.id)
            .field("canceled", &self.shared.is_canceled())
            .finish()
    }
}

impl WatchCanceller {
    pub(crate) fn new(
        id: WatchId,
        shared: Arc<WatchShared>,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self { id, shared, commands }
    }

    pub fn id(&self) -> WatchId {
        self.id
    }

    pub fn is_canceled(&self) -> bool {
        self.shared.is_canceled()
    }

    pub fn cancel(&self) {
        if self.shared.mark_canceled() {
            trace!(watch_id = %self.id, "watch cancel requested");
            // A closed manager has already released the watch
            let _ = self.commands.send(Command::Cancel(self.id));
        }
    }
}

/// Receiving side shared by both sequence flavours
struct SinkReceiver {
    rx: mpsc::Receiver<WatchResponse>,
    canceller: WatchCanceller,
}

impl SinkReceiver {
    fn poll_response(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<WatchResponse, WatchError>>> {
        // Eager cutoff: nothing queued is handed out after a local cancel
        if self.canceller.shared.is_canceled() {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(response)) => Poll::Ready(Some(Ok(response))),
            Poll::Ready(None) => {
                if self.canceller.shared.is_canceled() {
                    return Poll::Ready(None);
                }
                Poll::Ready(self.canceller.shared.terminal().map(Err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SinkReceiver {
    fn drop(&mut self) {
        self.canceller.cancel();
    }
}

/// Lazy sequence of events for one watch
///
/// Ends (`None`) only after a local cancel. A terminal failure such as
/// [`WatchError::RevisionCompacted`] is yielded after any queued events and then
/// again on every later poll, so it cannot be mistaken for a clean end.
/// Dropping the stream cancels the watch.
pub struct EventStream {
    receiver: SinkReceiver,
    buffered: VecDeque<Event>,
}

impl EventStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<WatchResponse>,
        canceller: WatchCanceller,
    ) -> Self {
        Self {
            receiver: SinkReceiver { rx, canceller },
            buffered: VecDeque::new(),
        }
    }

    pub fn id(&self) -> WatchId {
        self.receiver.canceller.id
    }

    /// A handle that can cancel this watch from elsewhere
    pub fn canceller(&self) -> WatchCanceller {
        self.receiver.canceller.clone()
    }

    pub fn cancel(&self) {
        self.receiver.canceller.cancel();
    }
}

impl Stream for EventStream {
    type Item = Result<Event, WatchError>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.receiver.canceller.shared.is_canceled() {
                this.buffered.clear();
                return Poll::Ready(None);
            }
            if let Some(event) = this.buffered.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            match this.receiver.poll_response(cx) {
                // Progress notifications carry no events and are skipped here
                Poll::Ready(Some(Ok(response))) => this.buffered.extend(response.events),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Like [`EventStream`], but yields whole responses including progress
/// notifications
pub struct ResponseStream {
    receiver: SinkReceiver,
}

impl ResponseStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<WatchResponse>,
        canceller: WatchCanceller,
    ) -> Self {
        Self {
            receiver: SinkReceiver { rx, canceller },
        }
    }

    pub fn id(&self) -> WatchId {
        self.receiver.canceller.id
    }

    pub fn canceller(&self) -> WatchCanceller {
        self.receiver.canceller.clone()
    }

    pub fn cancel(&self) {
        self.receiver.canceller.cancel();
    }
}

impl Stream for ResponseStream {
    type Item = Result<WatchResponse, WatchError>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_response(cx)
    }
}
