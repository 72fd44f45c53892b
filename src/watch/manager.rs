//! Watch manager: public handle plus the control task that owns the stream.
//!
//! ```text
//!  WatchManager (cloneable)          control task (one per manager)
//!  ───────────────────────           ─────────────────────────────────────
//!  watch()/cancel() ──Command──▶     WatchRegistry + WatchStreamHandle
//!                                        │  create/cancel frames
//!  EventStream / callback ◀──Sink──      ▼
//!                                    transport stream ◀── inbound frames
//! ```
//!
//! Only the control task writes the registry or touches the stream, so no lock
//! guards either. Public calls enqueue a [`Command`] and return immediately.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::registry::Ack;
use super::registry::WatchRegistry;
use super::registry::WatchRegistryEntry;
use super::sequence::EventStream;
use super::sequence::ResponseStream;
use super::sequence::WatchCanceller;
use super::sink::Delivery;
use super::sink::Sink;
use super::sink::WatchCallback;
use super::stream::WatchStreamHandle;
use super::Event;
use super::WatchId;
use super::WatchRequest;
use super::WatchResponse;
use crate::proto::etcdserverpb;
use crate::transport::WatchTransport;
use crate::Error;
use crate::Result;
use crate::WatchConfig;
use crate::WatchError;

/// Lifecycle of a manager's shared stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No stream yet, or every watch is gone
    Idle,
    /// Stream open and acknowledged
    Active,
    /// Re-opening the stream after a transport failure
    Reconnecting,
    /// Reconnection gave up; the manager accepts no new watches
    Failed,
    /// Shut down by the owner
    Closed,
}

impl ManagerState {
    pub fn is_usable(self) -> bool {
        !matches!(self, ManagerState::Failed | ManagerState::Closed)
    }
}

pub(crate) enum Command {
    Create {
        id: WatchId,
        request: WatchRequest,
        sink: Sink,
    },
    Cancel(WatchId),
}

/// Multiplexes any number of watches over one transport stream
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct WatchManager {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    state: watch::Receiver<ManagerState>,
    shutdown: CancellationToken,
    buffer_size: usize,
}

impl std::fmt::Debug for WatchManager {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchManager")
            .field("state", &*self.state.borrow())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl WatchManager {
    /// Start a manager and its control task on the current runtime
    pub fn new(
        transport: Arc<dyn WatchTransport>,
        config: WatchConfig,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ManagerState::Idle);
        let shutdown = CancellationToken::new();
        let buffer_size = config.watcher_buffer_size;

        let control = WatchControl {
            transport,
            config,
            registry: WatchRegistry::new(),
            stream: WatchStreamHandle::new(),
            commands: commands_rx,
            shutdown: shutdown.clone(),
            state: state_tx,
        };
        tokio::spawn(control.run());

        Self {
            commands: commands_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            state: state_rx,
            shutdown,
            buffer_size,
        }
    }

    pub fn state(&self) -> ManagerState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition
    pub fn subscribe_state(&self) -> watch::Receiver<ManagerState> {
        self.state.clone()
    }

    /// Register a watch delivering into `sink`. Returns without waiting for the
    /// server acknowledgement.
    pub(crate) fn create(
        &self,
        request: WatchRequest,
        sink: Sink,
    ) -> Result<WatchId> {
        if !self.state().is_usable() || self.shutdown.is_cancelled() {
            return Err(WatchError::ManagerClosed.into());
        }
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.commands
            .send(Command::Create { id, request, sink })
            .map_err(|_| Error::Watch(WatchError::ManagerClosed))?;
        trace!(watch_id = %id, "watch create queued");
        Ok(id)
    }

    /// Watch and consume events as a stream.
    ///
    /// The canceller may be moved to another task; dropping the stream cancels
    /// the watch as well.
    pub fn watch(
        &self,
        request: WatchRequest,
    ) -> Result<(EventStream, WatchCanceller)> {
        let (sink, rx, shared) = Sink::queue(self.buffer_size);
        let id = self.create(request, sink)?;
        let canceller = WatchCanceller::new(id, shared, self.commands.clone());
        Ok((EventStream::new(rx, canceller.clone()), canceller))
    }

    /// Watch and consume whole responses, progress notifications included
    pub fn watch_responses(
        &self,
        request: WatchRequest,
    ) -> Result<(ResponseStream, WatchCanceller)> {
        let (sink, rx, shared) = Sink::queue(self.buffer_size);
        let id = self.create(request, sink)?;
        let canceller = WatchCanceller::new(id, shared, self.commands.clone());
        Ok((ResponseStream::new(rx, canceller.clone()), canceller))
    }

    /// Register a callback invoked once per response, in order.
    ///
    /// A terminal error is passed to the callback once, after which it is not
    /// invoked again.
    pub fn watch_with_callback<F>(
        &self,
        request: WatchRequest,
        callback: F,
    ) -> Result<WatchCanceller>
    where
        F: Fn(std::result::Result<WatchResponse, WatchError>) + Send + Sync + 'static,
    {
        let callback: Arc<WatchCallback> = Arc::new(callback);
        let (sink, shared) = Sink::callback(callback);
        let id = self.create(request, sink)?;
        Ok(WatchCanceller::new(id, shared, self.commands.clone()))
    }

    /// Cancel a watch. Unknown, already canceled and post-shutdown ids are
    /// accepted silently.
    pub fn cancel(
        &self,
        id: WatchId,
    ) {
        let _ = self.commands.send(Command::Cancel(id));
    }

    /// Stop the control task. Every live watch receives
    /// [`WatchError::ManagerClosed`].
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the manager reaches `target`
    pub async fn wait_for_state(
        &self,
        target: ManagerState,
    ) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::Watch(WatchError::ManagerClosed))
    }
}

/// Why establishing a stream did not succeed
enum EstablishError {
    /// The stream could not be opened or broke before all acks arrived
    Connect(String),
    /// Opened, but the first batch of acks missed the deadline
    AckTimeout,
}

struct WatchControl {
    transport: Arc<dyn WatchTransport>,
    config: WatchConfig,
    registry: WatchRegistry,
    stream: WatchStreamHandle,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
    state: watch::Sender<ManagerState>,
}

impl WatchControl {
    async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.config.cancel_grace_period());
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        debug!("watch control task started");
        loop {
            let result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                frame = self.stream.next(), if self.stream.is_open() => match frame {
                    Ok(Some(frame)) => self.deliver(frame).await,
                    Ok(None) => Err(Error::Network(crate::NetworkError::StreamEnded)),
                    Err(e) => Err(e),
                },
                _ = sweep.tick() => {
                    self.sweep_canceled();
                    Ok(())
                }
            };

            if let Err(e) = result {
                warn!(generation = self.stream.generation(), error = %e, "watch stream failed");
                self.reconnect(e.to_string()).await;
            }

            if self.current_state() == ManagerState::Failed {
                break;
            }
        }

        self.close().await;
        debug!("watch control task stopped");
    }

    fn current_state(&self) -> ManagerState {
        *self.state.borrow()
    }

    fn set_state(
        &self,
        state: ManagerState,
    ) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "watch manager state changed");
        }
    }

    async fn handle_command(
        &mut self,
        command: Command,
    ) -> Result<()> {
        match command {
            Command::Create { id, request, sink } => self.handle_create(id, request, sink).await,
            Command::Cancel(id) => self.handle_cancel(id).await,
        }
    }

    async fn handle_create(
        &mut self,
        id: WatchId,
        request: WatchRequest,
        sink: Sink,
    ) -> Result<()> {
        let mut entry = WatchRegistryEntry::new(id, request, sink);
        if entry.sink.shared().is_canceled() {
            entry.sink.close();
            return Ok(());
        }

        match self.current_state() {
            ManagerState::Active => {
                self.registry.insert(entry);
                self.send_create(id).await
            }
            ManagerState::Idle => {
                self.registry.insert(entry);
                self.establish_fresh().await;
                Ok(())
            }
            _ => {
                entry.sink.fail(WatchError::ManagerClosed);
                Ok(())
            }
        }
    }

    async fn handle_cancel(
        &mut self,
        id: WatchId,
    ) -> Result<()> {
        let Some(entry) = self.registry.get_mut(id) else {
            trace!(watch_id = %id, "cancel for unknown watch ignored");
            return Ok(());
        };
        if entry.canceled {
            return Ok(());
        }

        entry.canceled = true;
        entry.canceled_at = Some(Instant::now());
        entry.sink.shared().mark_canceled();
        entry.sink.close();
        let server_id = entry.server_id;
        debug!(watch_id = %id, ?server_id, "watch canceled locally");

        match server_id {
            Some(server_id) => self.stream.send(etcdserverpb::WatchRequest::cancel(server_id)).await,
            // The cancel request goes out once the pending ack names a server id
            None if self.registry.is_pending(id) => Ok(()),
            None => {
                self.registry.remove(id);
                Ok(())
            }
        }
    }

    async fn send_create(
        &mut self,
        id: WatchId,
    ) -> Result<()> {
        let Some(entry) = self.registry.get(id) else {
            return Ok(());
        };
        let start_revision = entry.resume_revision();
        let frame = etcdserverpb::WatchRequest::create(&entry.request, start_revision);
        self.stream.send(frame).await?;
        self.registry.push_pending(id);
        debug!(
            watch_id = %id,
            start_revision,
            generation = self.stream.generation(),
            "watch create sent"
        );
        Ok(())
    }

    /// Route one inbound frame. Errors are stream-level and trigger a reconnect.
    async fn deliver(
        &mut self,
        frame: etcdserverpb::WatchResponse,
    ) -> Result<()> {
        let id = if frame.created {
            match self.registry.ack_create(frame.watch_id) {
                Ack::Bound(id) => {
                    trace!(watch_id = %id, server_watch_id = frame.watch_id, "watch acknowledged");
                    let canceled = self.registry.get(id).map(|e| e.canceled).unwrap_or(false);
                    if canceled && frame.watch_id >= 0 && !frame.canceled {
                        self.stream.send(etcdserverpb::WatchRequest::cancel(frame.watch_id)).await?;
                        return Ok(());
                    }
                    id
                }
                Ack::Orphaned => {
                    if frame.watch_id >= 0 && !frame.canceled {
                        debug!(server_watch_id = frame.watch_id, "cancelling orphaned server watch");
                        self.stream.send(etcdserverpb::WatchRequest::cancel(frame.watch_id)).await?;
                    }
                    return Ok(());
                }
                Ack::Duplicate => {
                    trace!(server_watch_id = frame.watch_id, "duplicate create ack ignored");
                    return Ok(());
                }
                Ack::Unexpected => {
                    warn!(server_watch_id = frame.watch_id, "create ack without pending create");
                    return Ok(());
                }
            }
        } else {
            match self.registry.resolve(frame.watch_id) {
                Some(id) => id,
                None => {
                    trace!(server_watch_id = frame.watch_id, "frame for unknown watch discarded");
                    return Ok(());
                }
            }
        };

        if let Some(compacted_revision) = frame.compacted_revision() {
            self.finish(id, WatchError::RevisionCompacted { compacted_revision });
            return Ok(());
        }

        if frame.canceled {
            return self.on_server_cancel(id, &frame.cancel_reason).await;
        }

        if frame.created && frame.events.is_empty() {
            return Ok(());
        }

        self.deliver_events(id, frame).await
    }

    async fn deliver_events(
        &mut self,
        id: WatchId,
        frame: etcdserverpb::WatchResponse,
    ) -> Result<()> {
        let revision = frame.header_revision();
        let Some(entry) = self.registry.get_mut(id) else {
            return Ok(());
        };
        if entry.canceled {
            return Ok(());
        }

        let is_progress = frame.events.is_empty();
        // Anything at or below the floor was already delivered on an earlier stream
        let floor = entry.last_delivered_revision;
        let events: Vec<Event> = frame
            .events
            .into_iter()
            .map(Event::from)
            .filter(|event| event.mod_revision > floor)
            .collect();

        if events.is_empty() && !is_progress {
            trace!(watch_id = %id, floor, "replayed events dropped");
            return Ok(());
        }

        if let Some(last) = events.last() {
            entry.last_delivered_revision = entry.last_delivered_revision.max(last.mod_revision);
            entry.server_cancels = 0;
        }

        let response = WatchResponse {
            watch_id: id,
            revision,
            events,
        };
        match entry.sink.deliver(response) {
            Delivery::Delivered => Ok(()),
            Delivery::Overflow => {
                let capacity = entry.sink.capacity().unwrap_or_default();
                warn!(watch_id = %id, capacity, "watch consumer fell behind");
                entry.sink.fail(WatchError::SlowConsumer { capacity });
                self.release(id).await
            }
            Delivery::Closed => {
                debug!(watch_id = %id, "watch consumer went away");
                entry.sink.shared().mark_canceled();
                self.handle_cancel(id).await
            }
        }
    }

    /// Server-side cancellation that was not asked for
    async fn on_server_cancel(
        &mut self,
        id: WatchId,
        reason: &str,
    ) -> Result<()> {
        let max_attempts = self.config.max_reconnect_attempts;
        let Some(entry) = self.registry.get_mut(id) else {
            return Ok(());
        };

        if entry.canceled {
            trace!(watch_id = %id, "cancel confirmed by server");
            self.registry.remove(id);
            return Ok(());
        }

        entry.server_cancels += 1;
        if entry.server_cancels > max_attempts {
            error!(watch_id = %id, reason = %reason, "watch repeatedly canceled by server");
            self.finish(
                id,
                WatchError::ConnectionFailed {
                    reason: format!("canceled by server: {reason}"),
                },
            );
            return Ok(());
        }

        warn!(watch_id = %id, reason = %reason, attempt = entry.server_cancels, "watch canceled by server, re-creating");
        self.registry.unbind(id);
        self.send_create(id).await
    }

    /// Deliver a terminal error and drop the entry
    fn finish(
        &mut self,
        id: WatchId,
        error: WatchError,
    ) {
        if let Some(mut entry) = self.registry.remove(id) {
            debug!(watch_id = %id, error = %error, "watch finished");
            entry.sink.fail(error);
        }
    }

    /// Stop a watch the consumer can no longer keep up with. The sink has
    /// already been failed.
    async fn release(
        &mut self,
        id: WatchId,
    ) -> Result<()> {
        let Some(entry) = self.registry.remove(id) else {
            return Ok(());
        };
        match entry.server_id {
            Some(server_id) => self.stream.send(etcdserverpb::WatchRequest::cancel(server_id)).await,
            // A pending create is cancelled as orphaned when its ack arrives
            None => Ok(()),
        }
    }

    fn sweep_canceled(&mut self) {
        let expired = self
            .registry
            .expired_cancels(Instant::now(), self.config.cancel_grace_period());
        for id in expired {
            debug!(watch_id = %id, "cancel not confirmed within grace period, dropping watch");
            self.registry.remove(id);
        }
    }

    /// Open a stream for a manager that has none and establish every entry.
    ///
    /// Failures stay scoped to the watches being established; the manager
    /// itself falls back to `Idle`.
    async fn establish_fresh(&mut self) {
        match self.establish().await {
            Ok(()) => {
                self.settle();
            }
            Err(EstablishError::Connect(reason)) => {
                warn!(reason = %reason, "initial watch stream could not be established");
                self.stream.close().await;
                for mut entry in self.registry.drain() {
                    entry.sink.fail(WatchError::ConnectionFailed { reason: reason.clone() });
                }
                self.set_state(ManagerState::Idle);
            }
            Err(EstablishError::AckTimeout) => {
                let timeout = self.config.establish_timeout();
                warn!(?timeout, "initial watch create not acknowledged in time");
                for id in self.registry.pending_ids() {
                    self.finish(id, WatchError::WatchTimedOut { timeout });
                }
                self.settle();
                if self.current_state() == ManagerState::Idle {
                    // Closing the stream drops any server watch a late ack would have named
                    self.stream.close().await;
                    self.reset_generation();
                }
            }
        }
    }

    /// Pick `Active` or `Idle` depending on whether any watch remains
    fn settle(&mut self) {
        if self.registry.live_ids().is_empty() {
            // Late acks on an empty stream are orphans; a new stream will be opened on demand
            self.set_state(ManagerState::Idle);
        } else {
            self.set_state(ManagerState::Active);
        }
    }

    /// Open a stream, reissue a create for every live entry and wait for the
    /// first batch of acks, all within `establish_timeout`
    async fn establish(&mut self) -> std::result::Result<(), EstablishError> {
        let deadline = Instant::now() + self.config.establish_timeout();

        let stream = match tokio::time::timeout_at(deadline, self.transport.open_stream()).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(EstablishError::Connect(e.to_string())),
            Err(_) => {
                return Err(EstablishError::Connect(format!(
                    "stream open timed out after {:?}",
                    self.config.establish_timeout()
                )))
            }
        };
        self.stream.replace(stream).await;
        self.reset_generation();

        for id in self.registry.live_ids() {
            if let Err(e) = self.send_create(id).await {
                return Err(EstablishError::Connect(e.to_string()));
            }
        }

        while self.registry.has_pending() {
            match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Ok(Ok(Some(frame))) => {
                    if let Err(e) = self.deliver(frame).await {
                        return Err(EstablishError::Connect(e.to_string()));
                    }
                }
                Ok(Ok(None)) => return Err(EstablishError::Connect("stream ended by server".to_string())),
                Ok(Err(e)) => return Err(EstablishError::Connect(e.to_string())),
                Err(_) => return Err(EstablishError::AckTimeout),
            }
        }

        info!(
            generation = self.stream.generation(),
            watches = self.registry.len(),
            "watch stream established"
        );
        Ok(())
    }

    /// Replace a broken stream and re-create every live watch, resuming after
    /// the last delivered revision
    async fn reconnect(
        &mut self,
        reason: String,
    ) {
        self.set_state(ManagerState::Reconnecting);
        self.stream.close().await;
        self.reset_generation();

        if self.registry.is_empty() {
            self.set_state(ManagerState::Idle);
            return;
        }

        let mut last_reason = reason;
        for attempt in 0..self.config.max_reconnect_attempts {
            let delay = self.config.reconnect_delay(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            debug!(attempt, ?delay, "reconnecting watch stream");

            match self.establish().await {
                Ok(()) => {
                    self.settle();
                    return;
                }
                Err(EstablishError::AckTimeout) => {
                    last_reason = format!(
                        "watch creates not acknowledged within {:?}",
                        self.config.establish_timeout()
                    );
                    break;
                }
                Err(EstablishError::Connect(reason)) => {
                    warn!(attempt, reason = %reason, "watch reconnect attempt failed");
                    last_reason = reason;
                    self.stream.close().await;
                    self.reset_generation();
                }
            }
        }

        error!(reason = %last_reason, "watch reconnection exhausted, manager failed");
        self.stream.close().await;
        self.set_state(ManagerState::Failed);
        for mut entry in self.registry.drain() {
            entry.sink.fail(WatchError::ConnectionFailed {
                reason: last_reason.clone(),
            });
        }
    }

    fn reset_generation(&mut self) {
        for mut entry in self.registry.reset_for_new_stream() {
            entry.sink.close();
        }
    }

    /// Release everything on the way out. Creates still queued are answered
    /// with `ManagerClosed` so no consumer mistakes shutdown for a clean end.
    async fn close(&mut self) {
        self.stream.close().await;
        if self.current_state() != ManagerState::Failed {
            self.set_state(ManagerState::Closed);
        }

        for mut entry in self.registry.drain() {
            entry.sink.fail(WatchError::ManagerClosed);
        }

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Create { mut sink, .. } = command {
                sink.fail(WatchError::ManagerClosed);
            }
        }
    }
}
