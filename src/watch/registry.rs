use std::collections::HashMap;
use std::collections::VecDeque;

use tokio::time::Instant;

use super::sink::Sink;
use super::ServerWatchId;
use super::WatchId;
use super::WatchRequest;

/// Subscriber state of one logical watch, owned by the control task
pub(crate) struct WatchRegistryEntry {
    pub(crate) id: WatchId,
    pub(crate) request: WatchRequest,
    /// `None` while (re)establishing on the current stream generation
    pub(crate) server_id: Option<ServerWatchId>,
    pub(crate) sink: Sink,
    /// Highest mod_revision handed to the sink; 0 until the first event
    pub(crate) last_delivered_revision: i64,
    pub(crate) canceled: bool,
    pub(crate) canceled_at: Option<Instant>,
    /// Consecutive server-initiated cancellations without an event in between
    pub(crate) server_cancels: u32,
}

impl WatchRegistryEntry {
    pub(crate) fn new(
        id: WatchId,
        request: WatchRequest,
        sink: Sink,
    ) -> Self {
        Self {
            id,
            request,
            server_id: None,
            sink,
            last_delivered_revision: 0,
            canceled: false,
            canceled_at: None,
            server_cancels: 0,
        }
    }

    /// Revision to put on the wire when (re)creating this watch
    pub(crate) fn resume_revision(&self) -> i64 {
        if self.last_delivered_revision > 0 {
            self.last_delivered_revision + 1
        } else {
            self.request.start_revision
        }
    }
}

/// Outcome of matching a create acknowledgement against the pending queue
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Ack {
    /// Bound to a registered watch
    Bound(WatchId),
    /// The watch this ack belongs to is gone; the server id is orphaned
    Orphaned,
    /// The server id is already bound on this generation
    Duplicate,
    /// No create is waiting for an ack
    Unexpected,
}

/// `WatchId -> entry` plus the reverse index for demultiplexing
///
/// Creates are acknowledged by the server in the order they were sent on a
/// stream, so outstanding creates are tracked as a FIFO.
#[derive(Default)]
pub(crate) struct WatchRegistry {
    entries: HashMap<WatchId, WatchRegistryEntry>,
    by_server_id: HashMap<ServerWatchId, WatchId>,
    pending_creates: VecDeque<WatchId>,
}

impl WatchRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &mut self,
        entry: WatchRegistryEntry,
    ) {
        self.entries.insert(entry.id, entry);
    }

    pub(crate) fn get(
        &self,
        id: WatchId,
    ) -> Option<&WatchRegistryEntry> {
        self.entries.get(&id)
    }

    pub(crate) fn get_mut(
        &mut self,
        id: WatchId,
    ) -> Option<&mut WatchRegistryEntry> {
        self.entries.get_mut(&id)
    }

    pub(crate) fn contains(
        &self,
        id: WatchId,
    ) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn resolve(
        &self,
        server_id: ServerWatchId,
    ) -> Option<WatchId> {
        self.by_server_id.get(&server_id).copied()
    }

    /// Record that a create for `id` was written to the stream
    pub(crate) fn push_pending(
        &mut self,
        id: WatchId,
    ) {
        self.pending_creates.push_back(id);
    }

    pub(crate) fn is_pending(
        &self,
        id: WatchId,
    ) -> bool {
        self.pending_creates.contains(&id)
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending_creates.is_empty()
    }

    /// Pending creates whose watch is still registered
    pub(crate) fn pending_ids(&self) -> Vec<WatchId> {
        self.pending_creates
            .iter()
            .copied()
            .filter(|id| self.entries.contains_key(id))
            .collect()
    }

    /// Match a create acknowledgement carrying `server_id`.
    ///
    /// A negative id means the server rejected the create; the pending slot is
    /// consumed but nothing is bound.
    pub(crate) fn ack_create(
        &mut self,
        server_id: ServerWatchId,
    ) -> Ack {
        if self.by_server_id.contains_key(&server_id) {
            return Ack::Duplicate;
        }
        let Some(id) = self.pending_creates.pop_front() else {
            return Ack::Unexpected;
        };
        let Some(entry) = self.entries.get_mut(&id) else {
            return Ack::Orphaned;
        };
        if server_id >= 0 {
            entry.server_id = Some(server_id);
            self.by_server_id.insert(server_id, id);
        }
        Ack::Bound(id)
    }

    /// Forget the server id of `id` so a new create can be issued for it
    pub(crate) fn unbind(
        &mut self,
        id: WatchId,
    ) {
        if let Some(entry) = self.entries.get_mut(&id) {
            if let Some(server_id) = entry.server_id.take() {
                self.by_server_id.remove(&server_id);
            }
        }
    }

    /// Remove an entry and its reverse mapping.
    ///
    /// A create still in flight keeps its pending slot so the late ack is
    /// recognised as orphaned.
    pub(crate) fn remove(
        &mut self,
        id: WatchId,
    ) -> Option<WatchRegistryEntry> {
        let entry = self.entries.remove(&id)?;
        if let Some(server_id) = entry.server_id {
            self.by_server_id.remove(&server_id);
        }
        Some(entry)
    }

    /// Drop all per-generation state ahead of a new stream.
    ///
    /// Locally canceled entries have nothing left to wait for and are returned
    /// to the caller for disposal.
    pub(crate) fn reset_for_new_stream(&mut self) -> Vec<WatchRegistryEntry> {
        self.by_server_id.clear();
        self.pending_creates.clear();

        let canceled: Vec<WatchId> = self.entries.values().filter(|e| e.canceled).map(|e| e.id).collect();
        for entry in self.entries.values_mut() {
            entry.server_id = None;
        }
        canceled.into_iter().filter_map(|id| self.entries.remove(&id)).collect()
    }

    /// Ids of entries that still want events, in creation order
    pub(crate) fn live_ids(&self) -> Vec<WatchId> {
        let mut ids: Vec<WatchId> = self.entries.values().filter(|e| !e.canceled).map(|e| e.id).collect();
        ids.sort();
        ids
    }

    /// Canceled entries whose confirmation did not arrive within `grace`
    pub(crate) fn expired_cancels(
        &self,
        now: Instant,
        grace: std::time::Duration,
    ) -> Vec<WatchId> {
        self.entries
            .values()
            .filter(|e| matches!(e.canceled_at, Some(at) if now.duration_since(at) >= grace))
            .map(|e| e.id)
            .collect()
    }

    /// Remove every entry
    pub(crate) fn drain(&mut self) -> Vec<WatchRegistryEntry> {
        self.by_server_id.clear();
        self.pending_creates.clear();
        let mut entries: Vec<WatchRegistryEntry> = self.entries.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|e| e.id);
        entries
    }
}
