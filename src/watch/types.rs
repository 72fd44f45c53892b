use bytes::Bytes;

use crate::proto::mvccpb;
use crate::utils::prefix_range_end;

/// Client-local watch identifier
///
/// Assigned once at creation and stable for the lifetime of the manager,
/// regardless of how many times the underlying stream is re-established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub(crate) u64);

impl WatchId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for WatchId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier assigned by the server in a create acknowledgement.
/// Only meaningful on the stream generation it was issued on.
pub type ServerWatchId = i64;

/// Event kinds a watch can ask the server to suppress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterKind {
    NoPut,
    NoDelete,
}

/// Subscription parameters of one logical watch
///
/// Immutable once handed to the manager; reconnects only ever change the
/// start revision sent on the wire, never this value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    pub key: Bytes,
    /// `None` watches the single `key`; `Some` watches `[key, range_end)`
    pub range_end: Option<Bytes>,
    /// 0 means "from now"
    pub start_revision: i64,
    pub filters: Vec<FilterKind>,
    pub progress_notify: bool,
    /// Ask the server to attach the previous key-value to each event
    pub prev_kv: bool,
}

impl WatchRequest {
    /// Watch a single key
    pub fn key(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: Bytes::copy_from_slice(key.as_ref()),
            range_end: None,
            start_revision: 0,
            filters: Vec::new(),
            progress_notify: false,
            prev_kv: false,
        }
    }

    /// Watch every key starting with `prefix`
    pub fn prefix(prefix: impl AsRef<[u8]>) -> Self {
        let prefix = prefix.as_ref();
        Self {
            range_end: Some(prefix_range_end(prefix)),
            ..Self::key(prefix)
        }
    }

    pub fn with_range_end(
        mut self,
        range_end: impl AsRef<[u8]>,
    ) -> Self {
        self.range_end = Some(Bytes::copy_from_slice(range_end.as_ref()));
        self
    }

    pub fn with_start_revision(
        mut self,
        revision: i64,
    ) -> Self {
        self.start_revision = revision.max(0);
        self
    }

    pub fn with_filter(
        mut self,
        filter: FilterKind,
    ) -> Self {
        if !self.filters.contains(&filter) {
            self.filters.push(filter);
        }
        self
    }

    pub fn with_progress_notify(
        mut self,
        enable: bool,
    ) -> Self {
        self.progress_notify = enable;
        self
    }

    pub fn with_prev_kv(
        mut self,
        enable: bool,
    ) -> Self {
        self.prev_kv = enable;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A single key change, decoded from the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub key: Bytes,
    /// Empty for deletes
    pub value: Bytes,
    pub mod_revision: i64,
    pub create_revision: i64,
    pub version: i64,
    /// Present only when the watch was created with `prev_kv`
    pub prev_value: Option<Bytes>,
}

impl From<mvccpb::Event> for Event {
    fn from(event: mvccpb::Event) -> Self {
        let kind = match mvccpb::event::EventType::try_from(event.r#type) {
            Ok(mvccpb::event::EventType::Delete) => EventKind::Delete,
            _ => EventKind::Put,
        };
        let kv = event.kv.unwrap_or_default();
        Self {
            kind,
            key: kv.key,
            value: kv.value,
            mod_revision: kv.mod_revision,
            create_revision: kv.create_revision,
            version: kv.version,
            prev_value: event.prev_kv.map(|prev| prev.value),
        }
    }
}

/// One server response demultiplexed to a single watch
///
/// This is the unit callbacks are invoked with. A response with no events is
/// a progress notification carrying only the cluster revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResponse {
    pub watch_id: WatchId,
    /// Cluster revision from the response header
    pub revision: i64,
    pub events: Vec<Event>,
}

impl WatchResponse {
    pub fn is_progress_notify(&self) -> bool {
        self.events.is_empty()
    }
}
