use super::etcdserverpb::watch_create_request::FilterType;
use super::etcdserverpb::watch_request::RequestUnion;
use super::etcdserverpb::WatchCancelRequest;
use super::etcdserverpb::WatchCreateRequest;
use super::etcdserverpb::WatchRequest;
use super::etcdserverpb::WatchResponse;
use crate::FilterKind;

impl WatchRequest {
    /// Build a create frame for `request`, resuming at `start_revision`
    ///
    /// The caller decides the revision: the original one on first creation,
    /// `last_delivered_revision + 1` when re-creating after a reconnect.
    pub fn create(
        request: &crate::WatchRequest,
        start_revision: i64,
    ) -> Self {
        let filters = request
            .filters
            .iter()
            .map(|f| match f {
                FilterKind::NoPut => FilterType::Noput as i32,
                FilterKind::NoDelete => FilterType::Nodelete as i32,
            })
            .collect();

        Self {
            request_union: Some(RequestUnion::CreateRequest(WatchCreateRequest {
                key: request.key.clone(),
                range_end: request.range_end.clone().unwrap_or_default(),
                start_revision,
                progress_notify: request.progress_notify,
                filters,
                prev_kv: request.prev_kv,
                watch_id: 0,
                fragment: false,
            })),
        }
    }

    /// Build a cancel frame for a server-assigned watch id
    pub fn cancel(server_watch_id: i64) -> Self {
        Self {
            request_union: Some(RequestUnion::CancelRequest(WatchCancelRequest {
                watch_id: server_watch_id,
            })),
        }
    }

    pub fn as_create(&self) -> Option<&WatchCreateRequest> {
        match &self.request_union {
            Some(RequestUnion::CreateRequest(create)) => Some(create),
            _ => None,
        }
    }

    pub fn as_cancel(&self) -> Option<&WatchCancelRequest> {
        match &self.request_union {
            Some(RequestUnion::CancelRequest(cancel)) => Some(cancel),
            _ => None,
        }
    }
}

impl WatchResponse {
    /// Compaction is signalled only through this dedicated field, never through
    /// `cancel_reason` text.
    pub fn compacted_revision(&self) -> Option<i64> {
        (self.compact_revision > 0).then_some(self.compact_revision)
    }

    pub fn header_revision(&self) -> i64 {
        self.header.map(|h| h.revision).unwrap_or_default()
    }
}
