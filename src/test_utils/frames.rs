use bytes::Bytes;

use crate::proto::etcdserverpb::ResponseHeader;
use crate::proto::etcdserverpb::WatchResponse;
use crate::proto::mvccpb;
use crate::WatchConfig;

/// Watch settings with timeouts short enough for unit tests
pub(crate) fn test_watch_config() -> WatchConfig {
    WatchConfig {
        watcher_buffer_size: 16,
        establish_timeout_ms: 500,
        max_reconnect_attempts: 3,
        reconnect_base_delay_ms: 10,
        reconnect_max_delay_ms: 40,
        cancel_grace_period_ms: 200,
    }
}

pub(crate) fn put_event(
    key: &str,
    value: &str,
    mod_revision: i64,
) -> mvccpb::Event {
    mvccpb::Event {
        r#type: mvccpb::event::EventType::Put as i32,
        kv: Some(mvccpb::KeyValue {
            key: Bytes::copy_from_slice(key.as_bytes()),
            value: Bytes::copy_from_slice(value.as_bytes()),
            create_revision: mod_revision,
            mod_revision,
            version: 1,
            lease: 0,
        }),
        prev_kv: None,
    }
}

pub(crate) fn delete_event(
    key: &str,
    mod_revision: i64,
) -> mvccpb::Event {
    mvccpb::Event {
        r#type: mvccpb::event::EventType::Delete as i32,
        kv: Some(mvccpb::KeyValue {
            key: Bytes::copy_from_slice(key.as_bytes()),
            mod_revision,
            ..Default::default()
        }),
        prev_kv: None,
    }
}

fn header(revision: i64) -> Option<ResponseHeader> {
    Some(ResponseHeader {
        revision,
        ..Default::default()
    })
}

pub(crate) fn created_frame(server_id: i64) -> WatchResponse {
    WatchResponse {
        header: header(1),
        watch_id: server_id,
        created: true,
        ..Default::default()
    }
}

pub(crate) fn events_frame(
    server_id: i64,
    events: Vec<mvccpb::Event>,
) -> WatchResponse {
    let revision = events
        .iter()
        .filter_map(|e| e.kv.as_ref().map(|kv| kv.mod_revision))
        .max()
        .unwrap_or(1);
    WatchResponse {
        header: header(revision),
        watch_id: server_id,
        events,
        ..Default::default()
    }
}

pub(crate) fn progress_frame(
    server_id: i64,
    revision: i64,
) -> WatchResponse {
    WatchResponse {
        header: header(revision),
        watch_id: server_id,
        ..Default::default()
    }
}

pub(crate) fn canceled_frame(
    server_id: i64,
    reason: &str,
) -> WatchResponse {
    WatchResponse {
        header: header(1),
        watch_id: server_id,
        canceled: true,
        cancel_reason: reason.to_string(),
        ..Default::default()
    }
}

pub(crate) fn compacted_frame(
    server_id: i64,
    compact_revision: i64,
) -> WatchResponse {
    WatchResponse {
        header: header(compact_revision),
        watch_id: server_id,
        canceled: true,
        compact_revision,
        cancel_reason: "mvcc: required revision has been compacted".to_string(),
        ..Default::default()
    }
}
