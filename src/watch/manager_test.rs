use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio::time::Instant;
use tracing_test::traced_test;

use super::*;
use crate::test_utils::*;
use crate::transport::MockWatchTransport;
use crate::Error;
use crate::WatchError;

async fn next_item<S, T>(stream: &mut S) -> Option<T>
where
    S: futures::Stream<Item = T> + Unpin,
{
    timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stream produced nothing")
}

fn setup() -> (WatchManager, FakeServer) {
    let (transport, server) = fake_transport();
    (WatchManager::new(transport, test_watch_config()), server)
}

/// Open the first watch on a fresh manager and acknowledge it with `server_id`
async fn establish(
    server: &mut FakeServer,
    server_id: i64,
) -> FakeConnection {
    let mut conn = server.accept().await;
    conn.expect_create().await;
    conn.send(created_frame(server_id));
    conn
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_put_then_cancel_terminates_cleanly() {
    let (manager, mut server) = setup();

    let (mut events, canceller) = manager.watch(WatchRequest::key("/x")).unwrap();
    let mut conn = server.accept().await;
    let create = conn.expect_create().await;
    assert_eq!(create.key, Bytes::from_static(b"/x"));
    assert_eq!(create.start_revision, 0);
    conn.send(created_frame(0));

    conn.send(events_frame(0, vec![put_event("/x", "1", 5)]));
    let event = next_item(&mut events).await.unwrap().unwrap();
    assert_eq!(event.kind, EventKind::Put);
    assert_eq!(event.key, Bytes::from_static(b"/x"));
    assert_eq!(event.value, Bytes::from_static(b"1"));
    assert_eq!(event.mod_revision, 5);

    canceller.cancel();
    assert!(next_item(&mut events).await.is_none());
    assert!(next_item(&mut events).await.is_none());
    assert_eq!(conn.expect_cancel().await.watch_id, 0);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_double_cancel_sends_one_cancel_request() {
    let (manager, mut server) = setup();

    let (_events, canceller) = manager.watch(WatchRequest::key("/x")).unwrap();
    let mut conn = establish(&mut server, 4).await;

    canceller.cancel();
    canceller.cancel();
    manager.cancel(canceller.id());

    assert_eq!(conn.expect_cancel().await.watch_id, 4);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(conn.try_next_request().is_none());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_compaction_yields_one_sticky_error_and_discards_late_events() {
    let (manager, mut server) = setup();

    let request = WatchRequest::key("/x").with_start_revision(2);
    let (mut events, _canceller) = manager.watch(request).unwrap();
    let conn = establish(&mut server, 0).await;

    conn.send(compacted_frame(0, 10));
    conn.send(events_frame(0, vec![put_event("/x", "late", 11)]));

    let expected = WatchError::RevisionCompacted { compacted_revision: 10 };
    assert_eq!(next_item(&mut events).await, Some(Err(expected.clone())));
    assert_eq!(next_item(&mut events).await, Some(Err(expected)));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_compaction_of_one_watch_leaves_sibling_running() {
    let (manager, mut server) = setup();

    let (mut a, _ca) = manager.watch(WatchRequest::key("/a").with_start_revision(1)).unwrap();
    let mut conn = establish(&mut server, 0).await;

    let (mut b, _cb) = manager.watch(WatchRequest::key("/b")).unwrap();
    conn.expect_create().await;
    conn.send(created_frame(1));

    conn.send(compacted_frame(0, 7));
    conn.send(events_frame(1, vec![put_event("/b", "1", 8)]));
    conn.send(events_frame(1, vec![put_event("/b", "2", 9)]));

    assert!(matches!(
        next_item(&mut a).await,
        Some(Err(WatchError::RevisionCompacted { compacted_revision: 7 }))
    ));
    assert_eq!(next_item(&mut b).await.unwrap().unwrap().mod_revision, 8);
    assert_eq!(next_item(&mut b).await.unwrap().unwrap().mod_revision, 9);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_reconnect_resumes_after_last_delivered_revision() {
    let (manager, mut server) = setup();

    let (mut events, _canceller) = manager.watch(WatchRequest::key("/x").with_start_revision(3)).unwrap();
    let mut conn = establish(&mut server, 0).await;
    conn.send(events_frame(0, vec![put_event("/x", "a", 5)]));
    assert_eq!(next_item(&mut events).await.unwrap().unwrap().mod_revision, 5);

    conn.fail(tonic::Status::unavailable("link down"));

    let mut conn = server.accept().await;
    let create = conn.expect_create().await;
    assert_eq!(create.start_revision, 6);
    conn.send(created_frame(9));
    conn.send(events_frame(9, vec![put_event("/x", "b", 6)]));

    assert_eq!(next_item(&mut events).await.unwrap().unwrap().mod_revision, 6);
    assert_eq!(manager.state(), ManagerState::Active);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_reconnect_without_delivery_reuses_original_start_revision() {
    let (manager, mut server) = setup();

    let (_events, _canceller) = manager.watch(WatchRequest::key("/x").with_start_revision(3)).unwrap();
    let mut conn = establish(&mut server, 0).await;

    conn.hang_up();

    let mut conn = server.accept().await;
    assert_eq!(conn.expect_create().await.start_revision, 3);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_revisions_strictly_increase_across_repeated_failures() {
    let (manager, mut server) = setup();

    let (mut events, _canceller) = manager.watch(WatchRequest::prefix("/k/")).unwrap();
    let mut conn = establish(&mut server, 0).await;
    let mut server_id = 0;
    let mut next_revision = 2;
    let mut seen = Vec::new();

    for round in 0..3 {
        for _ in 0..3 {
            let key = format!("/k/{next_revision}");
            conn.send(events_frame(server_id, vec![put_event(&key, "v", next_revision)]));
            next_revision += 1;
        }
        for _ in 0..3 {
            seen.push(next_item(&mut events).await.unwrap().unwrap().mod_revision);
        }

        conn.fail(tonic::Status::unavailable(format!("failure {round}")));
        conn = server.accept().await;
        let create = conn.expect_create().await;
        assert_eq!(create.start_revision, next_revision);

        server_id += 1;
        conn.send(created_frame(server_id));
        // A misbehaving server replays history the client already has
        conn.send(events_frame(
            server_id,
            vec![put_event("/k/old", "v", next_revision - 2), put_event("/k/old", "v", next_revision - 1)],
        ));
    }

    conn.send(events_frame(server_id, vec![put_event("/k/new", "v", next_revision)]));
    seen.push(next_item(&mut events).await.unwrap().unwrap().mod_revision);

    assert!(seen.windows(2).all(|w| w[0] < w[1]), "revisions not increasing: {seen:?}");
    assert_eq!(seen.len(), 10);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_events_sharing_a_revision_are_all_delivered() {
    let (manager, mut server) = setup();

    let (mut events, _canceller) = manager.watch(WatchRequest::prefix("/t/")).unwrap();
    let conn = establish(&mut server, 0).await;

    conn.send(events_frame(0, vec![put_event("/t/a", "1", 4), put_event("/t/b", "1", 4)]));

    assert_eq!(next_item(&mut events).await.unwrap().unwrap().key, Bytes::from_static(b"/t/a"));
    assert_eq!(next_item(&mut events).await.unwrap().unwrap().key, Bytes::from_static(b"/t/b"));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_initial_open_failure_is_scoped_to_pending_watch() {
    let mut transport = MockWatchTransport::new();
    transport
        .expect_open_stream()
        .times(1)
        .returning(|| Err(tonic::Status::unavailable("no route").into()));
    let manager = WatchManager::new(Arc::new(transport), test_watch_config());

    let (mut events, _canceller) = manager.watch(WatchRequest::key("/x")).unwrap();

    match next_item(&mut events).await {
        Some(Err(WatchError::ConnectionFailed { reason })) => assert!(reason.contains("no route")),
        other => panic!("unexpected item {other:?}"),
    }
    manager.wait_for_state(ManagerState::Idle).await.unwrap();
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_manager_recovers_after_initial_open_failure() {
    let (manager, mut server) = setup();
    server.fail_next_opens(1);

    let (mut first, _c1) = manager.watch(WatchRequest::key("/x")).unwrap();
    assert!(matches!(
        next_item(&mut first).await,
        Some(Err(WatchError::ConnectionFailed { .. }))
    ));

    let (mut second, _c2) = manager.watch(WatchRequest::key("/y")).unwrap();
    let conn = establish(&mut server, 0).await;
    conn.send(events_frame(0, vec![put_event("/y", "1", 2)]));
    assert_eq!(next_item(&mut second).await.unwrap().unwrap().mod_revision, 2);
    assert_eq!(server.open_count(), 2);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_initial_ack_timeout_reports_watch_timed_out() {
    let (manager, mut server) = setup();

    let (mut events, _canceller) = manager.watch(WatchRequest::key("/x")).unwrap();
    let mut conn = server.accept().await;
    conn.expect_create().await;

    assert_eq!(
        next_item(&mut events).await,
        Some(Err(WatchError::WatchTimedOut {
            timeout: Duration::from_millis(500)
        }))
    );
    manager.wait_for_state(ManagerState::Idle).await.unwrap();

    // The stream is dropped along with whatever the late ack would have named
    conn.closed_by_client().await;
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_watch_after_ack_timeout_binds_on_new_stream() {
    let (manager, mut server) = setup();

    let (mut first, _c1) = manager.watch(WatchRequest::key("/x")).unwrap();
    let mut stale = server.accept().await;
    stale.expect_create().await;
    assert!(matches!(
        next_item(&mut first).await,
        Some(Err(WatchError::WatchTimedOut { .. }))
    ));
    manager.wait_for_state(ManagerState::Idle).await.unwrap();

    let (mut second, _c2) = manager.watch(WatchRequest::key("/x")).unwrap();
    let mut conn = server.accept().await;
    assert_eq!(conn.expect_create().await.key, Bytes::from_static(b"/x"));
    conn.send(created_frame(0));
    conn.send(events_frame(0, vec![put_event("/x", "1", 5)]));

    let event = next_item(&mut second).await.unwrap().unwrap();
    assert_eq!(event.mod_revision, 5);
    assert!(conn.try_next_request().is_none());
    assert_eq!(manager.state(), ManagerState::Active);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_reconnect_exhaustion_fails_manager() {
    let (manager, mut server) = setup();

    let (mut events, _canceller) = manager.watch(WatchRequest::key("/x")).unwrap();
    let mut conn = establish(&mut server, 0).await;

    server.fail_next_opens(3);
    conn.fail(tonic::Status::unavailable("gone"));

    assert!(matches!(
        next_item(&mut events).await,
        Some(Err(WatchError::ConnectionFailed { .. }))
    ));
    assert!(matches!(
        next_item(&mut events).await,
        Some(Err(WatchError::ConnectionFailed { .. }))
    ));
    assert_eq!(manager.state(), ManagerState::Failed);
    assert_eq!(server.open_count(), 4);
    assert!(matches!(
        manager.watch(WatchRequest::key("/y")),
        Err(Error::Watch(WatchError::ManagerClosed))
    ));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_reconnect_ack_timeout_fails_manager() {
    let (manager, mut server) = setup();

    let (mut events, _canceller) = manager.watch(WatchRequest::key("/x")).unwrap();
    let mut conn = establish(&mut server, 0).await;
    conn.fail(tonic::Status::unavailable("gone"));

    let mut conn = server.accept().await;
    conn.expect_create().await;

    assert!(matches!(
        next_item(&mut events).await,
        Some(Err(WatchError::ConnectionFailed { .. }))
    ));
    assert_eq!(manager.state(), ManagerState::Failed);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_reconnect_backs_off_between_attempts() {
    let (manager, mut server) = setup();

    let (_events, _canceller) = manager.watch(WatchRequest::key("/x")).unwrap();
    let mut conn = establish(&mut server, 0).await;

    server.fail_next_opens(2);
    let failed_at = Instant::now();
    conn.fail(tonic::Status::unavailable("gone"));

    let mut conn = server.accept().await;
    // Immediate first attempt, then 10ms and 20ms of backoff
    assert!(failed_at.elapsed() >= Duration::from_millis(30));
    conn.expect_create().await;
    conn.send(created_frame(1));
    manager.wait_for_state(ManagerState::Active).await.unwrap();
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_shutdown_closes_every_watch() {
    let (manager, mut server) = setup();

    let (mut events, canceller) = manager.watch(WatchRequest::key("/x")).unwrap();
    let mut conn = establish(&mut server, 0).await;

    manager.shutdown();

    assert_eq!(next_item(&mut events).await, Some(Err(WatchError::ManagerClosed)));
    assert_eq!(next_item(&mut events).await, Some(Err(WatchError::ManagerClosed)));
    conn.closed_by_client().await;
    manager.wait_for_state(ManagerState::Closed).await.unwrap();

    canceller.cancel();
    manager.cancel(canceller.id());
    assert!(matches!(
        manager.watch(WatchRequest::key("/y")),
        Err(Error::Watch(WatchError::ManagerClosed))
    ));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_server_cancel_recreates_only_that_watch() {
    let (manager, mut server) = setup();

    let (mut a, _ca) = manager.watch(WatchRequest::key("/a")).unwrap();
    let mut conn = establish(&mut server, 0).await;
    let (mut b, _cb) = manager.watch(WatchRequest::key("/b")).unwrap();
    conn.expect_create().await;
    conn.send(created_frame(1));

    conn.send(events_frame(0, vec![put_event("/a", "1", 5)]));
    assert_eq!(next_item(&mut a).await.unwrap().unwrap().mod_revision, 5);

    conn.send(canceled_frame(0, "server overloaded"));
    let create = conn.expect_create().await;
    assert_eq!(create.key, Bytes::from_static(b"/a"));
    assert_eq!(create.start_revision, 6);
    conn.send(created_frame(2));

    conn.send(events_frame(2, vec![put_event("/a", "2", 6)]));
    conn.send(events_frame(1, vec![put_event("/b", "1", 7)]));
    assert_eq!(next_item(&mut a).await.unwrap().unwrap().mod_revision, 6);
    assert_eq!(next_item(&mut b).await.unwrap().unwrap().mod_revision, 7);
    assert_eq!(server.open_count(), 1);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_repeated_server_cancel_ends_watch() {
    let (manager, mut server) = setup();

    let (mut events, _canceller) = manager.watch(WatchRequest::key("/a")).unwrap();
    let mut conn = establish(&mut server, 0).await;

    let mut server_id = 0;
    for _ in 0..3 {
        conn.send(canceled_frame(server_id, "rejected"));
        conn.expect_create().await;
        server_id += 1;
        conn.send(created_frame(server_id));
    }
    conn.send(canceled_frame(server_id, "rejected"));

    match next_item(&mut events).await {
        Some(Err(WatchError::ConnectionFailed { reason })) => assert!(reason.contains("rejected")),
        other => panic!("unexpected item {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_duplicate_create_ack_is_ignored() {
    let (manager, mut server) = setup();

    let (mut a, _ca) = manager.watch(WatchRequest::key("/a")).unwrap();
    let mut conn = establish(&mut server, 0).await;

    let (mut b, _cb) = manager.watch(WatchRequest::key("/b")).unwrap();
    conn.expect_create().await;
    conn.send(created_frame(0));
    conn.send(created_frame(1));

    conn.send(events_frame(1, vec![put_event("/b", "1", 3)]));
    conn.send(events_frame(0, vec![put_event("/a", "1", 4)]));
    assert_eq!(next_item(&mut b).await.unwrap().unwrap().key, Bytes::from_static(b"/b"));
    assert_eq!(next_item(&mut a).await.unwrap().unwrap().key, Bytes::from_static(b"/a"));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_events_for_unknown_server_id_are_discarded() {
    let (manager, mut server) = setup();

    let (mut events, _canceller) = manager.watch(WatchRequest::key("/x")).unwrap();
    let conn = establish(&mut server, 0).await;

    conn.send(events_frame(42, vec![put_event("/elsewhere", "1", 3)]));
    conn.send(events_frame(0, vec![put_event("/x", "1", 4)]));

    let event = next_item(&mut events).await.unwrap().unwrap();
    assert_eq!(event.key, Bytes::from_static(b"/x"));
    assert_eq!(manager.state(), ManagerState::Active);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_cancel_before_ack_cancels_once_acknowledged() {
    let (manager, mut server) = setup();

    let (mut events, canceller) = manager.watch(WatchRequest::key("/x")).unwrap();
    let mut conn = server.accept().await;
    conn.expect_create().await;

    canceller.cancel();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(conn.try_next_request().is_none());

    conn.send(created_frame(8));
    assert_eq!(conn.expect_cancel().await.watch_id, 8);
    assert!(next_item(&mut events).await.is_none());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_slow_consumer_is_cut_off() {
    let (manager, mut server) = setup();

    let (mut events, _canceller) = manager.watch(WatchRequest::key("/x")).unwrap();
    let mut conn = establish(&mut server, 0).await;

    // Buffer holds 16 responses; the 17th overflows
    for revision in 2..=18 {
        conn.send(events_frame(0, vec![put_event("/x", "v", revision)]));
    }
    assert_eq!(conn.expect_cancel().await.watch_id, 0);

    for revision in 2..=17 {
        assert_eq!(next_item(&mut events).await.unwrap().unwrap().mod_revision, revision);
    }
    let expected = WatchError::SlowConsumer { capacity: 16 };
    assert_eq!(next_item(&mut events).await, Some(Err(expected.clone())));
    assert_eq!(next_item(&mut events).await, Some(Err(expected)));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_dropping_event_stream_cancels_watch() {
    let (manager, mut server) = setup();

    let (events, canceller) = manager.watch(WatchRequest::key("/x")).unwrap();
    let mut conn = establish(&mut server, 5).await;

    drop(events);

    assert_eq!(conn.expect_cancel().await.watch_id, 5);
    assert!(canceller.is_canceled());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_response_stream_surfaces_progress_notifications() {
    let (manager, mut server) = setup();

    let request = WatchRequest::key("/x").with_progress_notify(true);
    let (mut responses, _canceller) = manager.watch_responses(request).unwrap();
    let mut conn = server.accept().await;
    assert!(conn.expect_create().await.progress_notify);
    conn.send(created_frame(0));

    conn.send(progress_frame(0, 12));
    let response = next_item(&mut responses).await.unwrap().unwrap();
    assert!(response.is_progress_notify());
    assert_eq!(response.revision, 12);
    assert_eq!(response.watch_id, responses.id());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_unconfirmed_cancel_is_dropped_after_grace_period() {
    let (manager, mut server) = setup();

    let (_events, canceller) = manager.watch(WatchRequest::key("/x")).unwrap();
    let mut conn = establish(&mut server, 0).await;

    canceller.cancel();
    conn.expect_cancel().await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Once dropped, a late confirmation is just an unknown id
    conn.send(canceled_frame(0, ""));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.state(), ManagerState::Active);
    assert!(conn.try_next_request().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[traced_test]
async fn test_slow_callback_does_not_delay_sibling_watch() {
    let (transport, mut server) = fake_transport();
    let manager = WatchManager::new(transport, test_watch_config());

    let slow_calls = Arc::new(AtomicUsize::new(0));
    let slow_calls_in_cb = slow_calls.clone();
    manager
        .watch_with_callback(WatchRequest::key("/slow"), move |_| {
            std::thread::sleep(Duration::from_millis(300));
            slow_calls_in_cb.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let mut conn = establish(&mut server, 0).await;

    let (fast_tx, mut fast_rx) = mpsc::unbounded_channel();
    manager
        .watch_with_callback(WatchRequest::key("/fast"), move |response| {
            let _ = fast_tx.send(response);
        })
        .unwrap();
    conn.expect_create().await;
    conn.send(created_frame(1));

    let started = std::time::Instant::now();
    for revision in 2..5 {
        conn.send(events_frame(0, vec![put_event("/slow", "v", revision)]));
    }
    for revision in 5..8 {
        conn.send(events_frame(1, vec![put_event("/fast", "v", revision)]));
    }

    for revision in 5..8 {
        let response = timeout(Duration::from_secs(2), fast_rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(response.events[0].mod_revision, revision);
    }
    assert!(
        started.elapsed() < Duration::from_millis(300),
        "fast watch waited {:?}",
        started.elapsed()
    );
    assert!(slow_calls.load(Ordering::SeqCst) < 3);
}

#[tokio::test]
#[traced_test]
async fn test_callback_sees_responses_in_order_then_terminal_error() {
    let (manager, mut server) = setup();

    let (tx, mut rx) = mpsc::unbounded_channel();
    manager
        .watch_with_callback(WatchRequest::prefix("/p/"), move |response| {
            let _ = tx.send(response);
        })
        .unwrap();
    let conn = establish(&mut server, 0).await;

    conn.send(events_frame(0, vec![put_event("/p/1", "a", 2)]));
    conn.send(events_frame(0, vec![delete_event("/p/1", 3)]));
    conn.send(compacted_frame(0, 9));

    let first = rx.recv().await.unwrap().unwrap();
    assert_eq!(first.events[0].kind, EventKind::Put);
    let second = rx.recv().await.unwrap().unwrap();
    assert_eq!(second.events[0].kind, EventKind::Delete);
    assert_eq!(
        rx.recv().await.unwrap(),
        Err(WatchError::RevisionCompacted { compacted_revision: 9 })
    );
    // The callback is never invoked again
    assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
}

#[test]
fn test_callback_watches_beyond_blocking_pool_all_fire() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .max_blocking_threads(2)
        .build()
        .unwrap();

    runtime.block_on(async {
        let (manager, mut server) = setup();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let tx_first = tx.clone();
        manager
            .watch_with_callback(WatchRequest::key("/k0"), move |response| {
                let _ = tx_first.send(response);
            })
            .unwrap();
        let mut conn = establish(&mut server, 0).await;

        for server_id in 1..3 {
            let tx = tx.clone();
            manager
                .watch_with_callback(WatchRequest::key(format!("/k{server_id}")), move |response| {
                    let _ = tx.send(response);
                })
                .unwrap();
            conn.expect_create().await;
            conn.send(created_frame(server_id));
        }

        for server_id in 0..3 {
            conn.send(events_frame(
                server_id,
                vec![put_event(&format!("/k{server_id}"), "v", server_id + 2)],
            ));
        }

        let mut revisions = Vec::new();
        for _ in 0..3 {
            let response = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap().unwrap();
            revisions.push(response.events[0].mod_revision);
        }
        revisions.sort();
        assert_eq!(revisions, vec![2, 3, 4]);
    });
}
