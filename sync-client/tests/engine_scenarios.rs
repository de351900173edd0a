//! End-to-end engine scenarios against the mock transport.
//!
//! All tests run on a paused clock, so backoff and latency are exact and
//! instant.

use serde_json::json;
use slidesync_client::{
    EngineConfig, MemoryRoomStore, MemorySessionStore, MockTransport, PositionCache,
    SessionStore, SyncEngine, SyncUpdate, TransportError,
};
use std::sync::Arc;
use std::time::Duration;
use sync_core::{ListConfig, LoadingState, SyncMode, SyncStatus};
use sync_types::{
    ExtensionPayload, ExtensionToggle, ExtensionsResponse, ListOp, ListRange, ListResponse,
    RoomEvent, RoomPayload, RoomSubscription, SyncResponse, ToDeviceResponse,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::Instant;

type Engine = SyncEngine<MockTransport, MemoryRoomStore>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine_with(sessions: MemorySessionStore) -> (Engine, MockTransport, MemoryRoomStore) {
    init_tracing();
    let transport = MockTransport::new();
    let store = MemoryRoomStore::new();
    let engine = SyncEngine::new(
        EngineConfig::new("scenario"),
        transport.clone(),
        store.clone(),
        Arc::new(sessions),
    );
    (engine, transport, store)
}

fn engine() -> (Engine, MockTransport, MemoryRoomStore) {
    engine_with(MemorySessionStore::new())
}

fn event(id: &str, ts: u64) -> RoomEvent {
    RoomEvent {
        event_id: id.to_string(),
        event_type: "m.room.message".to_string(),
        sender: "@alice:example.org".to_string(),
        origin_server_ts: ts,
        content: json!({ "body": id }),
        state_key: None,
        unsigned: None,
    }
}

/// Room payload with a newest-first timeline.
fn room(initial: bool, timeline: Vec<RoomEvent>) -> RoomPayload {
    RoomPayload {
        initial,
        timeline,
        ..RoomPayload::default()
    }
}

fn sync_list(pos: &str, list: &str, room_ids: &[&str], count: usize) -> SyncResponse {
    let mut response = SyncResponse::empty(pos);
    response.lists.insert(
        list.to_string(),
        ListResponse {
            count: Some(count),
            ops: vec![ListOp::Sync {
                range: ListRange::new(0, 19),
                room_ids: room_ids.iter().map(|id| id.to_string()).collect(),
            }],
        },
    );
    response
}

fn with_room(mut response: SyncResponse, room_id: &str, payload: RoomPayload) -> SyncResponse {
    response.rooms.insert(room_id.to_string(), payload);
    response
}

/// Poll `condition` on the paused clock until it holds.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Wait until the engine has adopted `pos` and sent it back.
async fn wait_for_pos(transport: &MockTransport, pos: &str) {
    wait_until(|| {
        transport
            .sent_requests()
            .iter()
            .any(|request| request.pos.as_deref() == Some(pos))
    })
    .await;
}

fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(item) => items.push(item),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return items,
        }
    }
}

// ============================================================================
// Lists
// ============================================================================

/// Growing lists widen the requested window on each load_more.
#[tokio::test(start_paused = true)]
async fn growing_list_extends_requested_window() {
    let (engine, transport, _) = engine();
    engine
        .add_list(ListConfig::new("all", SyncMode::Growing))
        .await
        .unwrap();

    engine.start().await.unwrap();
    wait_until(|| transport.request_count() >= 1).await;
    assert_eq!(
        transport.sent_requests()[0].lists["all"].ranges,
        vec![ListRange::new(0, 19)]
    );

    assert!(engine.load_more("all").await.unwrap());
    assert!(engine.load_more("all").await.unwrap());
    let sent = transport.request_count();
    wait_until(|| transport.request_count() > sent).await;

    assert_eq!(
        transport.last_sent().unwrap().lists["all"].ranges,
        vec![ListRange::new(0, 59)]
    );
    engine.stop().await;
}

/// An INSERT of a room already in the list moves it.
#[tokio::test(start_paused = true)]
async fn insert_of_present_room_reorders_without_duplicate() {
    let (engine, transport, _) = engine();
    engine
        .add_list(ListConfig::new("all", SyncMode::Growing))
        .await
        .unwrap();

    transport.queue_response(sync_list("p1", "all", &["!a", "!b"], 2));
    let mut moved = SyncResponse::empty("p2");
    moved.lists.insert(
        "all".to_string(),
        ListResponse {
            count: Some(2),
            ops: vec![ListOp::Insert {
                index: 0,
                room_id: "!b".to_string(),
            }],
        },
    );
    transport.queue_response(moved);

    let mut updates = engine.subscribe_updates();
    engine.start().await.unwrap();
    wait_for_pos(&transport, "p2").await;

    let list = engine.room_list("all").await.unwrap();
    assert_eq!(list.loaded_room_ids().collect::<Vec<_>>(), vec!["!b", "!a"]);
    assert_eq!(list.total_count(), Some(2));
    assert_eq!(list.loading_state(), LoadingState::FullyLoaded);

    let updates = drain(&mut updates);
    assert_eq!(updates.len(), 2);
    assert!(updates[1].lists.contains("all"));
    engine.stop().await;
}

/// Explicit ranges switch the list to selective mode and are sent as-is.
#[tokio::test(start_paused = true)]
async fn explicit_ranges_are_sent_verbatim() {
    let (engine, transport, _) = engine();
    engine
        .add_list(ListConfig::new("visible", SyncMode::Paging))
        .await
        .unwrap();
    engine
        .set_list_ranges(
            "visible",
            vec![ListRange::new(0, 9), ListRange::new(50, 59)],
        )
        .await
        .unwrap();

    engine.start().await.unwrap();
    wait_until(|| transport.request_count() >= 1).await;

    assert_eq!(
        transport.sent_requests()[0].lists["visible"].ranges,
        vec![ListRange::new(0, 9), ListRange::new(50, 59)]
    );
    assert_eq!(
        engine.room_list("visible").await.unwrap().mode(),
        SyncMode::Selective
    );
    engine.stop().await;
}

// ============================================================================
// Change suppression
// ============================================================================

/// Replaying an identical response surfaces nothing the second time.
#[tokio::test(start_paused = true)]
async fn replayed_response_is_absorbed() {
    let (engine, transport, store) = engine();
    engine
        .add_list(ListConfig::new("all", SyncMode::Growing))
        .await
        .unwrap();

    let first = with_room(
        sync_list("p1", "all", &["!r"], 1),
        "!r",
        room(true, vec![event("$1", 1_000)]),
    );
    let mut replay = first.clone();
    replay.pos = "p2".to_string();
    transport.queue_response(first);
    transport.queue_response(replay);

    let mut updates = engine.subscribe_updates();
    engine.start().await.unwrap();
    wait_for_pos(&transport, "p2").await;
    wait_until(|| transport.request_count() >= 4).await;

    let updates = drain(&mut updates);
    assert_eq!(updates.len(), 1, "only the first delivery is surfaced");
    assert_eq!(updates[0].pos, "p1");
    assert!(updates[0].initial_rooms.contains("!r"));
    assert_eq!(store.timeline_ids("!r"), vec!["$1".to_string()]);
    engine.stop().await;
}

/// A room re-sent with `initial` and one new event is not initial again.
#[tokio::test(start_paused = true)]
async fn repeated_initial_flag_only_adds_new_events() {
    let (engine, transport, store) = engine();

    transport.queue_response(with_room(
        SyncResponse::empty("p1"),
        "!r",
        room(true, vec![event("$1", 1_000)]),
    ));
    transport.queue_response(with_room(
        SyncResponse::empty("p2"),
        "!r",
        room(true, vec![event("$2", 2_000), event("$1", 1_000)]),
    ));

    let mut updates = engine.subscribe_updates();
    engine.start().await.unwrap();
    wait_for_pos(&transport, "p2").await;

    let updates: Vec<SyncUpdate> = drain(&mut updates);
    assert_eq!(updates.len(), 2);
    assert!(updates[1].rooms.contains("!r"));
    assert!(updates[1].initial_rooms.is_empty());
    assert_eq!(
        store.timeline_ids("!r"),
        vec!["$1".to_string(), "$2".to_string()]
    );
    assert_eq!(
        store
            .room("!r")
            .unwrap()
            .most_recent_event
            .map(|e| e.event_id),
        Some("$2".to_string())
    );
    engine.stop().await;
}

// ============================================================================
// Session recovery
// ============================================================================

/// An expired position resets the session and the loop carries on.
#[tokio::test(start_paused = true)]
async fn expired_position_resets_session() {
    let (engine, transport, _) = engine();
    engine
        .add_list(ListConfig::new("all", SyncMode::Growing))
        .await
        .unwrap();

    transport.queue_response(with_room(
        sync_list("p1", "all", &["!a", "!b", "!c"], 3),
        "!a",
        room(true, vec![event("$1", 1_000)]),
    ));
    transport.queue_error(TransportError::PositionExpired);
    transport.queue_response(with_room(
        sync_list("p3", "all", &["!a"], 1),
        "!a",
        room(true, vec![event("$1", 1_000)]),
    ));

    let mut statuses = engine.subscribe_status();
    let mut updates = engine.subscribe_updates();
    engine.start().await.unwrap();
    wait_for_pos(&transport, "p3").await;

    let requests = transport.sent_requests();
    assert_eq!(requests[0].pos, None);
    assert_eq!(requests[1].pos.as_deref(), Some("p1"));
    assert_eq!(requests[2].pos, None, "fresh session after reset");
    assert_eq!(requests[2].lists["all"].ranges, vec![ListRange::new(0, 19)]);

    let statuses = drain(&mut statuses);
    assert!(statuses.contains(&SyncStatus::SessionReset));
    assert!(!statuses
        .iter()
        .any(|s| matches!(s, SyncStatus::Error { .. })));

    let updates = drain(&mut updates);
    let last = updates.last().unwrap();
    assert_eq!(last.pos, "p3");
    assert!(
        last.initial_rooms.contains("!a"),
        "room is initial again in the new session"
    );

    let list = engine.room_list("all").await.unwrap();
    assert_eq!(list.loaded_room_ids().collect::<Vec<_>>(), vec!["!a"]);
    engine.stop().await;
}

/// A failed store write retries the same position instead of losing data.
#[tokio::test(start_paused = true)]
async fn store_failure_retries_with_previous_position() {
    let (engine, transport, store) = engine();
    let response = with_room(
        SyncResponse::empty("p1"),
        "!r",
        room(true, vec![event("$1", 1_000)]),
    );
    transport.queue_response(response.clone());
    transport.queue_response(response);
    store.fail_next_write("disk full");

    let mut statuses = engine.subscribe_status();
    let mut updates = engine.subscribe_updates();
    engine.start().await.unwrap();
    wait_for_pos(&transport, "p1").await;

    let requests = transport.sent_requests();
    assert_eq!(requests[0].pos, None);
    assert_eq!(requests[1].pos, None, "position not adopted on failure");

    let statuses = drain(&mut statuses);
    assert!(statuses
        .iter()
        .any(|s| matches!(s, SyncStatus::Error { message } if message.contains("disk full"))));

    let updates = drain(&mut updates);
    assert_eq!(updates.len(), 1);
    assert!(updates[0].initial_rooms.contains("!r"));
    assert_eq!(store.timeline_ids("!r"), vec!["$1".to_string()]);
    engine.stop().await;
}

// ============================================================================
// Timing
// ============================================================================

/// Fast empty responses are padded to the target interval.
#[tokio::test(start_paused = true)]
async fn fast_empty_responses_back_off() {
    let (engine, transport, _) = engine();

    engine.start().await.unwrap();
    let started = Instant::now();

    // First cycle always counts, so the second request goes out at once
    wait_until(|| transport.request_count() >= 2).await;
    assert!(started.elapsed() < Duration::from_millis(100));

    wait_until(|| transport.request_count() >= 3).await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(3_100), "elapsed {elapsed:?}");
    engine.stop().await;
}

/// Slow responses are never padded, even when empty.
#[tokio::test(start_paused = true)]
async fn slow_responses_do_not_back_off() {
    let (engine, transport, _) = engine();
    transport.set_latency(Duration::from_secs(6));

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(12_500)).await;

    // Requests at 0s, 6s and 12s
    assert_eq!(transport.request_count(), 3);
    engine.stop().await;
}

/// Transport errors publish an error status and retry after the delay.
#[tokio::test(start_paused = true)]
async fn transport_error_retries_after_delay() {
    let (engine, transport, _) = engine();
    transport.queue_error(TransportError::Network("connection reset".into()));

    let mut statuses = engine.subscribe_status();
    engine.start().await.unwrap();
    let started = Instant::now();

    wait_until(|| transport.request_count() >= 2).await;
    assert!(started.elapsed() >= Duration::from_secs(3));

    let statuses = drain(&mut statuses);
    let error_at = statuses
        .iter()
        .position(|s| matches!(s, SyncStatus::Error { message } if message.contains("connection reset")))
        .expect("error status published");
    assert_eq!(statuses[error_at + 1], SyncStatus::WaitingForResponse);
    engine.stop().await;
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Status pulses through each phase of a cycle.
#[tokio::test(start_paused = true)]
async fn status_follows_cycle_phases() {
    let (engine, transport, _) = engine();
    let mut statuses = engine.subscribe_status();

    engine.start().await.unwrap();
    wait_until(|| transport.request_count() >= 2).await;
    engine.stop().await;

    let statuses = drain(&mut statuses);
    assert_eq!(
        &statuses[..4],
        &[
            SyncStatus::WaitingForResponse,
            SyncStatus::Processing,
            SyncStatus::Finished,
            SyncStatus::WaitingForResponse,
        ]
    );
    assert_eq!(statuses.last(), Some(&SyncStatus::Stopped));
    assert_eq!(engine.status(), SyncStatus::Stopped);
}

/// Starting twice runs one loop.
#[tokio::test(start_paused = true)]
async fn start_is_idempotent() {
    let (engine, transport, _) = engine();

    engine.start().await.unwrap();
    engine.start().await.unwrap();
    assert!(engine.is_running().await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.request_count(), 2);

    engine.stop().await;
    assert!(!engine.is_running().await);

    engine.start().await.unwrap();
    wait_until(|| transport.request_count() >= 3).await;
    engine.stop().await;
}

/// A start issued while stop is waiting leaves exactly one loop behind.
#[tokio::test(start_paused = true)]
async fn start_during_stop_runs_single_loop() {
    let (engine, transport, _) = engine();
    let engine = Arc::new(engine);
    transport.set_latency(Duration::from_secs(2));

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stopping = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.stop().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(10), stopping)
        .await
        .expect("stop returns")
        .unwrap();
    assert!(engine.is_running().await);

    engine.stop().await;
    let sent = transport.request_count();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.request_count(), sent, "no loop left running");
    assert_eq!(engine.status(), SyncStatus::Stopped);
}

/// Every run publishes its first cycle and skips the backoff after it.
#[tokio::test(start_paused = true)]
async fn restart_publishes_first_cycle() {
    let (engine, transport, _) = engine();
    let mut updates = engine.subscribe_updates();

    engine.start().await.unwrap();
    wait_until(|| transport.request_count() >= 2).await;
    engine.stop().await;
    assert_eq!(drain(&mut updates).len(), 1);

    let sent = transport.request_count();
    engine.start().await.unwrap();
    let restarted = Instant::now();
    wait_until(|| transport.request_count() >= sent + 2).await;
    assert!(restarted.elapsed() < Duration::from_millis(100));
    engine.stop().await;

    assert_eq!(drain(&mut updates).len(), 1);
}

/// Stop lets the in-flight request finish and be processed.
#[tokio::test(start_paused = true)]
async fn stop_waits_for_in_flight_request() {
    let (engine, transport, _) = engine();
    transport.set_latency(Duration::from_secs(2));
    transport.queue_response(SyncResponse::empty("slow"));

    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(transport.request_count(), 1);

    let stopping = Instant::now();
    engine.stop().await;

    assert!(stopping.elapsed() >= Duration::from_millis(1_500));
    assert_eq!(engine.pos().await.as_deref(), Some("slow"));
    assert_eq!(transport.request_count(), 1, "no request after stop");
    assert_eq!(engine.status(), SyncStatus::Stopped);
}

/// A backoff already under way is not cut short by stop.
#[tokio::test(start_paused = true)]
async fn stop_during_backoff_waits_out_delay() {
    let (engine, transport, _) = engine();

    engine.start().await.unwrap();
    wait_until(|| transport.request_count() >= 2).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let stopping = Instant::now();
    engine.stop().await;
    let elapsed = stopping.elapsed();

    assert!(elapsed >= Duration::from_millis(1_800), "elapsed {elapsed:?}");
    assert!(elapsed <= Duration::from_secs(2), "elapsed {elapsed:?}");
    assert_eq!(transport.request_count(), 2);
}

/// Update and status streams close once the engine is gone.
#[tokio::test(start_paused = true)]
async fn shutdown_closes_streams() {
    let (engine, transport, _) = engine();
    let mut updates = engine.subscribe_updates();
    let mut statuses = engine.subscribe_status();

    engine.start().await.unwrap();
    wait_until(|| transport.request_count() >= 1).await;
    engine.shutdown().await;

    drain(&mut updates);
    drain(&mut statuses);
    assert!(matches!(updates.try_recv(), Err(TryRecvError::Closed)));
    assert!(matches!(statuses.try_recv(), Err(TryRecvError::Closed)));
}

// ============================================================================
// Position cache
// ============================================================================

/// A fresh engine resumes from the cached position and list windows.
#[tokio::test(start_paused = true)]
async fn cached_session_restores_into_fresh_engine() {
    let sessions = MemorySessionStore::new();

    let (first, transport, _) = engine_with(sessions.clone());
    first
        .add_list(ListConfig::new("all", SyncMode::Growing))
        .await
        .unwrap();
    first
        .add_list(ListConfig::new("partial", SyncMode::Growing))
        .await
        .unwrap();
    let mut response = sync_list("p1", "all", &["!a", "!b"], 2);
    response
        .lists
        .extend(sync_list("p1", "partial", &["!c"], 40).lists);
    transport.queue_response(response);

    first.start().await.unwrap();
    wait_for_pos(&transport, "p1").await;
    first.stop().await;
    let saved_pos = first.pos().await;

    let (second, transport, _) = engine_with(sessions);
    second
        .add_list(ListConfig::new("all", SyncMode::Growing))
        .await
        .unwrap();
    second.start().await.unwrap();

    // Restored before the first request is built
    let all = second.room_list("all").await.unwrap();
    assert_eq!(all.loading_state(), LoadingState::Preloaded);
    assert_eq!(all.loaded_room_ids().collect::<Vec<_>>(), vec!["!a", "!b"]);
    assert_eq!(all.mode(), SyncMode::Selective, "fully loaded list is frozen");

    // Lists added after start still pick up their cached window
    second
        .add_list(ListConfig::new("partial", SyncMode::Growing))
        .await
        .unwrap();
    let partial = second.room_list("partial").await.unwrap();
    assert_eq!(partial.loading_state(), LoadingState::Preloaded);
    assert_eq!(partial.mode(), SyncMode::Growing);

    wait_until(|| transport.request_count() >= 1).await;
    assert_eq!(transport.sent_requests()[0].pos, saved_pos);
    second.stop().await;
}

/// An unreadable cache is ignored and the session starts fresh.
#[tokio::test(start_paused = true)]
async fn corrupt_cache_starts_fresh() {
    let sessions = MemorySessionStore::new();
    sessions
        .put(&PositionCache::key_for("scenario"), b"{ not json".to_vec())
        .await
        .unwrap();

    let (engine, transport, _) = engine_with(sessions);
    engine.start().await.unwrap();
    wait_until(|| transport.request_count() >= 1).await;

    assert_eq!(transport.sent_requests()[0].pos, None);
    engine.stop().await;
}

// ============================================================================
// Subscriptions and extensions
// ============================================================================

/// Subscriptions ride along on every request until removed.
#[tokio::test(start_paused = true)]
async fn subscriptions_are_resent_every_cycle() {
    let (engine, transport, _) = engine();
    engine
        .subscribe_to_rooms(["!sub"], RoomSubscription::new(50))
        .await
        .unwrap();

    engine.start().await.unwrap();
    wait_until(|| transport.request_count() >= 3).await;
    for request in transport.sent_requests() {
        assert_eq!(request.room_subscriptions["!sub"].timeline_limit, 50);
    }

    engine.unsubscribe_from_rooms(["!sub"]).await;
    let sent = transport.request_count();
    wait_until(|| transport.request_count() > sent).await;
    assert!(transport.last_sent().unwrap().room_subscriptions.is_empty());
    engine.stop().await;
}

/// Re-subscribing makes the room's next delivery initial again.
#[tokio::test(start_paused = true)]
async fn resubscribe_redelivers_room_as_initial() {
    let (engine, transport, _) = engine();
    let delivery = |pos: &str| {
        with_room(
            SyncResponse::empty(pos),
            "!sub",
            room(true, vec![event("$1", 1_000)]),
        )
    };
    transport.queue_response(delivery("p1"));

    let mut updates = engine.subscribe_updates();
    engine.start().await.unwrap();
    wait_for_pos(&transport, "p1").await;

    engine
        .subscribe_to_rooms(["!sub"], RoomSubscription::new(10))
        .await
        .unwrap();
    transport.queue_response(delivery("p2"));
    wait_for_pos(&transport, "p2").await;

    let updates = drain(&mut updates);
    let last = updates.last().unwrap();
    assert_eq!(last.pos, "p2");
    assert!(last.initial_rooms.contains("!sub"));
    engine.stop().await;
}

/// The to-device stream position is echoed back and extensions reach the store.
#[tokio::test(start_paused = true)]
async fn to_device_position_is_tracked() {
    let (engine, transport, store) = engine();
    let mut response = SyncResponse::empty("p1");
    response.extensions = ExtensionsResponse {
        to_device: Some(ToDeviceResponse {
            next_batch: "td-1".to_string(),
            events: vec![json!({ "type": "m.room_key", "content": {} })],
        }),
        ..ExtensionsResponse::default()
    };
    transport.queue_response(response);

    engine.start().await.unwrap();
    wait_until(|| transport.request_count() >= 2).await;

    let requests = transport.sent_requests();
    assert_eq!(
        requests[0].extensions.to_device,
        Some(ExtensionToggle::enabled_since(None))
    );
    assert_eq!(
        requests[1].extensions.to_device,
        Some(ExtensionToggle::enabled_since(Some("td-1".to_string())))
    );
    assert!(matches!(
        store.extensions().as_slice(),
        [ExtensionPayload::ToDevice { events }] if events.len() == 1
    ));
    engine.stop().await;
}

/// Responses for lists the engine does not know are ignored.
#[tokio::test(start_paused = true)]
async fn unknown_list_in_response_is_ignored() {
    let (engine, transport, _) = engine();
    transport.queue_response(sync_list("p1", "ghost", &["!a"], 1));

    engine.start().await.unwrap();
    wait_for_pos(&transport, "p1").await;

    assert!(engine.room_list("ghost").await.is_none());
    assert!(engine.list_names().await.is_empty());
    engine.stop().await;
}
