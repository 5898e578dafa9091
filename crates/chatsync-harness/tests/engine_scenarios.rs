//! End-to-end engine scenarios against the in-memory hub.
//!
//! Every test runs on a paused tokio clock, so timers (typing debounce and
//! expiry, join backoff, heartbeats) elapse instantly and deterministically.

use std::time::Duration;

use chatsync_client::RoomUpdate;
use chatsync_core::{
    ConnectionStatus, RoomEventKind, SyncConfig, SyncError,
    message::{DeliveryStatus, MessageKind},
};
use chatsync_harness::{
    InvariantRegistry, MemoryHub, RecordingObserver, SIM_EPOCH_MILLIS, SimClient, SimEnv, SystemSnapshot,
};
use chatsync_proto::{MessageRow, RawChannelEvent, TypingPayload};

const ROOM: &str = "r1";

fn stored_row(i: i64) -> MessageRow {
    MessageRow {
        id: format!("seed_{i}"),
        room_id: ROOM.into(),
        sender_id: "u9".into(),
        sender_name: "Zed".into(),
        content: format!("history {i}"),
        message_type: MessageKind::Text,
        created_at: SIM_EPOCH_MILLIS - 100_000 + i * 1000,
        is_read: true,
        status: DeliveryStatus::Sent,
        reply_to: None,
        reactions: Vec::new(),
        deleted_at: None,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn assert_invariants(client: &SimClient, recorder: &RecordingObserver, context: &str) {
    let snapshot = SystemSnapshot::capture(&client.engine, &[(ROOM, recorder)]).await;
    InvariantRegistry::standard().assert_all(&snapshot, context);
}

#[tokio::test(start_paused = true)]
async fn optimistic_send_is_replaced_by_confirmation() {
    let hub = MemoryHub::new();
    let (alice, recorder) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();

    let confirmed = alice.say(ROOM, "hi").await.unwrap();
    settle().await;

    let events = recorder.message_events();
    assert_eq!(events.len(), 2, "echo must not produce a third event: {events:?}");

    assert_eq!(events[0].kind, RoomEventKind::New);
    let optimistic = &events[0].items[0];
    assert!(optimistic.id.starts_with("temp_"));
    assert_eq!(optimistic.status, DeliveryStatus::Optimistic);
    assert_eq!(optimistic.content, "hi");

    assert_eq!(events[1].kind, RoomEventKind::Replace { temp_id: optimistic.id.clone() });
    assert_eq!(events[1].items[0], confirmed);
    assert_eq!(confirmed.status, DeliveryStatus::Sent);

    assert_eq!(alice.engine.cached_messages(ROOM).await, vec![confirmed]);
    assert_invariants(&alice, &recorder, "after send").await;
}

#[tokio::test(start_paused = true)]
async fn remote_message_is_delivered_once() {
    let hub = MemoryHub::new();
    let (alice, _) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();
    let (bob, bob_seen) = SimClient::joined(&hub, SimEnv::with_seed(2), "u2", "Bob", ROOM).await.unwrap();

    let sent = alice.say(ROOM, "hello bob").await.unwrap();
    settle().await;

    // Replay the same row, as a reconnecting feed would.
    let row = hub.rows(ROOM).remove(0);
    hub.inject(ROOM, &RawChannelEvent::Insert(serde_json::json!(row)));
    settle().await;

    let events = bob_seen.message_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, RoomEventKind::New);
    assert_eq!(events[0].items[0].id, sent.id);
    assert!(!events[0].items[0].is_temporary());
    assert_eq!(bob.engine.cached_messages(ROOM).await.len(), 1);
    assert_invariants(&bob, &bob_seen, "after remote message").await;
}

#[tokio::test(start_paused = true)]
async fn failed_send_is_rolled_back() {
    let hub = MemoryHub::new();
    let (alice, recorder) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();
    alice.link.fail_next_inserts(1);

    let err = alice.say(ROOM, "doomed").await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)), "{err:?}");

    let events = recorder.message_events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, RoomEventKind::New);
    assert_eq!(events[1].kind, RoomEventKind::Delete);
    assert_eq!(events[1].items[0].id, events[0].items[0].id);
    assert_eq!(events[1].items[0].status, DeliveryStatus::Failed);

    assert!(alice.engine.cached_messages(ROOM).await.is_empty());
    assert!(hub.rows(ROOM).is_empty());
    assert_invariants(&alice, &recorder, "after failed send").await;
}

#[tokio::test(start_paused = true)]
async fn send_to_unjoined_room_is_rejected() {
    let hub = MemoryHub::new();
    let (alice, recorder) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();

    let err = alice.say("elsewhere", "hi").await.unwrap_err();
    assert_eq!(err, SyncError::RoomNotJoined("elsewhere".into()));
    assert!(recorder.message_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn joining_twice_keeps_one_channel() {
    let hub = MemoryHub::new();
    let (alice, first) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();

    let second = RecordingObserver::new();
    alice.join(ROOM, second.clone()).await.unwrap();
    settle().await;
    assert_eq!(hub.client_channel_count(&alice.link, ROOM), 1);

    first.clear();
    alice.say(ROOM, "after rejoin").await.unwrap();
    settle().await;

    assert!(first.message_events().is_empty());
    assert_eq!(second.message_events().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn history_pages_backwards_without_overlap() {
    let hub = MemoryHub::new();
    let mut rows: Vec<MessageRow> = (1..=10).map(stored_row).collect();
    rows[4].deleted_at = Some(SIM_EPOCH_MILLIS);
    hub.seed_rows(rows);

    let (alice, recorder) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();

    let initial = alice.engine.load_initial_messages(ROOM, 4).await.unwrap();
    let ids: Vec<_> = initial.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["seed_7", "seed_8", "seed_9", "seed_10"]);

    let events = recorder.message_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, RoomEventKind::Initial);
    assert_eq!(events[0].items, initial);

    let page = alice.engine.load_older_messages(ROOM, initial[0].timestamp, 3).await.unwrap();
    let ids: Vec<_> = page.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["seed_3", "seed_4", "seed_6"], "soft-deleted seed_5 is skipped");
    assert!(page.has_more);

    let page = alice.engine.load_older_messages(ROOM, page.messages[0].timestamp, 3).await.unwrap();
    let ids: Vec<_> = page.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["seed_1", "seed_2"]);
    assert!(!page.has_more);

    let cached = alice.engine.cached_messages(ROOM).await;
    assert_eq!(cached.len(), 9);
    assert!(cached.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_invariants(&alice, &recorder, "after paging").await;
}

#[tokio::test(start_paused = true)]
async fn history_requires_joined_room() {
    let hub = MemoryHub::new();
    let (alice, _) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();

    assert_eq!(
        alice.engine.load_initial_messages("elsewhere", 10).await.unwrap_err(),
        SyncError::RoomNotJoined("elsewhere".into())
    );
    assert!(alice.engine.load_older_messages("elsewhere", 0, 10).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn edits_and_soft_deletes_reach_observers() {
    let hub = MemoryHub::new();
    hub.seed_rows((1..=3).map(stored_row));
    let (alice, recorder) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();
    alice.engine.load_initial_messages(ROOM, 10).await.unwrap();

    assert!(hub.edit(ROOM, "seed_2", "edited"));
    assert!(hub.soft_delete(ROOM, "seed_3", SIM_EPOCH_MILLIS));
    settle().await;

    let events = recorder.message_events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[1].kind, RoomEventKind::Update);
    assert_eq!(events[1].items[0].content, "edited");
    assert_eq!(events[2].kind, RoomEventKind::Delete);
    assert_eq!(events[2].items[0].id, "seed_3");

    let ids: Vec<_> = alice.engine.cached_messages(ROOM).await.into_iter().map(|m| m.id).collect();
    assert_eq!(ids, ["seed_1", "seed_2"]);
    assert_invariants(&alice, &recorder, "after edit and delete").await;
}

#[tokio::test(start_paused = true)]
async fn typing_reaches_peer_and_stops_itself() {
    let hub = MemoryHub::new();
    let (alice, _) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();
    let (bob, bob_seen) = SimClient::joined(&hub, SimEnv::with_seed(2), "u2", "Bob", ROOM).await.unwrap();

    alice.engine.send_typing_indicator(ROOM, "u1", "Alice", true).await.unwrap();
    assert!(bob.engine.typing_users(ROOM).await.is_empty(), "start is debounced");

    tokio::time::sleep(Duration::from_millis(500)).await;
    let typing = bob_seen.last_typing().unwrap();
    assert_eq!(typing.len(), 1);
    assert_eq!(typing[0].user_id, "u1");
    assert_eq!(typing[0].user_name, "Alice");

    // Local indicator stops itself after the auto-stop delay.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(bob_seen.last_typing().unwrap().is_empty());
    assert!(bob.engine.typing_users(ROOM).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn explicit_stop_is_immediate() {
    let hub = MemoryHub::new();
    let (alice, _) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();
    let (bob, _) = SimClient::joined(&hub, SimEnv::with_seed(2), "u2", "Bob", ROOM).await.unwrap();

    alice.engine.send_typing_indicator(ROOM, "u1", "Alice", true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(bob.engine.typing_users(ROOM).await.len(), 1);

    alice.engine.send_typing_indicator(ROOM, "u1", "Alice", false).await.unwrap();
    settle().await;
    assert!(bob.engine.typing_users(ROOM).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn silent_remote_typist_expires() {
    let hub = MemoryHub::new();
    let (alice, recorder) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();

    let payload = TypingPayload {
        user_id: "u9".into(),
        user_name: "Zed".into(),
        is_typing: true,
        timestamp: SIM_EPOCH_MILLIS,
    };
    hub.inject(ROOM, &RawChannelEvent::Broadcast { event: "typing".into(), payload: payload.to_value() });
    settle().await;
    assert_eq!(alice.engine.typing_users(ROOM).await.len(), 1);

    // A repeated start refreshes the entry without a new emit.
    hub.inject(ROOM, &RawChannelEvent::Broadcast { event: "typing".into(), payload: payload.to_value() });
    settle().await;
    assert_eq!(recorder.typing_updates(), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(alice.engine.typing_users(ROOM).await.is_empty());
    assert_eq!(recorder.last_typing(), Some(Vec::new()));
}

#[tokio::test(start_paused = true)]
async fn own_typing_echo_is_ignored() {
    let hub = MemoryHub::new();
    let (alice, recorder) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();

    let payload = TypingPayload {
        user_id: "u1".into(),
        user_name: "Alice".into(),
        is_typing: true,
        timestamp: SIM_EPOCH_MILLIS,
    };
    hub.inject(ROOM, &RawChannelEvent::Broadcast { event: "typing".into(), payload: payload.to_value() });
    settle().await;

    assert!(alice.engine.typing_users(ROOM).await.is_empty());
    assert_eq!(recorder.typing_updates(), 0);
}

#[tokio::test(start_paused = true)]
async fn presence_tracks_joins_and_leaves() {
    let hub = MemoryHub::new();
    let (alice, recorder) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();
    let (bob, _) = SimClient::joined(&hub, SimEnv::with_seed(2), "u2", "Bob", ROOM).await.unwrap();
    settle().await;

    let ids: Vec<_> = recorder.last_presence().unwrap().into_iter().map(|m| m.user_id).collect();
    assert_eq!(ids, ["u1", "u2"]);

    bob.engine.leave_room(ROOM).await;
    settle().await;

    let ids: Vec<_> = alice.engine.members(ROOM).await.into_iter().map(|m| m.user_id).collect();
    assert_eq!(ids, ["u1"]);
}

#[tokio::test(start_paused = true)]
async fn leave_is_idempotent() {
    let hub = MemoryHub::new();
    let (alice, _) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();

    alice.engine.leave_room(ROOM).await;
    alice.engine.leave_room(ROOM).await;

    assert_eq!(hub.channel_count(ROOM), 0);
    assert!(!alice.engine.is_subscribed(ROOM).await);
    assert!(alice.engine.cached_messages(ROOM).await.is_empty());
    assert!(matches!(alice.say(ROOM, "gone").await, Err(SyncError::RoomNotJoined(_))));
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_keep_the_observer() {
    let hub = MemoryHub::new();
    let (alice, recorder) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();
    let (bob, _) = SimClient::joined(&hub, SimEnv::with_seed(2), "u2", "Bob", ROOM).await.unwrap();

    alice.engine.pause_all().await;
    assert_eq!(hub.client_channel_count(&alice.link, ROOM), 0);
    let health = alice.engine.connection_health().await;
    assert_eq!((health.active_rooms, health.paused_rooms), (0, 1));

    bob.say(ROOM, "while paused").await.unwrap();
    settle().await;
    assert!(recorder.message_events().is_empty());

    alice.engine.resume_all("u1", "Alice").await.unwrap();
    assert_eq!(hub.client_channel_count(&alice.link, ROOM), 1);
    let health = alice.engine.connection_health().await;
    assert_eq!((health.active_rooms, health.paused_rooms), (1, 0));

    bob.say(ROOM, "after resume").await.unwrap();
    settle().await;
    let events = recorder.message_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].items[0].content, "after resume");
}

#[tokio::test(start_paused = true)]
async fn join_retries_refused_subscribes() {
    let hub = MemoryHub::new();
    let alice = SimClient::new(&hub, SimEnv::with_seed(1), SyncConfig::default(), "u1", "Alice").unwrap();
    alice.engine.initialize().await.unwrap();
    alice.link.refuse_next_subscribes(2);

    let recorder = RecordingObserver::new();
    alice.join(ROOM, recorder.clone()).await.unwrap();

    assert_eq!(hub.subscribe_calls(), 3);
    assert!(alice.engine.is_subscribed(ROOM).await);
    assert!(recorder.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn join_gives_up_after_max_attempts() {
    let hub = MemoryHub::new();
    let alice = SimClient::new(&hub, SimEnv::with_seed(1), SyncConfig::default(), "u1", "Alice").unwrap();
    alice.engine.initialize().await.unwrap();
    alice.link.refuse_next_subscribes(10);

    let recorder = RecordingObserver::new();
    let err = alice.join(ROOM, recorder.clone()).await.unwrap_err();

    assert!(matches!(&err, SyncError::Network(msg) if msg.contains("after 3 attempts")), "{err:?}");
    assert_eq!(hub.subscribe_calls(), 3);
    assert_eq!(recorder.errors(), vec![err]);
    assert!(matches!(alice.say(ROOM, "hi").await, Err(SyncError::RoomNotJoined(_))));
}

#[tokio::test(start_paused = true)]
async fn hanging_subscribe_times_out() {
    let hub = MemoryHub::new();
    let alice = SimClient::new(&hub, SimEnv::with_seed(1), SyncConfig::default(), "u1", "Alice").unwrap();
    alice.engine.initialize().await.unwrap();
    alice.link.hang_subscribes(true);

    let started = tokio::time::Instant::now();
    let err = alice.join(ROOM, RecordingObserver::new()).await.unwrap_err();

    assert!(matches!(&err, SyncError::Network(msg) if msg.contains("timed out")), "{err:?}");
    assert!(started.elapsed() >= Duration::from_secs(90));
}

#[tokio::test(start_paused = true)]
async fn closed_channel_is_rejoined() {
    let hub = MemoryHub::new();
    let (alice, recorder) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();
    let (bob, _) = SimClient::joined(&hub, SimEnv::with_seed(2), "u2", "Bob", ROOM).await.unwrap();

    hub.close_room_channels(ROOM, "server restart");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hub.client_channel_count(&alice.link, ROOM), 1);

    recorder.clear();
    bob.say(ROOM, "still here").await.unwrap();
    settle().await;
    let contents: Vec<_> = recorder.message_events().into_iter().map(|e| e.items[0].content.clone()).collect();
    assert_eq!(contents, ["still here"]);
}

#[tokio::test(start_paused = true)]
async fn malformed_event_is_reported_not_applied() {
    let hub = MemoryHub::new();
    let (alice, recorder) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();

    hub.inject(ROOM, &RawChannelEvent::Insert(serde_json::json!({ "id": 42 })));
    settle().await;

    let updates = recorder.updates();
    assert!(updates.iter().any(|u| matches!(u, RoomUpdate::Error(SyncError::Unknown(_)))));
    assert!(recorder.message_events().is_empty());
    assert!(alice.engine.cached_messages(ROOM).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn initialize_requires_identity() {
    let hub = MemoryHub::new();
    let alice = SimClient::new(&hub, SimEnv::with_seed(1), SyncConfig::default(), "u1", "Alice").unwrap();
    alice.link.set_identity(None);

    let err = alice.engine.initialize().await.unwrap_err();
    assert!(matches!(err, SyncError::Auth(_)), "{err:?}");
    let status = alice.engine.status().await;
    assert_eq!(status.status, ConnectionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn cleanup_leaves_everything() {
    let hub = MemoryHub::new();
    let (alice, _) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();
    alice.join("r2", RecordingObserver::new()).await.unwrap();

    alice.engine.cleanup().await;

    assert_eq!(hub.channel_count(ROOM) + hub.channel_count("r2"), 0);
    let health = alice.engine.connection_health().await;
    assert_eq!(health.status, ConnectionStatus::Disconnected);
    assert_eq!((health.active_rooms, health.paused_rooms), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn failed_idle_probe_rejoins_only_that_room() {
    let hub = MemoryHub::new();
    let (alice, _) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    alice.join("r2", RecordingObserver::new()).await.unwrap();

    let subscribes = hub.subscribe_calls();
    let tracks = hub.track_calls();
    alice.link.fail_next_tracks(1);

    // ROOM has been silent for 60s; its presence write fails and it is
    // resubscribed. r2 joined later and is not yet idle.
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert!(hub.track_calls() > tracks);
    assert_eq!(hub.subscribe_calls(), subscribes + 1);
    assert!(alice.engine.is_subscribed(ROOM).await);
    assert_eq!(hub.client_channel_count(&alice.link, ROOM), 1);
    assert!(alice.engine.is_subscribed("r2").await);
    assert_eq!(hub.client_channel_count(&alice.link, "r2"), 1);

    // r2 goes idle next; its presence write succeeds and nothing resubscribes.
    let tracks = hub.track_calls();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(hub.track_calls() > tracks);
    assert_eq!(hub.subscribe_calls(), subscribes + 1);
    assert!(alice.engine.is_subscribed("r2").await);
}

#[tokio::test(start_paused = true)]
async fn room_whose_rejoin_failed_is_retried_after_next_idle_period() {
    let hub = MemoryHub::new();
    let (alice, _) = SimClient::joined(&hub, SimEnv::with_seed(1), "u1", "Alice", ROOM).await.unwrap();
    alice.link.fail_next_tracks(1);
    alice.link.refuse_next_subscribes(3);

    // Probe at 60s fails, and all three rejoin attempts are refused.
    tokio::time::sleep(Duration::from_secs(70)).await;
    assert!(!alice.engine.is_subscribed(ROOM).await);
    assert_eq!(hub.client_channel_count(&alice.link, ROOM), 0);

    // One idle period later the room is rejoined.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(alice.engine.is_subscribed(ROOM).await);
    assert_eq!(hub.client_channel_count(&alice.link, ROOM), 1);
}
