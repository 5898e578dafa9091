//! Property tests for optimistic sends.
//!
//! Random interleavings of sends, rejected inserts and clock advances must
//! leave every send resolved exactly once, on both the sender and a peer.

use std::time::Duration;

use chatsync_core::RoomEventKind;
use chatsync_harness::{InvariantRegistry, MemoryHub, SimClient, SimEnv, SystemSnapshot};
use proptest::prelude::*;

const ROOM: &str = "r1";

#[derive(Debug, Clone)]
enum Op {
    Send,
    RejectNextInsert,
    Advance(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Send),
        1 => Just(Op::RejectNextInsert),
        2 => (1u64..3_000).prop_map(Op::Advance),
    ]
}

struct Outcome {
    succeeded: usize,
    failed: usize,
    replaces: usize,
    deletes: usize,
    peer_news: usize,
    stored: usize,
}

fn run(seed: u64, ops: &[Op]) -> Outcome {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_time().start_paused(true).build().unwrap();

    runtime.block_on(async {
        let hub = MemoryHub::new();
        let (alice, alice_seen) = SimClient::joined(&hub, SimEnv::with_seed(seed), "u1", "Alice", ROOM).await.unwrap();
        let (bob, bob_seen) = SimClient::joined(&hub, SimEnv::with_seed(seed ^ 1), "u2", "Bob", ROOM).await.unwrap();

        let (mut succeeded, mut failed) = (0, 0);
        for (i, op) in ops.iter().enumerate() {
            match op {
                Op::Send => match alice.say(ROOM, &format!("m{i}")).await {
                    Ok(_) => succeeded += 1,
                    Err(_) => failed += 1,
                },
                Op::RejectNextInsert => alice.link.fail_next_inserts(1),
                Op::Advance(ms) => tokio::time::sleep(Duration::from_millis(*ms)).await,
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let registry = InvariantRegistry::standard();
        for (client, seen) in [(&alice, &alice_seen), (&bob, &bob_seen)] {
            let snapshot = SystemSnapshot::capture(&client.engine, &[(ROOM, seen)]).await;
            registry.assert_all(&snapshot, "after random sends");
        }

        let events = alice_seen.message_events();
        let count = |pred: fn(&RoomEventKind) -> bool| events.iter().filter(|e| pred(&e.kind)).count();
        Outcome {
            succeeded,
            failed,
            replaces: count(|k| matches!(k, RoomEventKind::Replace { .. })),
            deletes: count(|k| matches!(k, RoomEventKind::Delete)),
            peer_news: bob_seen.message_events().iter().filter(|e| e.kind == RoomEventKind::New).count(),
            stored: hub.rows(ROOM).len(),
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_send_resolves_once(seed in any::<u64>(), ops in prop::collection::vec(op(), 1..30)) {
        let outcome = run(seed, &ops);

        prop_assert_eq!(outcome.replaces, outcome.succeeded);
        prop_assert_eq!(outcome.deletes, outcome.failed);
        prop_assert_eq!(outcome.stored, outcome.succeeded);
        prop_assert_eq!(outcome.peer_news, outcome.succeeded);
    }
}
