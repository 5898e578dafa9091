//! Engine runs inside turmoil hosts.
//!
//! Turmoil drives the tokio runtime on simulated time, so the same scenario
//! with the same seed must end in the same stored history.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chatsync_core::ConnectionStatus;
use chatsync_harness::{InvariantRegistry, MemoryHub, SimClient, SimEnv, SystemSnapshot};

const ROOM: &str = "lobby";

type History = Vec<(String, String, i64)>;

fn run_scenario(seed: u64) -> History {
    let history = Arc::new(Mutex::new(Vec::new()));
    let out = Arc::clone(&history);

    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(300)).build();
    sim.client("chat", async move {
        let hub = MemoryHub::new();
        let (alice, alice_seen) = SimClient::joined(&hub, SimEnv::with_seed(seed), "u1", "Alice", ROOM).await?;
        let (bob, bob_seen) = SimClient::joined(&hub, SimEnv::with_seed(seed + 1), "u2", "Bob", ROOM).await?;

        for i in 0..5 {
            alice.say(ROOM, &format!("alice {i}")).await?;
            tokio::time::sleep(Duration::from_millis(250)).await;
            bob.say(ROOM, &format!("bob {i}")).await?;
        }

        alice.link.set_reachable(false);
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(alice.say(ROOM, "lost").await.is_err());

        bob.say(ROOM, "anyone there?").await?;
        alice.link.set_reachable(true);
        tokio::time::sleep(Duration::from_secs(30)).await;
        if alice.engine.status().await.status != ConnectionStatus::Connected {
            alice.engine.force_reconnect().await?;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        alice.say(ROOM, "back").await?;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let registry = InvariantRegistry::standard();
        for (client, seen) in [(&alice, &alice_seen), (&bob, &bob_seen)] {
            let snapshot = SystemSnapshot::capture(&client.engine, &[(ROOM, seen)]).await;
            registry.assert_all(&snapshot, &format!("for {}", client.identity.user_id));
        }

        let contents: Vec<_> = bob.engine.cached_messages(ROOM).await.into_iter().map(|m| m.content).collect();
        assert!(contents.contains(&"back".to_string()));
        assert!(!contents.contains(&"lost".to_string()));

        *out.lock().unwrap() =
            hub.rows(ROOM).into_iter().map(|r| (r.id, r.content, r.created_at)).collect::<History>();

        alice.engine.cleanup().await;
        bob.engine.cleanup().await;
        Ok(())
    });

    sim.run().expect("simulation failed");
    let history = history.lock().unwrap().clone();
    history
}

#[test]
fn scenario_survives_network_loss() {
    let history = run_scenario(11);
    assert_eq!(history.len(), 12);
    assert_eq!(history.last().map(|(_, content, _)| content.as_str()), Some("back"));
}

#[test]
fn same_seed_same_history() {
    assert_eq!(run_scenario(5), run_scenario(5));
}
