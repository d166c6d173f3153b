//! Presence and Awareness Example
//!
//! Three peers publish who they are and where their cursor is, forward
//! awareness updates to each other, and evict a peer that stops renewing
//! its state.
//!
//! Run with: cargo run --example presence_demo

use serde_json::json;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use ynb_doc::{Awareness, AwarenessConfig, AwarenessOrigin, Result};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Send one peer's own entry to every other peer.
fn broadcast(from: &Awareness, peers: &[&Awareness]) -> Result<()> {
    let bytes = from.encode_update(&[from.client_id()]).encode()?;
    let update = ynb_doc::AwarenessUpdate::decode(&bytes)?;
    for peer in peers.iter().filter(|p| p.client_id() != from.client_id()) {
        peer.apply_update(&update, AwarenessOrigin::Remote);
    }
    Ok(())
}

fn print_peers(awareness: &Awareness) {
    let mut states: Vec<_> = awareness.states().into_iter().collect();
    states.sort_by_key(|(client, _)| *client);
    println!("Peers seen by client {}:", awareness.client_id());
    for (client, state) in states {
        println!("  {} -> {}", client, state);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Presence and Awareness Demo ===\n");

    let config = AwarenessConfig::builder()
        .check_interval(Duration::from_millis(100))
        .renew_after(Duration::from_millis(200))
        .outdated_timeout(Duration::from_millis(400))
        .build();

    let alice = Awareness::new(1, &config);
    let bob = Awareness::new(2, &config);
    let carol = Awareness::new(3, &config);
    let peers = [&alice, &bob, &carol];

    for (awareness, name, color) in [(&alice, "Alice", "#0066cc"), (&bob, "Bob", "#cc6600"), (&carol, "Carol", "#00cc66")] {
        awareness.set_local_state_field("user", json!({ "name": name, "color": color }));
    }
    alice.set_local_state_field("cursor", json!({ "cell": 0, "offset": 4 }));
    bob.set_local_state_field("cursor", json!({ "cell": 2, "offset": 0 }));

    for awareness in peers {
        broadcast(awareness, &peers)?;
    }
    print_peers(&alice);
    println!();

    // Watch what Alice learns from here on
    let mut alice_changes = alice.subscribe_changes();

    // A stale update (older clock) is ignored
    let stale = bob.encode_update(&[bob.client_id()]);
    bob.set_local_state_field("cursor", json!({ "cell": 3, "offset": 7 }));
    broadcast(&bob, &peers)?;
    alice.apply_update(&stale, AwarenessOrigin::Remote);
    println!("Bob's cursor at Alice after a stale replay: {}", alice.states()[&2]["cursor"]);

    // Alice and Bob keep heartbeating; Carol goes quiet
    let alice_loop = alice.spawn_check_loop();
    let bob_loop = bob.spawn_check_loop();
    let mut alice_updates = alice.subscribe_updates();
    let mut bob_updates = bob.subscribe_updates();

    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        while alice_updates.try_recv().is_ok() {
            broadcast(&alice, &peers)?;
        }
        while bob_updates.try_recv().is_ok() {
            broadcast(&bob, &peers)?;
        }
    }

    // Carol's entry is now outdated at Alice
    alice.check_at(now_millis());
    while let Ok(event) = alice_changes.try_recv() {
        println!("Alice saw {:?} change: {:?}", event.origin, event.change);
    }
    println!();
    print_peers(&alice);

    // Bob leaves cleanly
    bob.set_local_state(None);
    broadcast(&bob, &peers)?;
    println!("\nAfter Bob left, Alice knows {} peer(s)", alice.states().len());

    alice.destroy();
    bob.destroy();
    carol.destroy();
    let _ = tokio::join!(alice_loop, bob_loop);

    Ok(())
}
