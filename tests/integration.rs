//! End-to-end scenarios from spec.md §8, driven against real loopback UDP
//! sockets with shortened timings ("T_probe=0.1s for faster tests").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use swim_gossip::config::Timings;
use swim_gossip::node::Node;
use swim_gossip::Value;

static NEXT_PORT: AtomicU16 = AtomicU16::new(17_000);

fn next_port() -> u16 {
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

fn fast_timings() -> Timings {
    Timings {
        t_probe: Duration::from_millis(100),
        t_ping: Duration::from_millis(50),
        t_ping_req: Duration::from_millis(50),
        t_suspect: Duration::from_millis(300),
        t_dead: Duration::from_millis(2000),
        t_sync: Duration::from_millis(300),
        indirect_fanout: 3,
        bootstrap_timeout: Duration::from_secs(1),
    }
}

async fn spawn_node(seeds: Vec<String>) -> std::sync::Arc<Node> {
    let port = next_port();
    let node = Node::create_with_timings("127.0.0.1", port, seeds, HashMap::new(), fast_timings())
        .await
        .expect("node should bind");
    node.start().await;
    node
}

/// S1 — Single-node startup.
#[tokio::test(flavor = "multi_thread")]
async fn single_node_startup() {
    let a = spawn_node(vec![]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(a.members().len(), 1);
    assert_eq!(a.members()[0].address, *a.address());
    assert!(a.alive_members().is_empty());

    a.stop();
}

/// S2 — Two-node join.
#[tokio::test(flavor = "multi_thread")]
async fn two_node_join() {
    let a = spawn_node(vec![]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let seeds = vec![a.address().to_string()];
    let b = spawn_node(seeds).await;

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(a.alive_members(), vec![b.address().clone()]);
    assert_eq!(b.alive_members(), vec![a.address().clone()]);

    a.stop();
    b.stop();
}

/// S4 — False positive refutation: a suspected member should refute by
/// bumping its own incarnation and broadcasting alive.
#[tokio::test(flavor = "multi_thread")]
async fn false_positive_refutation() {
    let a = spawn_node(vec![]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let b = spawn_node(vec![a.address().to_string()]).await;

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(a.alive_members(), vec![b.address().clone()]);

    let b_incarnation_before = b
        .members()
        .into_iter()
        .find(|m| m.address == *b.address())
        .unwrap()
        .incarnation;

    // Inject a suspect message about B directly at A's socket.
    let suspect = swim_gossip::codec::Message::Suspect {
        sender: a.address().clone(),
        target: b.address().clone(),
        incarnation: b_incarnation_before,
        timestamp: 0.0,
    };
    let bytes = {
        use swim_gossip::codec::Codec;
        swim_gossip::codec::BincodeCodec.encode(&suspect).unwrap()
    };
    let sock = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sock.send_to(&bytes, a.address().as_str()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    let b_view = b.members().into_iter().find(|m| m.address == *b.address()).unwrap();
    assert!(b_view.incarnation > b_incarnation_before);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(a.alive_members(), vec![b.address().clone()]);
    let a_view_of_b = a.members().into_iter().find(|m| m.address == *b.address()).unwrap();
    assert!(a_view_of_b.incarnation >= b_incarnation_before + 1);

    a.stop();
    b.stop();
}

/// S5 — State sync via anti-entropy.
#[tokio::test(flavor = "multi_thread")]
async fn state_sync_converges() {
    let a = spawn_node(vec![]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let b = spawn_node(vec![a.address().to_string()]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let c = spawn_node(vec![a.address().to_string()]).await;

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(a.set_metadata("k", Value::Str("v1".into()), None));

    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(b.get_metadata("k", None), Some(Value::Str("v1".into())));
    assert_eq!(c.get_metadata("k", None), Some(Value::Str("v1".into())));

    assert!(c.set_metadata("k", Value::Str("v2".into()), None));
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(a.get_metadata("k", None), Some(Value::Str("v2".into())));
    assert_eq!(b.get_metadata("k", None), Some(Value::Str("v2".into())));

    a.stop();
    b.stop();
    c.stop();
}

/// spec.md §8 invariant 4: `add(m); add(m)` is idempotent (exercised here
/// through the public API by joining twice).
#[tokio::test(flavor = "multi_thread")]
async fn repeated_join_is_idempotent() {
    let a = spawn_node(vec![]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let b = spawn_node(vec![a.address().to_string()]).await;

    tokio::time::sleep(Duration::from_millis(800)).await;
    let before = a.members().len();

    // A second join from B should not duplicate the member.
    let join = swim_gossip::codec::Message::Join { sender: b.address().clone(), timestamp: 0.0 };
    let bytes = {
        use swim_gossip::codec::Codec;
        swim_gossip::codec::BincodeCodec.encode(&join).unwrap()
    };
    let sock = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sock.send_to(&bytes, a.address().as_str()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(a.members().len(), before);

    a.stop();
    b.stop();
}
