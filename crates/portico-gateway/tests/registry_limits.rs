//! Registration cap, rate limiting, and staleness.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::time::Duration;

use serde_json::json;

use portico_gateway::registry::RATE_LIMIT_MAX;

use common::{basic_gateway, gateway_with, TestClient};

const CAPPED_CFG: &str = r#"
gateway:
  max_nodes: 1
agents:
  - id: "a1"
    default: true
"#;

fn register_frame(id: &str, name: &str) -> serde_json::Value {
    json!({
        "type": "register",
        "id": id,
        "payload": { "name": name },
        "timestamp": 1
    })
}

#[tokio::test]
async fn registration_cap_refuses_without_allocating() {
    let gw = gateway_with(CAPPED_CFG);
    let mut a = TestClient::connect(&gw, "terminal").await;
    let mut b = TestClient::connect(&gw, "terminal").await;

    a.send(&gw, register_frame("g1", "alpha")).await;
    let reg = a.recv().await;
    assert_eq!(reg["type"], "registered");
    assert_eq!(reg["nodeId"], "node-1");

    b.send(&gw, register_frame("g2", "beta")).await;
    let err = b.recv().await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["payload"]["code"], "MAX_NODES_REACHED");
    assert_eq!(gw.gateway.nodes().count(), 1);

    // Ids are monotonic: the refused registration did not consume one, and
    // freed capacity never reuses an id.
    a.send(
        &gw,
        json!({ "type": "unregister", "id": "u1", "timestamp": 1 }),
    )
    .await;
    let _ack = a.recv().await;
    b.send(&gw, register_frame("g3", "beta")).await;
    let reg = b.recv().await;
    assert_eq!(reg["nodeId"], "node-2");
}

#[tokio::test]
async fn rate_limit_spares_ping_pong_and_register() {
    let gw = basic_gateway();
    let mut a = TestClient::connect(&gw, "terminal").await;
    a.send(&gw, register_frame("g1", "alpha")).await;
    let reg = a.recv().await;
    let node_id = reg["nodeId"].as_str().unwrap().to_string();

    for _ in 0..RATE_LIMIT_MAX {
        gw.gateway.nodes().record_message(&node_id);
    }
    assert!(gw.gateway.nodes().is_rate_limited(&node_id));

    // Ordinary traffic is rejected...
    a.send(
        &gw,
        json!({
            "type": "session_subscribe",
            "id": "s1",
            "payload": { "sessionId": "s1" },
            "timestamp": 1
        }),
    )
    .await;
    let err = a.recv().await;
    assert_eq!(err["payload"]["code"], "RATE_LIMITED");

    // ...but liveness and registration never are.
    a.send(&gw, json!({ "type": "ping", "id": "p1", "timestamp": 1 }))
        .await;
    let pong = a.recv().await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["id"], "p1");

    a.send(&gw, json!({ "type": "pong", "id": "p2", "timestamp": 1 }))
        .await;
    a.expect_silence().await;

    a.send(&gw, register_frame("g2", "alpha-again")).await;
    let reg = a.recv().await;
    assert_eq!(reg["type"], "registered");
}

#[tokio::test]
async fn stale_nodes_are_swept() {
    let gw = basic_gateway();
    let mut a = TestClient::connect(&gw, "terminal").await;
    a.send(&gw, register_frame("g1", "alpha")).await;
    let _reg = a.recv().await;

    // A generous timeout keeps a fresh node alive.
    assert!(gw
        .gateway
        .nodes()
        .remove_stale(Duration::from_secs(60))
        .is_empty());

    // A zero timeout evicts it.
    let evicted = gw.gateway.nodes().remove_stale(Duration::ZERO);
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].0, "node-1");
    assert_eq!(gw.gateway.nodes().count(), 0);
}
