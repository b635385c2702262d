//! Bridge mailbox semantics and the HTTP-send path through the gateway.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::Arc;

use serde_json::json;
use tokio::time::Duration;

use portico_core::protocol::validate;
use portico_gateway::bridge::{Mailbox, POLL_TIMEOUT};

use common::{basic_gateway, TestClient};

#[tokio::test]
async fn queued_messages_return_immediately() {
    let mailbox = Mailbox::new();
    mailbox.push(json!({ "n": 1 }));
    mailbox.push(json!({ "n": 2 }));
    let batch = mailbox.poll(POLL_TIMEOUT).await;
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0]["n"], 1);
    assert!(mailbox.is_empty());
}

#[tokio::test(start_paused = true)]
async fn push_wakes_a_parked_waiter() {
    let mailbox = Arc::new(Mailbox::new());
    let parked = {
        let mailbox = mailbox.clone();
        tokio::spawn(async move { mailbox.poll(POLL_TIMEOUT).await })
    };
    // Let the poll park before pushing.
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    mailbox.push(json!({ "n": 1 }));
    let batch = parked.await.unwrap();
    assert_eq!(batch.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_poll_replaces_the_first() {
    let mailbox = Arc::new(Mailbox::new());
    let first = {
        let mailbox = mailbox.clone();
        tokio::spawn(async move { mailbox.poll(POLL_TIMEOUT).await })
    };
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    let second = {
        let mailbox = mailbox.clone();
        tokio::spawn(async move { mailbox.poll(POLL_TIMEOUT).await })
    };
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    // The superseded poll resolves empty right away.
    let batch = first.await.unwrap();
    assert!(batch.is_empty());

    mailbox.push(json!({ "n": 7 }));
    let batch = second.await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0]["n"], 7);
}

#[tokio::test(start_paused = true)]
async fn empty_poll_resolves_after_the_timeout() {
    let mailbox = Mailbox::new();
    let batch = mailbox.poll(Duration::from_millis(50)).await;
    assert!(batch.is_empty());
}

#[tokio::test]
async fn bridge_node_is_a_full_registry_citizen() {
    let gw = basic_gateway();

    // Registration over the bridge allocates a node and a mailbox.
    let register = validate::parse_envelope(
        &json!({
            "type": "register",
            "id": "b1",
            "client": { "instanceId": "adapter-1", "clientType": "chat-adapter" },
            "payload": { "name": "bridge-adapter" },
            "timestamp": 1
        })
        .to_string(),
    )
    .unwrap();
    let reply = gw.gateway.handle_bridge_send(register).await.unwrap();
    assert_eq!(reply["type"], "registered");
    let node_id = reply["nodeId"].as_str().unwrap().to_string();

    // A WS client can address it directly; the frame lands in the mailbox.
    let mut a = TestClient::connect(&gw, "terminal").await;
    a.send(
        &gw,
        json!({
            "type": "direct",
            "id": "d1",
            "targetNodeId": node_id,
            "payload": { "hello": true },
            "timestamp": 1
        }),
    )
    .await;
    let ack = a.recv().await;
    assert_eq!(ack["payload"]["status"], "sent");

    let mailbox = gw.gateway.bridge_mailbox(&node_id).unwrap();
    let batch = mailbox.poll(Duration::from_millis(100)).await;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0]["type"], "direct");
    assert_eq!(batch[0]["payload"]["hello"], true);

    // Sends from the bridge side flow through normal dispatch.
    let ping = validate::parse_envelope(
        &json!({ "type": "ping", "id": "p1", "nodeId": node_id, "timestamp": 1 }).to_string(),
    )
    .unwrap();
    let reply = gw.gateway.handle_bridge_send(ping).await.unwrap();
    assert_eq!(reply["success"], true);
    // The pong reply lands back in the mailbox.
    let batch = mailbox.poll(Duration::from_millis(100)).await;
    assert_eq!(batch[0]["type"], "pong");

    // Unknown node ids do not resolve a mailbox.
    assert!(gw.gateway.bridge_mailbox("ghost").is_none());
}
