//! The socket-cleanup invariant: after a close, nothing anywhere references
//! the socket or its node.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use serde_json::json;

use common::{basic_gateway, wait_until, TestClient};

#[tokio::test]
async fn close_clears_every_index() {
    let gw = basic_gateway();
    let mut a = TestClient::connect(&gw, "terminal").await;

    a.send(
        &gw,
        json!({
            "type": "register",
            "id": "g1",
            "payload": { "name": "alpha", "capabilities": ["exec"] },
            "timestamp": 1
        }),
    )
    .await;
    let reg = a.recv().await;
    let node_id = reg["nodeId"].as_str().unwrap().to_string();

    a.send(
        &gw,
        json!({
            "type": "join_group",
            "id": "j1",
            "payload": { "name": "ops", "createIfNotExists": true },
            "timestamp": 1
        }),
    )
    .await;
    let joined = a.recv().await;
    let group_id = joined["payload"]["groupId"].as_str().unwrap().to_string();
    assert!(gw.gateway.groups().contains_node(&group_id, &node_id));

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
    let _ack = a.recv().await;

    a.send(
        &gw,
        json!({
            "type": "req:agent",
            "id": "r1",
            "payload": { "content": "work", "sessionKey": "s1" },
            "timestamp": 1
        }),
    )
    .await;
    wait_until(|| gw.invoker.count() == 1).await;

    gw.gateway.handle_disconnect(&a.socket);

    assert!(gw.gateway.subscriptions().subscribers("s1").is_empty());
    assert!(!gw.gateway.groups().contains_node(&group_id, &node_id));
    assert_eq!(gw.gateway.nodes().count(), 0);
    assert_eq!(gw.gateway.connections().len(), 0);
    assert!(gw.invoker.signal(0).is_cancelled());
    assert_eq!(gw.gateway.scheduler().stats().queued, 0);
    wait_until(|| gw.gateway.scheduler().stats().active == 0).await;
    assert!(a.socket.is_closed());
}
