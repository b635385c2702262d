//! Envelope parsing vectors.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use portico_core::protocol::{validate, Attachment, ClientType, Envelope, MessageType};
use portico_core::ErrorCode;

#[test]
fn parse_connect_min() {
    let raw = r#"{
        "type": "connect",
        "id": "h1",
        "client": { "instanceId": "c1", "clientType": "webui" },
        "timestamp": 1722500000000
    }"#;
    let env = validate::parse_envelope(raw).unwrap();
    assert_eq!(env.kind, MessageType::Connect);
    assert_eq!(env.id.as_deref(), Some("h1"));
    let client = env.client.unwrap();
    assert_eq!(client.instance_id, "c1");
    assert_eq!(client.client_type, ClientType::Webui);
    assert!(client.version.is_none());
}

#[test]
fn parse_agent_request_full() {
    let raw = r#"{
        "type": "req:agent",
        "id": "r1",
        "payload": {
            "content": "hello",
            "agentId": "a1",
            "routing": { "channel": "support", "threadTs": "123.456" },
            "attachments": [
                { "kind": "image", "mimeType": "image/png", "dataUrl": "data:image/png;base64,AA==" },
                { "kind": "file", "name": "notes.txt", "textContent": "hi" }
            ],
            "queueIfBusy": false
        },
        "timestamp": 1722500000000
    }"#;
    let env = validate::parse_envelope(raw).unwrap();
    assert_eq!(env.kind, MessageType::AgentRequest);

    let payload: portico_core::protocol::AgentRequestPayload = validate::payload(&env).unwrap();
    assert_eq!(payload.content, "hello");
    assert_eq!(payload.agent_id.as_deref(), Some("a1"));
    assert!(!payload.queue_if_busy());
    assert_eq!(payload.attachments.len(), 2);
    assert!(matches!(payload.attachments[0], Attachment::Image { .. }));

    let routing = payload.routing.unwrap();
    assert_eq!(routing.channel.as_deref(), Some("support"));
    // Hints beyond channel/peer are preserved opaquely.
    assert!(routing.extra.contains_key("threadTs"));
}

#[test]
fn unknown_type_is_distinct_from_malformed() {
    let unknown = r#"{ "type": "warp", "timestamp": 1 }"#;
    let err = validate::parse_envelope(unknown).unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownMessageType);

    let malformed = r#"{ "type": "ping", "timestamp": "not-a-number" }"#;
    let err = validate::parse_envelope(malformed).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidMessage);

    let not_json = "{nope";
    let err = validate::parse_envelope(not_json).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidMessage);
}

#[test]
fn timestamp_is_required() {
    let raw = r#"{ "type": "ping" }"#;
    let err = validate::parse_envelope(raw).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidMessage);
}

#[test]
fn error_envelope_shape() {
    let env = Envelope::error(ErrorCode::GroupNotFound, "group not found: ops");
    let s = serde_json::to_string(&env).unwrap();
    let v: serde_json::Value = serde_json::from_str(&s).unwrap();
    assert_eq!(v["type"], "error");
    assert_eq!(v["payload"]["code"], "GROUP_NOT_FOUND");
    assert!(v["timestamp"].as_u64().unwrap() > 0);
    // Optional fields stay off the wire entirely.
    assert!(v.get("nodeId").is_none());
    assert!(v.get("ok").is_none());
}

#[test]
fn outbound_round_trips_through_validator() {
    let env = Envelope::agent_event("r9", serde_json::json!({ "type": "token", "text": "hi" }));
    let s = serde_json::to_string(&env).unwrap();
    let back = validate::parse_envelope(&s).unwrap();
    assert_eq!(back.kind, MessageType::AgentEvent);
    assert_eq!(back.id.as_deref(), Some("r9"));
    assert_eq!(back.payload.unwrap()["text"], "hi");
}

#[test]
fn client_type_unknown_is_tolerated() {
    let raw = r#"{
        "type": "connect",
        "client": { "instanceId": "x", "clientType": "fridge" },
        "timestamp": 1
    }"#;
    let env = validate::parse_envelope(raw).unwrap();
    assert_eq!(env.client.unwrap().client_type, ClientType::Unknown);
}
