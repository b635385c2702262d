//! Gateway envelope (JSON).
//!
//! The envelope is the only frame shape on the wire. All fields except `type`
//! and `timestamp` are optional; `payload` stays a `serde_json::Value` so each
//! handler deserializes it per type.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ErrorCode;

/// Closed set of frame types. Unknown strings are rejected before envelope
/// decoding so clients get `UNKNOWN_MESSAGE_TYPE` instead of a generic parse
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "connect")]
    Connect,
    #[serde(rename = "register")]
    Register,
    #[serde(rename = "unregister")]
    Unregister,
    #[serde(rename = "session_subscribe")]
    SessionSubscribe,
    #[serde(rename = "session_unsubscribe")]
    SessionUnsubscribe,
    #[serde(rename = "join_group")]
    JoinGroup,
    #[serde(rename = "leave_group")]
    LeaveGroup,
    #[serde(rename = "broadcast")]
    Broadcast,
    #[serde(rename = "direct")]
    Direct,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "req:agent")]
    AgentRequest,
    #[serde(rename = "req:agent:cancel")]
    AgentCancel,
    #[serde(rename = "res")]
    Res,
    #[serde(rename = "ack")]
    Ack,
    #[serde(rename = "registered")]
    Registered,
    #[serde(rename = "event:agent")]
    AgentEvent,
    #[serde(rename = "error")]
    Error,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Connect => "connect",
            MessageType::Register => "register",
            MessageType::Unregister => "unregister",
            MessageType::SessionSubscribe => "session_subscribe",
            MessageType::SessionUnsubscribe => "session_unsubscribe",
            MessageType::JoinGroup => "join_group",
            MessageType::LeaveGroup => "leave_group",
            MessageType::Broadcast => "broadcast",
            MessageType::Direct => "direct",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::AgentRequest => "req:agent",
            MessageType::AgentCancel => "req:agent:cancel",
            MessageType::Res => "res",
            MessageType::Ack => "ack",
            MessageType::Registered => "registered",
            MessageType::AgentEvent => "event:agent",
            MessageType::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let t = match s {
            "connect" => MessageType::Connect,
            "register" => MessageType::Register,
            "unregister" => MessageType::Unregister,
            "session_subscribe" => MessageType::SessionSubscribe,
            "session_unsubscribe" => MessageType::SessionUnsubscribe,
            "join_group" => MessageType::JoinGroup,
            "leave_group" => MessageType::LeaveGroup,
            "broadcast" => MessageType::Broadcast,
            "direct" => MessageType::Direct,
            "ping" => MessageType::Ping,
            "pong" => MessageType::Pong,
            "req:agent" => MessageType::AgentRequest,
            "req:agent:cancel" => MessageType::AgentCancel,
            "res" => MessageType::Res,
            "ack" => MessageType::Ack,
            "registered" => MessageType::Registered,
            "event:agent" => MessageType::AgentEvent,
            "error" => MessageType::Error,
            _ => return None,
        };
        Some(t)
    }

    /// Inbound types that bypass the per-node rate limit.
    pub fn is_rate_limit_exempt(self) -> bool {
        matches!(
            self,
            MessageType::Ping | MessageType::Pong | MessageType::Register
        )
    }
}

/// Client class declared at handshake. Drives fan-out policy (webui/desktop
/// clients receive session mirrors they are not subscribed to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Terminal,
    Webui,
    Desktop,
    #[serde(rename = "chat-adapter")]
    ChatAdapter,
    Bridge,
    #[serde(other)]
    Unknown,
}

/// Client identity presented at handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub instance_id: String,
    pub client_type: ClientType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Credentials presented at handshake. Interpretation depends on the
/// configured auth mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// The gateway frame. `timestamp` is millisecond epoch and required in both
/// directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub timestamp: u64,
}

/// Millisecond epoch timestamp for outbound envelopes.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl Envelope {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            id: None,
            client: None,
            auth: None,
            ok: None,
            client_id: None,
            node_id: None,
            group_id: None,
            target_node_id: None,
            payload: None,
            timestamp: now_millis(),
        }
    }

    /// `res` reply to a `connect`.
    pub fn res(id: Option<String>, ok: bool, payload: Value) -> Self {
        let mut env = Self::new(MessageType::Res);
        env.id = id;
        env.ok = Some(ok);
        env.payload = Some(payload);
        env
    }

    /// Acknowledgement; `payload` carries `action` and an action-specific
    /// status.
    pub fn ack(id: Option<String>, payload: Value) -> Self {
        let mut env = Self::new(MessageType::Ack);
        env.id = id;
        env.payload = Some(payload);
        env
    }

    /// `registered` reply after node registration.
    pub fn registered(id: Option<String>, node_id: &str, payload: Value) -> Self {
        let mut env = Self::new(MessageType::Registered);
        env.id = id;
        env.node_id = Some(node_id.to_string());
        env.payload = Some(payload);
        env
    }

    /// Agent stream event; `id` correlates back to the originating request.
    pub fn agent_event(request_id: &str, payload: Value) -> Self {
        let mut env = Self::new(MessageType::AgentEvent);
        env.id = Some(request_id.to_string());
        env.payload = Some(payload);
        env
    }

    /// Error envelope with the canonical `{code, message}` payload.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        let mut env = Self::new(MessageType::Error);
        env.payload = Some(json!({
            "code": code.as_str(),
            "message": message.into(),
        }));
        env
    }

    /// Error envelope carrying extra details.
    pub fn error_with_details(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        let mut env = Self::new(MessageType::Error);
        env.payload = Some(json!({
            "code": code.as_str(),
            "message": message.into(),
            "details": details,
        }));
        env
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping)
    }

    /// Pong reply; echoes the ping's `id` so clients can measure RTT.
    pub fn pong(id: Option<String>) -> Self {
        let mut env = Self::new(MessageType::Pong);
        env.id = id;
        env
    }
}
