//! Agent request / event payload shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event sub-types the fan-out path must preserve. Anything else coming out
/// of an invoker is passed through opaquely.
pub mod event {
    pub const SESSION_MESSAGE: &str = "session-message";
    pub const REQUEST_QUEUED: &str = "request-queued";
    pub const AGENT_ERROR: &str = "agent-error";
    /// Wrapper type for non-object events emitted by an invoker.
    pub const AGENT_EVENT: &str = "agent-event";
}

/// `req:agent` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequestPayload {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingHints>,
    /// Default true: a busy session queues the request instead of refusing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_if_busy: Option<bool>,
}

impl AgentRequestPayload {
    pub fn queue_if_busy(&self) -> bool {
        self.queue_if_busy.unwrap_or(true)
    }
}

/// Attachments are tagged by kind and carry whichever representation the
/// client had on hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Attachment {
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_url: Option<String>,
    },
    Audio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_url: Option<String>,
    },
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text_content: Option<String>,
    },
}

/// Routing hints are opaque to the core; the router reads the well-known
/// `channel`/`peer` fields and ignores the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `req:agent:cancel` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCancelPayload {
    pub request_id: String,
}
