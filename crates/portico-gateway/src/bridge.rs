//! HTTP long-poll bridge.
//!
//! Presents an equivalent message channel to clients that cannot hold a
//! WebSocket: `/bridge/send` accepts gateway envelopes, `/bridge/poll`
//! long-polls the node's mailbox. A bridge node is a full registry citizen;
//! its socket's outbound path lands here instead of a WS writer task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};

use portico_core::error::{ErrorCode, GatewayError};
use portico_core::protocol::validate;

use crate::app_state::AppState;

/// How long a poll parks before resolving with whatever has arrived.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(30);

enum Wake {
    /// A message arrived; drain the queue.
    Message,
    /// A newer poll took over; resolve empty immediately.
    Replaced,
}

/// Per-node FIFO plus at most one parked waiter. A second concurrent poll
/// replaces the first (clients should not long-poll twice).
#[derive(Default)]
pub struct Mailbox {
    queue: Mutex<VecDeque<Value>>,
    waiter: Mutex<Option<(u64, oneshot::Sender<Wake>)>>,
    waiter_seq: AtomicU64,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: Value) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(message);
        if let Some((_, tx)) = self
            .waiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(Wake::Message);
        }
    }

    fn drain(&self) -> Vec<Value> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return queued messages immediately, or park for up to `wait` and
    /// return whatever has arrived by then (possibly nothing).
    pub async fn poll(&self, wait: Duration) -> Vec<Value> {
        let batch = self.drain();
        if !batch.is_empty() {
            return batch;
        }

        let (tx, rx) = oneshot::channel();
        let seq = self.waiter_seq.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut waiter = self.waiter.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((_, old)) = waiter.replace((seq, tx)) {
                let _ = old.send(Wake::Replaced);
            }
        }

        let wake = timeout(wait, rx).await;
        {
            // Clear our own parking slot; a newer waiter stays put.
            let mut waiter = self.waiter.lock().unwrap_or_else(PoisonError::into_inner);
            if waiter.as_ref().map(|(s, _)| *s) == Some(seq) {
                *waiter = None;
            }
        }
        match wake {
            Ok(Ok(Wake::Replaced)) => Vec::new(),
            _ => self.drain(),
        }
    }
}

/// node id -> mailbox, for bridge-registered nodes.
#[derive(Default)]
pub struct BridgeMailboxes {
    boxes: dashmap::DashMap<String, Arc<Mailbox>>,
}

impl BridgeMailboxes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, node_id: &str, mailbox: Arc<Mailbox>) {
        self.boxes.insert(node_id.to_string(), mailbox);
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<Mailbox>> {
        self.boxes.get(node_id).map(|r| r.value().clone())
    }

    pub fn remove(&self, node_id: &str) {
        self.boxes.remove(node_id);
    }

    pub fn count(&self) -> usize {
        self.boxes.len()
    }
}

/// HTTP error shape for the bridge endpoints.
struct HttpError(GatewayError);

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = match code {
            ErrorCode::InvalidMessage
            | ErrorCode::InvalidConnect
            | ErrorCode::InvalidRequest
            | ErrorCode::UnknownMessageType => StatusCode::BAD_REQUEST,
            ErrorCode::AuthRequired | ErrorCode::AuthFailed => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NodeNotFound | ErrorCode::GroupNotFound => StatusCode::NOT_FOUND,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": code.as_str(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

pub async fn send(State(state): State<AppState>, body: Bytes) -> Response {
    let raw = match std::str::from_utf8(&body) {
        Ok(raw) => raw,
        Err(e) => {
            return HttpError(GatewayError::InvalidMessage(format!("body not utf-8: {e}")))
                .into_response()
        }
    };
    let env = match validate::parse_envelope(raw) {
        Ok(env) => env,
        Err(e) => return HttpError(e).into_response(),
    };
    match state.gateway().handle_bridge_send(env).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => HttpError(e).into_response(),
    }
}

pub async fn poll(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let node_id = match headers.get("x-node-id").and_then(|v| v.to_str().ok()) {
        Some(id) => id.to_string(),
        None => {
            return HttpError(GatewayError::InvalidRequest(
                "X-Node-ID header required".into(),
            ))
            .into_response()
        }
    };
    let gateway = state.gateway();
    let Some(mailbox) = gateway.bridge_mailbox(&node_id) else {
        return HttpError(GatewayError::NodeNotFound(node_id)).into_response();
    };
    // A poll is proof of life for the node.
    gateway.touch_node(&node_id);
    let messages = mailbox.poll(POLL_TIMEOUT).await;
    Json(json!({ "messages": messages })).into_response()
}
