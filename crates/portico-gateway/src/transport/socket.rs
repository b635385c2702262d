//! The socket handle.
//!
//! A `Socket` owns the outbound path for one client: either the mpsc queue
//! drained by a WebSocket writer task, or a bridge mailbox for HTTP long-poll
//! clients. Writes are serialized by construction; JSON encoding happens on
//! the caller's task, only the queue push is shared.
//!
//! Socket-scoped state (authenticated flag, client identity, node id,
//! transport user) lives here so teardown can run from any component.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use portico_core::protocol::{ClientType, Envelope};

use crate::bridge::Mailbox;

pub type SocketId = u64;

static SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);
static DROP_COUNT: AtomicU64 = AtomicU64::new(0);

/// How long a reliable send waits for queue space before giving the socket up
/// for dead.
const RELIABLE_SEND_TIMEOUT: Duration = Duration::from_millis(1500);

fn sample_every_1024(n: u64) -> bool {
    (n & 1023) == 1
}

enum Sink {
    /// WebSocket: frames go to the writer task.
    Channel(mpsc::Sender<Message>),
    /// HTTP bridge: frames go to the node's mailbox.
    Mailbox(Arc<Mailbox>),
}

#[derive(Default)]
struct SocketState {
    authenticated: bool,
    client_id: Option<String>,
    client_type: Option<ClientType>,
    node_id: Option<String>,
    transport_user: Option<String>,
}

pub struct Socket {
    id: SocketId,
    sink: Sink,
    closed: CancellationToken,
    state: Mutex<SocketState>,
}

impl Socket {
    pub fn channel(tx: mpsc::Sender<Message>) -> Arc<Self> {
        Arc::new(Self {
            id: SOCKET_SEQ.fetch_add(1, Ordering::Relaxed) + 1,
            sink: Sink::Channel(tx),
            closed: CancellationToken::new(),
            state: Mutex::new(SocketState::default()),
        })
    }

    pub fn bridge(mailbox: Arc<Mailbox>) -> Arc<Self> {
        Arc::new(Self {
            id: SOCKET_SEQ.fetch_add(1, Ordering::Relaxed) + 1,
            sink: Sink::Mailbox(mailbox),
            closed: CancellationToken::new(),
            state: Mutex::new(SocketState::default()),
        })
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SocketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().authenticated
    }

    pub fn set_authenticated(&self, client_id: String, client_type: ClientType) {
        let mut st = self.state();
        st.authenticated = true;
        st.client_id = Some(client_id);
        st.client_type = Some(client_type);
    }

    pub fn client_id(&self) -> Option<String> {
        self.state().client_id.clone()
    }

    pub fn client_type(&self) -> Option<ClientType> {
        self.state().client_type
    }

    pub fn node_id(&self) -> Option<String> {
        self.state().node_id.clone()
    }

    pub fn set_node_id(&self, node_id: String) {
        self.state().node_id = Some(node_id);
    }

    pub fn clear_node_id(&self) {
        self.state().node_id = None;
    }

    pub fn transport_user(&self) -> Option<String> {
        self.state().transport_user.clone()
    }

    pub fn set_transport_user(&self, user: String) {
        self.state().transport_user = Some(user);
    }

    /// Lossy send: if the outbound queue is full, the frame is dropped and
    /// counted. Used for everything where a slow client must not stall the
    /// gateway (heartbeats, fan-out copies).
    pub fn send(&self, env: &Envelope) -> bool {
        match &self.sink {
            Sink::Channel(tx) => match serde_json::to_string(env) {
                Ok(s) => {
                    if tx.try_send(Message::Text(s)).is_err() {
                        let n = DROP_COUNT.fetch_add(1, Ordering::Relaxed);
                        if sample_every_1024(n) {
                            tracing::warn!(socket = self.id, drops = n, "egress drop (queue full)");
                        }
                        return false;
                    }
                    true
                }
                Err(e) => {
                    tracing::warn!(socket = self.id, err = %e, "json encode failed");
                    false
                }
            },
            Sink::Mailbox(mailbox) => match serde_json::to_value(env) {
                Ok(v) => {
                    mailbox.push(v);
                    true
                }
                Err(e) => {
                    tracing::warn!(socket = self.id, err = %e, "json encode failed");
                    false
                }
            },
        }
    }

    /// Reliable send: waits for queue space (bounded). Used on the agent
    /// event path to the originator, where forward progress matters more
    /// than latency.
    pub async fn send_reliable(&self, env: &Envelope) -> bool {
        match &self.sink {
            Sink::Channel(tx) => {
                let s = match serde_json::to_string(env) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(socket = self.id, err = %e, "json encode failed");
                        return false;
                    }
                };
                if tx.try_send(Message::Text(s.clone())).is_ok() {
                    return true;
                }
                matches!(
                    timeout(RELIABLE_SEND_TIMEOUT, tx.send(Message::Text(s))).await,
                    Ok(Ok(()))
                )
            }
            Sink::Mailbox(_) => self.send(env),
        }
    }

    /// Signal the connection loop to shut this socket down.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}
