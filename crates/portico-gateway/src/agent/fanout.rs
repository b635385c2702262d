//! Fan-out policies for agent events.
//!
//! Three delivery shapes: to a session's subscribers, to connected clients
//! filtered by class, and the canonical agent-error envelope. All sends on
//! these paths are lossy per socket; the scheduler uses the socket's
//! reliable path for the originator separately.

use std::sync::Arc;

use serde_json::json;

use portico_core::protocol::{agent::event, ClientType, Envelope};

use crate::registry::{ConnectionRegistry, SubscriptionIndex};
use crate::transport::{Socket, SocketId};

#[derive(Debug, Default)]
pub struct ClientFilter<'a> {
    pub exclude: Option<SocketId>,
    /// Empty means any class.
    pub client_types: &'a [ClientType],
    /// Skip clients already subscribed to this session (avoids duplicate
    /// delivery when combined with a session broadcast).
    pub skip_session: Option<&'a str>,
}

#[derive(Debug, Default)]
pub struct AgentErrorOpts<'a> {
    pub session_id: Option<&'a str>,
    pub agent_id: Option<&'a str>,
    pub broadcast_to_session: bool,
    pub exclude: Option<SocketId>,
}

pub struct EventFanout {
    connections: Arc<ConnectionRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
}

impl EventFanout {
    pub fn new(connections: Arc<ConnectionRegistry>, subscriptions: Arc<SubscriptionIndex>) -> Self {
        Self {
            connections,
            subscriptions,
        }
    }

    /// Deliver to every subscriber of `session_id` except `exclude`.
    /// Returns the delivered count.
    pub fn broadcast_session_event(
        &self,
        session_id: &str,
        env: &Envelope,
        exclude: Option<SocketId>,
    ) -> usize {
        let mut delivered = 0;
        for socket_id in self.subscriptions.subscribers(session_id) {
            if Some(socket_id) == exclude {
                continue;
            }
            if let Some(socket) = self.connections.get(socket_id) {
                if socket.send(env) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Deliver to every connected, authenticated client passing the filter.
    pub fn broadcast_to_clients(&self, env: &Envelope, filter: &ClientFilter<'_>) -> usize {
        let mut delivered = 0;
        for socket in self.connections.snapshot() {
            if !socket.is_authenticated() {
                continue;
            }
            if Some(socket.id()) == filter.exclude {
                continue;
            }
            if !filter.client_types.is_empty() {
                let class = socket.client_type();
                if !class.map(|c| filter.client_types.contains(&c)).unwrap_or(false) {
                    continue;
                }
            }
            if let Some(session) = filter.skip_session {
                if self.subscriptions.is_subscribed(socket.id(), session) {
                    continue;
                }
            }
            if socket.send(env) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Canonical agent-error envelope to `socket`, optionally fanned out to
    /// the session's other subscribers so every observer sees the failure.
    pub fn send_agent_error(
        &self,
        socket: &Socket,
        request_id: &str,
        message: &str,
        opts: AgentErrorOpts<'_>,
    ) {
        let mut payload = json!({
            "type": event::AGENT_ERROR,
            "error": message,
        });
        if let Some(session_id) = opts.session_id {
            payload["sessionId"] = json!(session_id);
        }
        if let Some(agent_id) = opts.agent_id {
            payload["agentId"] = json!(agent_id);
        }
        let env = Envelope::agent_event(request_id, payload);
        socket.send(&env);
        if opts.broadcast_to_session {
            if let Some(session_id) = opts.session_id {
                self.broadcast_session_event(session_id, &env, opts.exclude.or(Some(socket.id())));
            }
        }
    }
}
