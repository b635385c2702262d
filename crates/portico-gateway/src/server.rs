//! Gateway composition and lifecycle.
//!
//! `Gateway` owns the registries, the scheduler, the fan-out, and the bridge
//! mailboxes, and runs the dispatch switch for every inbound envelope. The
//! listening socket itself is bound by `main` (axum serve); `start` brings
//! up the ping loop and `stop` tears everything down in reverse.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use portico_core::error::{GatewayError, Result};
use portico_core::protocol::{
    validate, ClientType, Envelope, GroupPayload, MessageType, RegisterPayload, SubscribePayload,
};

use crate::agent::{
    AgentInvoker, AgentRouter, EventFanout, SessionScheduler, SessionStore,
};
use crate::auth::Authenticator;
use crate::bridge::{BridgeMailboxes, Mailbox};
use crate::config::GatewayConfig;
use crate::hooks::{self, HookEvent, InternalHooks};
use crate::registry::{ConnectionRegistry, GroupRegistry, NodeRegistry, SubscriptionIndex};
use crate::transport::Socket;

pub struct Gateway {
    cfg: GatewayConfig,
    auth: Authenticator,
    connections: Arc<ConnectionRegistry>,
    nodes: Arc<NodeRegistry>,
    groups: Arc<GroupRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
    fanout: Arc<EventFanout>,
    scheduler: Arc<SessionScheduler>,
    bridges: Arc<BridgeMailboxes>,
    hooks: Arc<dyn InternalHooks>,
    started_at: Instant,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(
        cfg: GatewayConfig,
        invoker: Arc<dyn AgentInvoker>,
        store: Arc<dyn SessionStore>,
        hooks: Arc<dyn InternalHooks>,
    ) -> Arc<Self> {
        let auth = Authenticator::new(&cfg.auth);
        let connections = Arc::new(ConnectionRegistry::new());
        let subscriptions = Arc::new(SubscriptionIndex::new());
        let fanout = Arc::new(EventFanout::new(connections.clone(), subscriptions.clone()));
        let router = Arc::new(AgentRouter::new(&cfg));
        let scheduler = Arc::new(SessionScheduler::new(
            invoker,
            store,
            fanout.clone(),
            router,
            hooks.clone(),
        ));
        let nodes = Arc::new(NodeRegistry::new(cfg.gateway.max_nodes));

        Arc::new(Self {
            cfg,
            auth,
            connections,
            nodes,
            groups: Arc::new(GroupRegistry::new()),
            subscriptions,
            fanout,
            scheduler,
            bridges: Arc::new(BridgeMailboxes::new()),
            hooks,
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Bring up the ping loop and fire the startup hook. Idempotent enough
    /// for tests to skip it entirely.
    pub fn start(self: &Arc<Self>) {
        hooks::emit(
            &self.hooks,
            HookEvent::GatewayStartup {
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        );
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            gateway.ping_loop().await;
        });
    }

    /// Reverse of `start`: stop the ping loop, abort in-flight invocations,
    /// close every socket.
    pub fn stop(&self) {
        self.shutdown.cancel();
        self.scheduler.abort_all();
        for socket in self.connections.snapshot() {
            socket.close();
        }
    }

    /// Periodic heartbeat plus stale-node sweep. Heartbeats ride the lossy
    /// send path (a superseded ping is not worth backpressure).
    async fn ping_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(Duration::from_millis(self.cfg.gateway.ping_interval_ms));
        let timeout = Duration::from_millis(self.cfg.gateway.ping_timeout_ms);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {
                    self.nodes.broadcast_to_all(&Envelope::ping());
                    let evicted = self.nodes.remove_stale(timeout);
                    if !evicted.is_empty() {
                        tracing::info!(count = evicted.len(), "evicting stale nodes");
                    }
                    for (node_id, socket) in evicted {
                        self.groups.remove_node_from_all(&node_id);
                        self.bridges.remove(&node_id);
                        socket.close();
                        self.handle_disconnect(&socket);
                    }
                }
            }
        }
    }

    pub fn attach_socket(&self, socket: Arc<Socket>) {
        self.connections.insert(socket);
    }

    /// Standard cleanup path. Safe to run more than once for a socket.
    pub fn handle_disconnect(&self, socket: &Arc<Socket>) {
        self.connections.remove(socket.id());
        self.subscriptions.forget_socket(socket.id());
        self.scheduler.handle_socket_closed(socket.id());
        if let Some(node_id) = socket.node_id() {
            self.nodes.unregister(&node_id);
            self.groups.remove_node_from_all(&node_id);
            self.bridges.remove(&node_id);
        }
        socket.close();
    }

    fn send_err(&self, socket: &Socket, err: &GatewayError) {
        socket.send(&Envelope::error(err.code(), err.to_string()));
    }

    /// The dispatch switch: every validated inbound envelope lands here.
    pub async fn handle_envelope(self: &Arc<Self>, socket: &Arc<Socket>, env: Envelope) {
        match env.kind {
            MessageType::Connect => self.handle_connect(socket, env),
            MessageType::AgentRequest => {
                if let Err(e) = self.scheduler.submit(socket.clone(), &env).await {
                    self.send_err(socket, &e);
                }
            }
            MessageType::AgentCancel => {
                if !socket.is_authenticated() {
                    self.send_err(socket, &GatewayError::AuthRequired);
                    return;
                }
                if let Err(e) = self.scheduler.cancel(socket, &env) {
                    self.send_err(socket, &e);
                }
            }
            _ => {
                if !socket.is_authenticated() {
                    self.send_err(socket, &GatewayError::AuthRequired);
                    return;
                }
                if let Some(node_id) = socket.node_id() {
                    // Any inbound frame is proof of life.
                    self.nodes.update_ping(&node_id);
                    if !env.kind.is_rate_limit_exempt() {
                        if self.nodes.is_rate_limited(&node_id) {
                            self.send_err(socket, &GatewayError::RateLimited);
                            return;
                        }
                        self.nodes.record_message(&node_id);
                    }
                }
                if let Err(e) = self.dispatch(socket, env) {
                    self.send_err(socket, &e);
                }
            }
        }
    }

    fn dispatch(&self, socket: &Arc<Socket>, env: Envelope) -> Result<()> {
        match env.kind {
            MessageType::Register => self.handle_register(socket, env),
            MessageType::Unregister => self.handle_unregister(socket, env),
            MessageType::JoinGroup => self.handle_join_group(socket, env),
            MessageType::LeaveGroup => self.handle_leave_group(socket, env),
            MessageType::Broadcast => self.handle_broadcast(socket, env),
            MessageType::Direct => self.handle_direct(socket, env),
            MessageType::Ping => {
                socket.send(&Envelope::pong(env.id));
                Ok(())
            }
            MessageType::Pong => Ok(()),
            MessageType::SessionSubscribe => self.handle_subscribe(socket, env, true),
            MessageType::SessionUnsubscribe => self.handle_subscribe(socket, env, false),
            // Server-to-client types arriving inbound.
            _ => Err(GatewayError::InvalidMessage(format!(
                "{} is not a client message",
                env.kind.as_str()
            ))),
        }
    }

    fn handle_connect(&self, socket: &Arc<Socket>, env: Envelope) {
        let Some(client) = env.client else {
            self.send_err(
                socket,
                &GatewayError::InvalidConnect("client info required".into()),
            );
            return;
        };
        if self
            .auth
            .validate(env.auth.as_ref(), socket.transport_user().as_deref())
        {
            socket.set_authenticated(client.instance_id, client.client_type);
            socket.send(&Envelope::res(env.id, true, json!("gateway-ready")));
        } else {
            tracing::warn!(socket = socket.id(), "auth failed");
            socket.send(&Envelope::res(env.id, false, json!("authentication failed")));
            socket.close();
        }
    }

    fn handle_register(&self, socket: &Arc<Socket>, env: Envelope) -> Result<()> {
        let payload: RegisterPayload = validate::payload(&env)?;
        // Re-registering on the same socket replaces the previous node.
        if let Some(old) = socket.node_id() {
            self.nodes.unregister(&old);
            self.groups.remove_node_from_all(&old);
        }
        let info = self.nodes.register(
            socket.clone(),
            payload.name,
            payload.capabilities,
            payload.session_id,
            payload.agent_name,
        )?;
        socket.send(&Envelope::registered(
            env.id,
            &info.id,
            json!({ "nodeId": info.id, "name": info.name }),
        ));
        Ok(())
    }

    fn handle_unregister(&self, socket: &Arc<Socket>, env: Envelope) -> Result<()> {
        let node_id = socket.node_id().ok_or(GatewayError::NotRegistered)?;
        self.nodes.unregister(&node_id);
        self.groups.remove_node_from_all(&node_id);
        self.bridges.remove(&node_id);
        socket.send(&Envelope::ack(
            env.id,
            json!({ "action": "unregister", "status": "ok", "nodeId": node_id }),
        ));
        Ok(())
    }

    fn handle_join_group(&self, socket: &Arc<Socket>, env: Envelope) -> Result<()> {
        let node_id = socket.node_id().ok_or(GatewayError::NotRegistered)?;
        let payload: GroupPayload = validate::payload(&env)?;
        let group_ref = env
            .group_id
            .clone()
            .or(payload.group_id.clone())
            .or(payload.name.clone())
            .ok_or_else(|| GatewayError::InvalidRequest("group id or name required".into()))?;

        let group_id = match self.groups.resolve(&group_ref) {
            Some(id) => id,
            None if payload.create_if_not_exists => {
                let name = payload.name.as_deref().unwrap_or(group_ref.as_str());
                self.groups
                    .get_or_create(name, &node_id, payload.description.clone())
            }
            None => return Err(GatewayError::GroupNotFound(group_ref)),
        };
        self.groups.add_node(&group_id, &node_id)?;
        socket.send(&Envelope::ack(
            env.id,
            json!({ "action": "join_group", "status": "joined", "groupId": group_id }),
        ));
        Ok(())
    }

    fn handle_leave_group(&self, socket: &Arc<Socket>, env: Envelope) -> Result<()> {
        let node_id = socket.node_id().ok_or(GatewayError::NotRegistered)?;
        let payload: GroupPayload = validate::payload(&env)?;
        let group_ref = env
            .group_id
            .clone()
            .or(payload.group_id.clone())
            .or(payload.name.clone())
            .ok_or_else(|| GatewayError::InvalidRequest("group id or name required".into()))?;
        let group_id = self
            .groups
            .resolve(&group_ref)
            .ok_or(GatewayError::GroupNotFound(group_ref))?;
        self.groups.remove_node(&group_id, &node_id)?;
        socket.send(&Envelope::ack(
            env.id,
            json!({ "action": "leave_group", "status": "left", "groupId": group_id }),
        ));
        Ok(())
    }

    fn handle_broadcast(&self, socket: &Arc<Socket>, env: Envelope) -> Result<()> {
        let node_id = socket.node_id().ok_or(GatewayError::NotRegistered)?;
        let group_ref = env
            .group_id
            .clone()
            .ok_or_else(|| GatewayError::InvalidRequest("groupId required".into()))?;
        let group_id = self
            .groups
            .resolve(&group_ref)
            .ok_or(GatewayError::GroupNotFound(group_ref))?;
        let members: Vec<String> = self
            .groups
            .members(&group_id)?
            .into_iter()
            .filter(|m| *m != node_id)
            .collect();

        let mut out = Envelope::new(MessageType::Broadcast);
        out.id = env.id.clone();
        out.group_id = Some(group_id.clone());
        out.node_id = Some(node_id);
        out.payload = env.payload;
        let delivered = self.nodes.broadcast_to_nodes(&members, &out);

        socket.send(&Envelope::ack(
            env.id,
            json!({
                "action": "broadcast",
                "status": "sent",
                "groupId": group_id,
                "delivered": delivered,
            }),
        ));
        Ok(())
    }

    fn handle_direct(&self, socket: &Arc<Socket>, env: Envelope) -> Result<()> {
        let target = env
            .target_node_id
            .clone()
            .ok_or_else(|| GatewayError::InvalidRequest("targetNodeId required".into()))?;

        let mut out = Envelope::new(MessageType::Direct);
        out.id = env.id.clone();
        out.target_node_id = Some(target.clone());
        // Echo the sender so the receiver can reply.
        out.node_id = socket.node_id();
        out.payload = env.payload;

        if !self.nodes.send_to_node(&target, &out) {
            return Err(GatewayError::NodeNotFound(target));
        }
        socket.send(&Envelope::ack(
            env.id,
            json!({ "action": "direct", "status": "sent", "targetNodeId": target }),
        ));
        Ok(())
    }

    fn handle_subscribe(&self, socket: &Arc<Socket>, env: Envelope, subscribe: bool) -> Result<()> {
        let payload: SubscribePayload = validate::payload(&env)?;
        let (action, status) = if subscribe {
            self.subscriptions.subscribe(socket.id(), &payload.session_id);
            ("session_subscribe", "subscribed")
        } else {
            self.subscriptions
                .unsubscribe(socket.id(), &payload.session_id);
            ("session_unsubscribe", "unsubscribed")
        };
        socket.send(&Envelope::ack(
            env.id,
            json!({ "action": action, "status": status, "sessionId": payload.session_id }),
        ));
        Ok(())
    }

    /// `/bridge/send`: a registration allocates a bridge node + mailbox and
    /// returns the `registered` envelope; anything else is dispatched as if
    /// it had arrived on the node's socket.
    pub async fn handle_bridge_send(self: &Arc<Self>, env: Envelope) -> Result<Value> {
        if env.kind == MessageType::Register {
            if !self.auth.validate(env.auth.as_ref(), None) {
                return Err(GatewayError::AuthFailed);
            }
            let payload: RegisterPayload = validate::payload(&env)?;

            let mailbox = Arc::new(Mailbox::new());
            let socket = Socket::bridge(mailbox.clone());
            let (instance_id, client_type) = match &env.client {
                Some(client) => (client.instance_id.clone(), client.client_type),
                None => (payload.name.clone(), ClientType::Bridge),
            };
            socket.set_authenticated(instance_id, client_type);

            let info = self.nodes.register(
                socket.clone(),
                payload.name,
                payload.capabilities,
                payload.session_id,
                payload.agent_name,
            )?;
            self.bridges.insert(&info.id, mailbox);
            self.connections.insert(socket);

            let reply = Envelope::registered(
                env.id,
                &info.id,
                json!({ "nodeId": info.id, "name": info.name }),
            );
            return serde_json::to_value(reply)
                .map_err(|e| GatewayError::Internal(e.to_string()));
        }

        let node_id = env
            .node_id
            .clone()
            .ok_or_else(|| GatewayError::InvalidRequest("nodeId required".into()))?;
        let socket = self
            .nodes
            .node_socket(&node_id)
            .ok_or(GatewayError::NodeNotFound(node_id))?;
        self.handle_envelope(&socket, env).await;
        Ok(json!({ "success": true }))
    }

    pub fn bridge_mailbox(&self, node_id: &str) -> Option<Arc<Mailbox>> {
        self.bridges.get(node_id)
    }

    pub fn touch_node(&self, node_id: &str) {
        self.nodes.update_ping(node_id);
    }

    pub fn stats(&self) -> Value {
        let sched = self.scheduler.stats();
        json!({
            "gateway": {
                "uptimeMs": self.started_at.elapsed().as_millis() as u64,
                "connectedClients": self.connections.len(),
                "authenticatedClients": self.connections.authenticated_count(),
                "activeRequests": sched.active,
                "queuedRequests": sched.queued,
            },
            "nodes": { "count": self.nodes.count() },
            "groups": { "count": self.groups.count() },
        })
    }

    pub fn listen_addr(&self) -> &str {
        &self.cfg.gateway.listen
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    pub fn nodes(&self) -> &Arc<NodeRegistry> {
        &self.nodes
    }

    pub fn groups(&self) -> &Arc<GroupRegistry> {
        &self.groups
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionIndex> {
        &self.subscriptions
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn scheduler(&self) -> &Arc<SessionScheduler> {
        &self.scheduler
    }

    pub fn fanout(&self) -> &Arc<EventFanout> {
        &self.fanout
    }
}
