//! Per-session single-flight scheduler.
//!
//! For each queue key (`agentId ":" sessionKey`) at most one invocation runs
//! at a time; later submissions queue FIFO. The four maps below must mutate
//! together, so they sit behind one mutex with short critical sections; all
//! I/O (invoker, store, sends) happens outside it.
//!
//! Map invariants:
//! - `active[qk] = rid` implies `live[rid]` exists and refers to the same
//!   socket.
//! - `index` covers every live and queued request id.
//! - every queued request's socket is still attached; socket teardown purges
//!   its queued work and aborts its live work.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use portico_core::error::{GatewayError, Result};
use portico_core::protocol::{
    agent::event, validate, AgentCancelPayload, AgentRequestPayload, Attachment, ClientType,
    Envelope,
};

use crate::agent::fanout::{AgentErrorOpts, ClientFilter, EventFanout};
use crate::agent::invoker::{AgentInvoker, Invocation};
use crate::agent::router::AgentRouter;
use crate::agent::store::{preview_of, SessionPatch, SessionStore};
use crate::hooks::{self, HookEvent, InternalHooks};
use crate::transport::{Socket, SocketId};

/// Client classes that receive session mirrors for sessions they are not
/// subscribed to.
const MIRROR_CLASSES: [ClientType; 2] = [ClientType::Webui, ClientType::Desktop];

/// The unit of work: one submitted agent request.
pub struct PendingAgentRequest {
    pub request_id: String,
    pub socket: Arc<Socket>,
    pub agent_id: String,
    pub session_key: String,
    pub queue_key: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub workdir: Option<String>,
}

struct LiveRequest {
    socket: Arc<Socket>,
    abort: CancellationToken,
    /// Execution generation. Request ids can be reused (abort-and-replace),
    /// so a finishing execution must only clean entries carrying its own
    /// generation.
    exec: u64,
}

struct ActiveEntry {
    request_id: String,
    exec: u64,
}

#[derive(Default)]
struct SchedState {
    /// queue key -> currently running request.
    active: HashMap<String, ActiveEntry>,
    /// queue key -> pending requests in arrival order.
    queue: HashMap<String, VecDeque<PendingAgentRequest>>,
    /// request id -> owning socket + abort handle.
    live: HashMap<String, LiveRequest>,
    /// request id -> queue key, for live and queued requests alike.
    index: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub active: usize,
    pub queued: usize,
}

enum Submission {
    Run(PendingAgentRequest, CancellationToken, u64),
    Queued(usize),
    Busy,
}

enum CancelOutcome {
    Cancelled,
    CancelledQueued,
    NotFound,
}

pub struct SessionScheduler {
    state: Mutex<SchedState>,
    exec_seq: AtomicU64,
    invoker: Arc<dyn AgentInvoker>,
    store: Arc<dyn SessionStore>,
    fanout: Arc<EventFanout>,
    router: Arc<AgentRouter>,
    hooks: Arc<dyn InternalHooks>,
}

impl SessionScheduler {
    pub fn new(
        invoker: Arc<dyn AgentInvoker>,
        store: Arc<dyn SessionStore>,
        fanout: Arc<EventFanout>,
        router: Arc<AgentRouter>,
        hooks: Arc<dyn InternalHooks>,
    ) -> Self {
        Self {
            state: Mutex::new(SchedState::default()),
            exec_seq: AtomicU64::new(0),
            invoker,
            store,
            fanout,
            router,
            hooks,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> SchedulerStats {
        let st = self.lock();
        SchedulerStats {
            active: st.active.len(),
            queued: st.queue.values().map(VecDeque::len).sum(),
        }
    }

    pub fn is_active(&self, queue_key: &str) -> bool {
        self.lock().active.contains_key(queue_key)
    }

    /// Submit a `req:agent` envelope. Protocol-level failures come back as
    /// `Err` (the caller replies with an error envelope); scheduler-level
    /// refusals are delivered as agent-errors to the originator here.
    pub async fn submit(self: &Arc<Self>, socket: Arc<Socket>, env: &Envelope) -> Result<()> {
        if !socket.is_authenticated() {
            return Err(GatewayError::AuthRequired);
        }
        let request_id = env
            .id
            .clone()
            .ok_or_else(|| GatewayError::InvalidRequest("req:agent requires an id".into()))?;
        let payload: AgentRequestPayload = validate::payload(env)?;

        // Re-submission with an id we already track: abort-and-replace.
        self.evict_request(&request_id);

        if payload.content.trim().is_empty() && payload.attachments.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "content or attachments required".into(),
            ));
        }

        let routing = payload.routing.as_ref();
        let Some(agent_id) = self.router.select_agent(payload.agent_id.as_deref(), routing) else {
            self.fanout.send_agent_error(
                &socket,
                &request_id,
                "No agent matched",
                AgentErrorOpts::default(),
            );
            return Ok(());
        };

        let session_key = payload
            .session_key
            .clone()
            .unwrap_or_else(|| self.router.build_session_key(&agent_id, routing));
        let queue_key = format!("{agent_id}:{session_key}");
        let workdir = self.router.agent_workdir(&agent_id);

        // Persist the preview before anything observable happens; a store
        // failure is logged, not fatal to the request.
        let patch = SessionPatch {
            last_message_preview: Some(preview_of(&payload.content)),
            bump_message_count: false,
            workdir: workdir.clone(),
        };
        if let Err(e) = self.store.update(&session_key, patch).await {
            tracing::warn!(session = %session_key, err = %e, "session store update failed");
        }
        hooks::emit(
            &self.hooks,
            HookEvent::MessageReceived {
                session_key: session_key.clone(),
                client_id: socket.client_id(),
            },
        );

        // Mirror the user message to everyone else watching: session
        // subscribers first, then UI-class clients not subscribed to this
        // session. The skip keeps any client from seeing it twice.
        let mut mirror = Envelope::agent_event(
            &request_id,
            json!({
                "type": event::SESSION_MESSAGE,
                "sessionId": &session_key,
                "agentId": &agent_id,
                "message": { "role": "user", "content": &payload.content },
            }),
        );
        mirror.client_id = socket.client_id();
        self.fanout
            .broadcast_session_event(&session_key, &mirror, Some(socket.id()));
        self.fanout.broadcast_to_clients(
            &mirror,
            &ClientFilter {
                exclude: Some(socket.id()),
                client_types: &MIRROR_CLASSES,
                skip_session: Some(&session_key),
            },
        );

        let pending = PendingAgentRequest {
            request_id: request_id.clone(),
            socket: socket.clone(),
            agent_id,
            session_key: session_key.clone(),
            queue_key: queue_key.clone(),
            content: payload.content,
            attachments: payload.attachments,
            workdir,
        };

        let submission = {
            let mut st = self.lock();
            if st.active.contains_key(&queue_key) {
                if payload.queue_if_busy.unwrap_or(true) {
                    st.index.insert(request_id.clone(), queue_key.clone());
                    let q = st.queue.entry(queue_key.clone()).or_default();
                    q.push_back(pending);
                    Submission::Queued(q.len())
                } else {
                    Submission::Busy
                }
            } else {
                let abort = CancellationToken::new();
                let exec = self.exec_seq.fetch_add(1, Ordering::Relaxed) + 1;
                st.active.insert(
                    queue_key.clone(),
                    ActiveEntry {
                        request_id: request_id.clone(),
                        exec,
                    },
                );
                st.index.insert(request_id.clone(), queue_key.clone());
                st.live.insert(
                    request_id.clone(),
                    LiveRequest {
                        socket: socket.clone(),
                        abort: abort.clone(),
                        exec,
                    },
                );
                Submission::Run(pending, abort, exec)
            }
        };

        match submission {
            Submission::Run(req, abort, exec) => self.spawn_execution(req, abort, exec),
            Submission::Queued(position) => {
                socket.send(&Envelope::ack(
                    Some(request_id.clone()),
                    json!({ "action": "agent", "status": "queued", "position": position }),
                ));
                socket.send(&Envelope::agent_event(
                    &request_id,
                    json!({
                        "type": event::REQUEST_QUEUED,
                        "sessionId": session_key,
                        "position": position,
                    }),
                ));
            }
            Submission::Busy => {
                self.fanout.send_agent_error(
                    &socket,
                    &request_id,
                    "Session already has an in-flight request.",
                    AgentErrorOpts {
                        session_id: Some(&session_key),
                        ..AgentErrorOpts::default()
                    },
                );
            }
        }
        Ok(())
    }

    /// Cancel an outstanding request. Only the originating socket may cancel
    /// its own work; others get `FORBIDDEN`.
    pub fn cancel(&self, socket: &Socket, env: &Envelope) -> Result<()> {
        let payload: AgentCancelPayload = validate::payload(env)?;
        let request_id = payload.request_id;

        let outcome = {
            let mut st = self.lock();
            let live_owner = st.live.get(&request_id).map(|l| l.socket.id());
            if let Some(owner) = live_owner {
                if owner != socket.id() {
                    return Err(GatewayError::Forbidden(
                        "request belongs to another connection".into(),
                    ));
                }
                // The execution task's cleanup still runs; removing the live
                // entry here just stops a second cancel from re-tripping it.
                if let Some(live) = st.live.remove(&request_id) {
                    live.abort.cancel();
                }
                CancelOutcome::Cancelled
            } else if let Some(queue_key) = st.index.get(&request_id).cloned() {
                let owned = st
                    .queue
                    .get(&queue_key)
                    .and_then(|q| q.iter().find(|p| p.request_id == request_id))
                    .map(|p| p.socket.id() == socket.id());
                match owned {
                    Some(false) => {
                        return Err(GatewayError::Forbidden(
                            "request belongs to another connection".into(),
                        ))
                    }
                    Some(true) => {
                        if let Some(q) = st.queue.get_mut(&queue_key) {
                            q.retain(|p| p.request_id != request_id);
                            if q.is_empty() {
                                st.queue.remove(&queue_key);
                            }
                        }
                        st.index.remove(&request_id);
                        CancelOutcome::CancelledQueued
                    }
                    None => {
                        st.index.remove(&request_id);
                        CancelOutcome::NotFound
                    }
                }
            } else {
                CancelOutcome::NotFound
            }
        };

        let status = match outcome {
            CancelOutcome::Cancelled => "cancelled",
            CancelOutcome::CancelledQueued => "cancelled_queued",
            CancelOutcome::NotFound => "not_found",
        };
        socket.send(&Envelope::ack(
            env.id.clone(),
            json!({ "action": "agent:cancel", "status": status, "requestId": request_id }),
        ));
        Ok(())
    }

    /// Socket teardown: abort everything live from this socket and purge its
    /// queued work. Leaves no scheduler entry referencing a dead transport.
    pub fn handle_socket_closed(&self, socket_id: SocketId) {
        let mut st = self.lock();
        for live in st.live.values() {
            if live.socket.id() == socket_id {
                live.abort.cancel();
            }
        }
        let mut purged: Vec<String> = Vec::new();
        for q in st.queue.values_mut() {
            q.retain(|p| {
                if p.socket.id() == socket_id {
                    purged.push(p.request_id.clone());
                    false
                } else {
                    true
                }
            });
        }
        st.queue.retain(|_, q| !q.is_empty());
        for request_id in &purged {
            st.index.remove(request_id);
        }
    }

    /// Abort every in-flight invocation (gateway shutdown).
    pub fn abort_all(&self) {
        let st = self.lock();
        for live in st.live.values() {
            live.abort.cancel();
        }
    }

    /// Abort-and-replace support: remove every trace of `request_id`,
    /// whichever generation it belongs to.
    fn evict_request(&self, request_id: &str) {
        let mut st = self.lock();
        if let Some(live) = st.live.remove(request_id) {
            live.abort.cancel();
        }
        if let Some(queue_key) = st.index.remove(request_id) {
            if st.active.get(&queue_key).map(|a| a.request_id.as_str()) == Some(request_id) {
                st.active.remove(&queue_key);
            }
            if let Some(q) = st.queue.get_mut(&queue_key) {
                q.retain(|p| p.request_id != request_id);
                if q.is_empty() {
                    st.queue.remove(&queue_key);
                }
            }
        }
    }

    fn spawn_execution(self: &Arc<Self>, req: PendingAgentRequest, abort: CancellationToken, exec: u64) {
        let sched = Arc::clone(self);
        tokio::spawn(async move {
            let mut current = req;
            let mut current_abort = abort;
            let mut current_exec = exec;
            loop {
                sched.drive(&current, &current_abort).await;
                match sched.finish_and_next(&current.request_id, &current.queue_key, current_exec) {
                    Some((next, next_abort, next_exec, remaining)) => {
                        next.socket.send(&Envelope::ack(
                            Some(next.request_id.clone()),
                            json!({ "action": "agent", "status": "dequeued", "remaining": remaining }),
                        ));
                        current = next;
                        current_abort = next_abort;
                        current_exec = next_exec;
                    }
                    None => break,
                }
            }
        });
    }

    /// The finally phase: drop this execution from every map, and if the
    /// queue key is now idle, promote the queue head. Everything is guarded
    /// by the execution generation — after an abort-and-replace the stale
    /// execution shares its request id with its replacement and must not
    /// touch the replacement's entries or steal its turn.
    fn finish_and_next(
        &self,
        request_id: &str,
        queue_key: &str,
        exec: u64,
    ) -> Option<(PendingAgentRequest, CancellationToken, u64, usize)> {
        let mut st = self.lock();
        if st.live.get(request_id).map(|l| l.exec) == Some(exec) {
            st.live.remove(request_id);
        }
        if st.active.get(queue_key).map(|a| a.exec) != Some(exec) {
            return None;
        }
        st.active.remove(queue_key);
        st.index.remove(request_id);

        let next = st.queue.get_mut(queue_key).and_then(VecDeque::pop_front)?;
        let remaining = st.queue.get(queue_key).map(VecDeque::len).unwrap_or(0);
        if remaining == 0 {
            st.queue.remove(queue_key);
        }
        let abort = CancellationToken::new();
        let next_exec = self.exec_seq.fetch_add(1, Ordering::Relaxed) + 1;
        st.active.insert(
            queue_key.to_string(),
            ActiveEntry {
                request_id: next.request_id.clone(),
                exec: next_exec,
            },
        );
        st.live.insert(
            next.request_id.clone(),
            LiveRequest {
                socket: next.socket.clone(),
                abort: abort.clone(),
                exec: next_exec,
            },
        );
        // `index` still holds the promoted id from its time in the queue.
        Some((next, abort, next_exec, remaining))
    }

    /// Run one invocation to completion: pull events off the invoker stream,
    /// decorate each exactly once, forward to the originator (reliable) and
    /// the session's other subscribers (lossy).
    async fn drive(&self, req: &PendingAgentRequest, abort: &CancellationToken) {
        hooks::emit(
            &self.hooks,
            HookEvent::SessionStart {
                session_key: req.session_key.clone(),
                agent_id: req.agent_id.clone(),
            },
        );

        let invocation = Invocation {
            agent_id: req.agent_id.clone(),
            content: req.content.clone(),
            attachments: req.attachments.clone(),
            session_key: req.session_key.clone(),
            workdir: req.workdir.clone(),
        };
        let mut stream = match self.invoker.invoke(invocation, abort.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                self.emit_agent_error(req, &e.to_string());
                return;
            }
        };

        let mut saw_agent_error = false;
        let mut failed = false;
        loop {
            tokio::select! {
                _ = abort.cancelled() => return,
                item = stream.next() => match item {
                    Some(Ok(ev)) => {
                        let payload = decorate_event(ev, &req.session_key, &req.agent_id);
                        if payload.get("type").and_then(Value::as_str) == Some(event::AGENT_ERROR) {
                            saw_agent_error = true;
                        }
                        let mut env = Envelope::agent_event(&req.request_id, payload);
                        env.client_id = req.socket.client_id();
                        req.socket.send_reliable(&env).await;
                        self.fanout.broadcast_session_event(
                            &req.session_key,
                            &env,
                            Some(req.socket.id()),
                        );
                    }
                    Some(Err(e)) => {
                        if !saw_agent_error {
                            self.emit_agent_error(req, &e.to_string());
                        }
                        failed = true;
                        break;
                    }
                    None => break,
                }
            }
        }

        if !failed && !abort.is_cancelled() {
            let patch = SessionPatch {
                bump_message_count: true,
                ..SessionPatch::default()
            };
            if let Err(e) = self.store.update(&req.session_key, patch).await {
                tracing::warn!(session = %req.session_key, err = %e, "message count bump failed");
            }
        }
    }

    fn emit_agent_error(&self, req: &PendingAgentRequest, message: &str) {
        self.fanout.send_agent_error(
            &req.socket,
            &req.request_id,
            message,
            AgentErrorOpts {
                session_id: Some(&req.session_key),
                agent_id: Some(&req.agent_id),
                broadcast_to_session: true,
                exclude: Some(req.socket.id()),
            },
        );
    }
}

/// Attach `sessionId`/`agentId` exactly once, at the fan-out boundary, so
/// every observer sees the same event shape. Non-object events are wrapped.
fn decorate_event(ev: Value, session_key: &str, agent_id: &str) -> Value {
    let mut obj = match ev {
        Value::Object(map) => Value::Object(map),
        other => json!({ "type": event::AGENT_EVENT, "data": other }),
    };
    obj["sessionId"] = json!(session_key);
    obj["agentId"] = json!(agent_id);
    obj
}
