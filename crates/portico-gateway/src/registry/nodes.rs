//! Node registry: registration cap, per-node rate limiting, liveness.
//!
//! The table sits behind one mutex so the cap check is atomic with the
//! insert. Critical sections only touch the map; sends happen on snapshots
//! outside the lock (the socket's lossy send never blocks anyway).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use portico_core::error::{GatewayError, Result};
use portico_core::protocol::Envelope;

use crate::transport::Socket;

/// Sliding-window rate limit. The exact numbers are deployment constants,
/// not protocol contract: 120 messages per 10 s window, with ping/pong and
/// register always exempt.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);
pub const RATE_LIMIT_MAX: usize = 120;

/// Serializable node snapshot for `/stats` and `registered` replies.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: String,
    pub name: String,
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
}

struct NodeEntry {
    info: NodeInfo,
    socket: Arc<Socket>,
    last_seen: Instant,
    window: VecDeque<Instant>,
}

pub struct NodeRegistry {
    nodes: Mutex<HashMap<String, NodeEntry>>,
    seq: AtomicU64,
    max_nodes: usize,
}

impl NodeRegistry {
    pub fn new(max_nodes: usize) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            max_nodes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, NodeEntry>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a node for `socket`. Fails without allocating an id when the
    /// cap is hit.
    pub fn register(
        &self,
        socket: Arc<Socket>,
        name: String,
        capabilities: Vec<String>,
        session_id: Option<String>,
        agent_name: Option<String>,
    ) -> Result<NodeInfo> {
        let mut nodes = self.lock();
        if nodes.len() >= self.max_nodes {
            return Err(GatewayError::MaxNodesReached(self.max_nodes));
        }
        let id = format!("node-{}", self.seq.fetch_add(1, Ordering::Relaxed) + 1);
        let info = NodeInfo {
            id: id.clone(),
            name,
            capabilities,
            session_id,
            agent_name,
        };
        socket.set_node_id(id.clone());
        nodes.insert(
            id,
            NodeEntry {
                info: info.clone(),
                socket,
                last_seen: Instant::now(),
                window: VecDeque::new(),
            },
        );
        Ok(info)
    }

    pub fn unregister(&self, node_id: &str) -> Option<Arc<Socket>> {
        self.lock().remove(node_id).map(|e| {
            e.socket.clear_node_id();
            e.socket
        })
    }

    /// Refresh liveness. Any inbound frame counts, not just ping/pong.
    pub fn update_ping(&self, node_id: &str) {
        if let Some(entry) = self.lock().get_mut(node_id) {
            entry.last_seen = Instant::now();
        }
    }

    pub fn record_message(&self, node_id: &str) {
        let now = Instant::now();
        if let Some(entry) = self.lock().get_mut(node_id) {
            entry.window.push_back(now);
            prune_window(&mut entry.window, now);
        }
    }

    pub fn is_rate_limited(&self, node_id: &str) -> bool {
        let now = Instant::now();
        match self.lock().get_mut(node_id) {
            Some(entry) => {
                prune_window(&mut entry.window, now);
                entry.window.len() >= RATE_LIMIT_MAX
            }
            None => false,
        }
    }

    pub fn node_socket(&self, node_id: &str) -> Option<Arc<Socket>> {
        self.lock().get(node_id).map(|e| e.socket.clone())
    }

    pub fn send_to_node(&self, node_id: &str, env: &Envelope) -> bool {
        match self.node_socket(node_id) {
            Some(socket) => socket.send(env),
            None => false,
        }
    }

    /// Fan an envelope to the listed nodes; returns the delivered count.
    pub fn broadcast_to_nodes(&self, node_ids: &[String], env: &Envelope) -> usize {
        let sockets: Vec<Arc<Socket>> = {
            let nodes = self.lock();
            node_ids
                .iter()
                .filter_map(|id| nodes.get(id).map(|e| e.socket.clone()))
                .collect()
        };
        sockets.iter().filter(|s| s.send(env)).count()
    }

    pub fn broadcast_to_all(&self, env: &Envelope) -> usize {
        let sockets: Vec<Arc<Socket>> = self.lock().values().map(|e| e.socket.clone()).collect();
        sockets.iter().filter(|s| s.send(env)).count()
    }

    pub fn all_nodes(&self) -> Vec<NodeInfo> {
        self.lock().values().map(|e| e.info.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Evict nodes silent longer than `timeout`. Returns the evicted entries
    /// so the caller can close sockets and clean the other indexes without
    /// this registry holding its lock across that work.
    pub fn remove_stale(&self, timeout: Duration) -> Vec<(String, Arc<Socket>)> {
        let now = Instant::now();
        let mut nodes = self.lock();
        let stale: Vec<String> = nodes
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|id| {
                nodes.remove(&id).map(|e| {
                    e.socket.clear_node_id();
                    (id, e.socket)
                })
            })
            .collect()
    }
}

fn prune_window(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = window.front() {
        if now.duration_since(*front) > RATE_LIMIT_WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}
