//! Session subscriptions: mirrored maps in both directions so teardown on
//! socket close is O(sessions-of-socket), not a scan.

use dashmap::{DashMap, DashSet};

use crate::transport::SocketId;

#[derive(Default)]
pub struct SubscriptionIndex {
    session_sockets: DashMap<String, DashSet<SocketId>>,
    socket_sessions: DashMap<SocketId, DashSet<String>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, socket: SocketId, session_id: &str) {
        self.session_sockets
            .entry(session_id.to_string())
            .or_default()
            .insert(socket);
        self.socket_sessions
            .entry(socket)
            .or_default()
            .insert(session_id.to_string());
    }

    pub fn unsubscribe(&self, socket: SocketId, session_id: &str) {
        if let Some(set) = self.session_sockets.get(session_id) {
            set.remove(&socket);
        }
        if let Some(set) = self.socket_sessions.get(&socket) {
            set.remove(session_id);
        }
    }

    /// Remove the socket from every session it was subscribed to. Returns
    /// the sessions it was in.
    pub fn forget_socket(&self, socket: SocketId) -> Vec<String> {
        let sessions: Vec<String> = self
            .socket_sessions
            .remove(&socket)
            .map(|(_, set)| set.iter().map(|s| s.clone()).collect())
            .unwrap_or_default();
        for session in &sessions {
            if let Some(set) = self.session_sockets.get(session) {
                set.remove(&socket);
            }
        }
        sessions
    }

    pub fn subscribers(&self, session_id: &str) -> Vec<SocketId> {
        self.session_sockets
            .get(session_id)
            .map(|set| set.iter().map(|s| *s).collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, socket: SocketId, session_id: &str) -> bool {
        self.session_sockets
            .get(session_id)
            .map(|set| set.contains(&socket))
            .unwrap_or(false)
    }

    pub fn sessions_of(&self, socket: SocketId) -> Vec<String> {
        self.socket_sessions
            .get(&socket)
            .map(|set| set.iter().map(|s| s.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(u8, u8),
        Unsubscribe(u8, u8),
        Forget(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..8, 0u8..8).prop_map(|(s, k)| Op::Subscribe(s, k)),
            (0u8..8, 0u8..8).prop_map(|(s, k)| Op::Unsubscribe(s, k)),
            (0u8..8).prop_map(Op::Forget),
        ]
    }

    proptest! {
        /// Both directions of the index agree after any op sequence, and a
        /// forgotten socket is referenced nowhere.
        #[test]
        fn mirrored_maps_stay_consistent(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let index = SubscriptionIndex::new();
            for op in ops {
                match op {
                    Op::Subscribe(s, k) => index.subscribe(s as SocketId, &format!("sess-{k}")),
                    Op::Unsubscribe(s, k) => index.unsubscribe(s as SocketId, &format!("sess-{k}")),
                    Op::Forget(s) => {
                        index.forget_socket(s as SocketId);
                        for k in 0..8 {
                            let session = format!("sess-{}", k);
                            prop_assert!(!index.is_subscribed(s as SocketId, &session));
                        }
                        prop_assert!(index.sessions_of(s as SocketId).is_empty());
                    }
                }
            }
            for s in 0..8u64 {
                for session in index.sessions_of(s) {
                    prop_assert!(index.subscribers(&session).contains(&s));
                }
            }
            for k in 0..8 {
                let session = format!("sess-{k}");
                for s in index.subscribers(&session) {
                    prop_assert!(index.sessions_of(s).contains(&session));
                }
            }
        }
    }
}
