//! The connected-socket set. Every socket lives here from attach to
//! disconnect; fan-out filters on authentication and client class.

use std::sync::Arc;

use dashmap::DashMap;

use crate::transport::{Socket, SocketId};

#[derive(Default)]
pub struct ConnectionRegistry {
    sockets: DashMap<SocketId, Arc<Socket>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sockets: DashMap::new(),
        }
    }

    pub fn insert(&self, socket: Arc<Socket>) {
        self.sockets.insert(socket.id(), socket);
    }

    pub fn remove(&self, id: SocketId) -> Option<Arc<Socket>> {
        self.sockets.remove(&id).map(|(_, s)| s)
    }

    pub fn get(&self, id: SocketId) -> Option<Arc<Socket>> {
        self.sockets.get(&id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Snapshot of all sockets; callers filter and send outside any map lock.
    pub fn snapshot(&self) -> Vec<Arc<Socket>> {
        self.sockets.iter().map(|r| r.value().clone()).collect()
    }

    pub fn authenticated_count(&self) -> usize {
        self.sockets
            .iter()
            .filter(|r| r.value().is_authenticated())
            .count()
    }
}
