//! Connection Manager
//!
//! The registry of live connections, keyed by connection id. The accept loop
//! adds to it, every connection removes itself on teardown, and the server
//! drains it on shutdown.
//!
//! The map lock is held only for the map operation itself, never across an
//! `.await`, so one connection's teardown cannot stall another's lookup.

use crate::connection::{Connection, ConnectionError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<u32, Arc<Connection>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under its id.
    pub fn add(&self, conn: Arc<Connection>) {
        let id = conn.id();
        let count = {
            let mut connections = self.connections.write();
            connections.insert(id, conn);
            connections.len()
        };
        debug!(conn_id = id, count, "Connection registered");
    }

    /// Deregisters `conn`. Returns false if its id is now held by a
    /// different connection, or by none.
    pub fn remove(&self, conn: &Arc<Connection>) -> bool {
        let id = conn.id();
        let count = {
            let mut connections = self.connections.write();
            match connections.get(&id) {
                // Ids wrap, so the slot may belong to a newer connection
                Some(current) if Arc::ptr_eq(current, conn) => {
                    connections.remove(&id);
                }
                _ => return false,
            }
            connections.len()
        };
        debug!(conn_id = id, count, "Connection removed");
        true
    }

    /// Looks up a live connection.
    pub fn get(&self, id: u32) -> Result<Arc<Connection>, ConnectionError> {
        self.connections
            .read()
            .get(&id)
            .cloned()
            .ok_or(ConnectionError::NotFound(id))
    }

    /// Number of registered connections. A snapshot: it may be stale by the
    /// time the caller acts on it.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Ids of every registered connection, in no particular order.
    pub fn ids(&self) -> Vec<u32> {
        self.connections.read().keys().copied().collect()
    }

    /// Stops every registered connection, then empties the registry.
    pub async fn clear_all(&self) {
        let snapshot: Vec<Arc<Connection>> = self.connections.read().values().cloned().collect();
        let total = snapshot.len();

        for conn in snapshot {
            conn.stop().await;
        }

        self.connections.write().clear();
        info!(stopped = total, "All connections cleared");
    }
}
