//! Live Connection Registry
//!
//! Tracks every connection handler that is still running so the server can
//! wait for all of them during shutdown.
//!
//! Registration is a guard: the supervisor calls
//! [`ConnectionRegistry::register`] on accept and moves the returned
//! [`Registration`] into the handler task. When the task ends, normally,
//! with an error, or by panicking, the guard drops and the id is removed.
//! Every id is therefore removed exactly once.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::trace;

/// Unique identifier of a connection for the life of the process.
pub type ConnectionId = u64;

/// Set of live connections plus a way to wait for it to empty.
#[derive(Debug)]
pub struct ConnectionRegistry {
    /// Next id to hand out
    next_id: AtomicU64,

    /// Live connections and their peers
    live: Mutex<HashMap<ConnectionId, SocketAddr>>,

    /// Live count, published for `wait_for_all`
    count: watch::Sender<usize>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            next_id: AtomicU64::new(1),
            live: Mutex::new(HashMap::new()),
            count,
        }
    }

    /// Registers a new connection and returns its guard.
    pub fn register(self: &Arc<Self>, addr: SocketAddr) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut live = self.live();
            live.insert(id, addr);
            self.count.send_replace(live.len());
        }

        trace!(id, client = %addr, "Connection registered");

        Registration {
            id,
            addr,
            registry: Arc::clone(self),
        }
    }

    /// Removes a connection. Returns false if `id` was not registered.
    pub fn deregister(&self, id: ConnectionId) -> bool {
        let removed = {
            let mut live = self.live();
            let removed = live.remove(&id).is_some();
            if removed {
                self.count.send_replace(live.len());
            }
            removed
        };

        if removed {
            trace!(id, "Connection deregistered");
        }
        removed
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.live().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `id` is still live.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.live().contains_key(&id)
    }

    /// Snapshot of the live connections, in no particular order.
    pub fn snapshot(&self) -> Vec<(ConnectionId, SocketAddr)> {
        self.live().iter().map(|(id, addr)| (*id, *addr)).collect()
    }

    /// Waits until every registered connection has deregistered.
    ///
    /// Returns immediately if the registry is already empty.
    pub async fn wait_for_all(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    fn live(&self) -> MutexGuard<'_, HashMap<ConnectionId, SocketAddr>> {
        // A handler that panicked still has to be able to deregister
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof that a connection is registered. Deregisters on drop.
#[derive(Debug)]
pub struct Registration {
    id: ConnectionId,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
