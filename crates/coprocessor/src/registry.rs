use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct ClientEntry {
    pub connected_at: Instant,
}

/// Live client sessions keyed by peer address.
///
/// Entries are added through [`ClientRegistry::register`] and removed when the
/// returned [`Registration`] is dropped, so each session leaves the registry
/// exactly once no matter which path ends it.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<SocketAddr, ClientEntry>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddr, ClientEntry>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `addr`. Returns `None` if that address is already registered.
    pub fn register(self: &Arc<Self>, addr: SocketAddr) -> Option<Registration> {
        let mut clients = self.lock();
        if clients.contains_key(&addr) {
            return None;
        }
        clients.insert(
            addr,
            ClientEntry {
                connected_at: Instant::now(),
            },
        );
        Some(Registration {
            registry: Arc::clone(self),
            addr,
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.lock().contains_key(addr)
    }
}

/// Ownership of one registry entry.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ClientRegistry>,
    addr: SocketAddr,
}

impl Registration {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(entry) = self.registry.lock().remove(&self.addr) {
            tracing::debug!(
                peer = %self.addr,
                connected_for = ?entry.connected_at.elapsed(),
                "Client deregistered"
            );
        }
    }
}
