//! Downstream client transport contract and registry.

use async_trait::async_trait;
use conduit_event_system::ClientId;
use dashmap::DashMap;
use std::sync::Arc;

/// Transport handle for one downstream client connection.
///
/// The network layer owns the connection; the core only writes packets and
/// asks it to end. Inbound traffic (chat, tab-complete requests, login,
/// disconnect) arrives as calls into the
/// [`ConduitServer`](crate::orchestrator::ConduitServer) handler methods.
#[async_trait]
pub trait ClientHandle: Send + Sync {
    /// Stable unique id of this connection.
    fn id(&self) -> ClientId;

    /// Display name, used in log lines and broadcast messages.
    fn username(&self) -> &str;

    /// Writes one named packet with a JSON payload to the client.
    async fn write(&self, packet: &str, payload: serde_json::Value);

    /// Ends the connection, presenting `reason` to the client.
    async fn end(&self, reason: &str);
}

/// Live set of connected clients, keyed by id.
///
/// Pure bookkeeping: entries are inserted on login and removed on disconnect
/// by the orchestrator. The controlling-client slot elsewhere stores only a
/// [`ClientId`] that is looked up here, never an owning reference.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<dyn ClientHandle>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    pub fn insert(&self, client: Arc<dyn ClientHandle>) {
        self.clients.insert(client.id(), client);
    }

    pub fn remove(&self, id: ClientId) -> Option<Arc<dyn ClientHandle>> {
        self.clients.remove(&id).map(|(_, client)| client)
    }

    pub fn get(&self, id: ClientId) -> Option<Arc<dyn ClientHandle>> {
        self.clients.get(&id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Snapshot of all connected clients.
    pub fn all(&self) -> Vec<Arc<dyn ClientHandle>> {
        self.clients.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("connected", &self.clients.len())
            .finish()
    }
}
