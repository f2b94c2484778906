//! In-memory fakes for the external contracts, used across the crate's
//! tests. The network layer and the packet-codec/session library are both
//! opaque collaborators, so tests drive the core through these instead.

use crate::client::ClientHandle;
use crate::config::SessionOptions;
use crate::error::CoreError;
use crate::session::{RemoteSession, SessionConnector, SessionSignal};
use async_trait::async_trait;
use conduit_event_system::ClientId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Routes tracing output through the test harness. Safe to call from every
/// test; only the first call installs the subscriber.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Records every packet written to it.
pub struct MockClient {
    id: ClientId,
    username: String,
    writes: Mutex<Vec<(String, serde_json::Value)>>,
    ended: Mutex<Option<String>>,
}

impl MockClient {
    pub fn arc(username: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ClientId::new(),
            username: username.to_string(),
            writes: Mutex::new(Vec::new()),
            ended: Mutex::new(None),
        })
    }

    pub fn writes(&self) -> Vec<(String, serde_json::Value)> {
        self.writes.lock().unwrap().clone()
    }

    /// Payloads of every packet written under `name`.
    pub fn packets_named(&self, name: &str) -> Vec<serde_json::Value> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(packet, _)| packet == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Text of every chat message sent to this client.
    pub fn chat_messages(&self) -> Vec<String> {
        self.packets_named("chat")
            .into_iter()
            .filter_map(|payload| {
                payload
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .collect()
    }

    pub fn end_reason(&self) -> Option<String> {
        self.ended.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientHandle for MockClient {
    fn id(&self) -> ClientId {
        self.id
    }

    fn username(&self) -> &str {
        &self.username
    }

    async fn write(&self, packet: &str, payload: serde_json::Value) {
        self.writes.lock().unwrap().push((packet.to_string(), payload));
    }

    async fn end(&self, reason: &str) {
        *self.ended.lock().unwrap() = Some(reason.to_string());
    }
}

/// Records link/unlink/attach traffic instead of speaking a real protocol.
#[derive(Default)]
pub struct MockSession {
    links: Mutex<Vec<ClientId>>,
    unlinks: AtomicUsize,
    attached: Mutex<Vec<ClientId>>,
    detached: Mutex<Vec<ClientId>>,
    login_sequences: Mutex<Vec<ClientId>>,
    writes: Mutex<Vec<(String, serde_json::Value)>>,
    disconnect_reason: Mutex<Option<String>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link_history(&self) -> Vec<ClientId> {
        self.links.lock().unwrap().clone()
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    pub fn unlink_count(&self) -> usize {
        self.unlinks.load(Ordering::SeqCst)
    }

    pub fn attached(&self) -> Vec<ClientId> {
        self.attached.lock().unwrap().clone()
    }

    pub fn login_sequences(&self) -> Vec<ClientId> {
        self.login_sequences.lock().unwrap().clone()
    }

    pub fn disconnect_reason(&self) -> Option<String> {
        self.disconnect_reason.lock().unwrap().clone()
    }

    pub fn upstream_writes(&self) -> Vec<(String, serde_json::Value)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn disconnect(&self, reason: &str) {
        *self.disconnect_reason.lock().unwrap() = Some(reason.to_string());
    }

    async fn link(&self, client: Arc<dyn ClientHandle>) {
        self.links.lock().unwrap().push(client.id());
    }

    async fn unlink(&self) {
        self.unlinks.fetch_add(1, Ordering::SeqCst);
    }

    async fn attach(&self, client: Arc<dyn ClientHandle>) {
        self.attached.lock().unwrap().push(client.id());
    }

    async fn detach(&self, client: ClientId) {
        self.detached.lock().unwrap().push(client);
    }

    async fn send_login_sequence(&self, client: Arc<dyn ClientHandle>) {
        self.login_sequences.lock().unwrap().push(client.id());
    }

    async fn write(&self, packet: &str, payload: serde_json::Value) {
        self.writes.lock().unwrap().push((packet.to_string(), payload));
    }
}

/// Hands out [`MockSession`]s and keeps the signal sender so tests can drive
/// spawn/kick/end signals by hand.
#[derive(Default)]
pub struct MockConnector {
    connects: AtomicUsize,
    current: Mutex<Option<(Arc<MockSession>, mpsc::Sender<SessionSignal>)>>,
}

impl MockConnector {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The session created by the most recent connect.
    pub fn session(&self) -> Arc<MockSession> {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .expect("no session connected")
            .0
            .clone()
    }

    /// Delivers a lifecycle signal from the fake upstream.
    pub async fn emit(&self, signal: SessionSignal) {
        let sender = self
            .current
            .lock()
            .unwrap()
            .as_ref()
            .expect("no session connected")
            .1
            .clone();
        sender.send(signal).await.expect("signal receiver dropped");
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(
        &self,
        _options: &SessionOptions,
    ) -> Result<(Arc<dyn RemoteSession>, mpsc::Receiver<SessionSignal>), CoreError> {
        let session = Arc::new(MockSession::new());
        let (tx, rx) = mpsc::channel(16);
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = Some((session.clone(), tx));
        Ok((session, rx))
    }
}
