//! Upstream session contract.
//!
//! The remote session is an opaque collaborator: the packet codec, world
//! model, and movement logic all live behind it. The core's entire contract
//! surface is connect/disconnect, link/unlink/attach directives, packet
//! carriage, and the lifecycle signals delivered on the channel returned by
//! [`SessionConnector::connect`].

use crate::client::ClientHandle;
use crate::config::SessionOptions;
use crate::error::CoreError;
use async_trait::async_trait;
use conduit_event_system::ClientId;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle signals emitted by an active remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// The session's avatar spawned into the upstream world; autonomous
    /// logic may begin.
    Spawned,
    /// The upstream service kicked the session.
    Kicked(String),
    /// The upstream connection ended without a kick.
    Ended,
    /// A transport error tore the connection down.
    Errored(String),
}

/// One connected upstream session.
///
/// At most one exists per orchestrator; the coordinator holds the slot and
/// drops the handle on disconnect/kick/error/manual stop.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Tears the upstream connection down, presenting `reason`.
    async fn disconnect(&self, reason: &str);

    /// Transfers protocol control to `client`: its inputs flow upstream and
    /// session output mirrors to it.
    async fn link(&self, client: Arc<dyn ClientHandle>);

    /// Releases protocol control from whichever client holds it.
    async fn unlink(&self);

    /// Wires `client` as a passive mirror of the session (no control).
    async fn attach(&self, client: Arc<dyn ClientHandle>);

    /// Unwires a previously attached client.
    async fn detach(&self, client: ClientId);

    /// Replays the login/world-state packet sequence so a freshly connected
    /// client can render the session's current world.
    async fn send_login_sequence(&self, client: Arc<dyn ClientHandle>);

    /// Writes one named packet upstream.
    async fn write(&self, packet: &str, payload: serde_json::Value);
}

/// Factory for remote sessions.
///
/// Implemented by the packet-codec/session library the embedder brings; the
/// core never constructs sessions itself. The returned receiver carries the
/// session's lifecycle signals until the session ends.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        options: &SessionOptions,
    ) -> Result<(Arc<dyn RemoteSession>, mpsc::Receiver<SessionSignal>), CoreError>;
}
