//! Lifecycle event definitions and dispatch keys.
//!
//! The fixed lifecycle surface of the proxy is a closed tagged union:
//! [`LifecycleEvent`] enumerates every event kind together with its typed
//! payload, and [`LifecycleKind`] is the payload-free discriminant used for
//! registration. Pass-through remote events are open-ended and keyed by name
//! under the `remote:` prefix.

use crate::types::{ClientId, DisconnectKind};
use serde::{Deserialize, Serialize};

/// The fixed set of lifecycle events the proxy core publishes.
///
/// Payloads are typed per variant; handlers match on the variant they bound
/// against. Publishing goes through a single typed
/// [`EventBus::publish`](crate::EventBus::publish) call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The orchestrator is bringing a new remote session up.
    Starting,
    /// The remote session is up and setup has finished.
    Started,
    /// A manual stop began.
    Stopping,
    /// A manual stop finished.
    Stopped,
    /// The remote session object exists and packet plumbing is wired.
    ProxySessionEstablished,
    /// The remote session is now driven by internal/extension logic.
    AutonomousEntered,
    /// Autonomous logic ended, usually because a client is taking control.
    AutonomousExited,
    /// Control of the remote session is transferring to this client.
    Linking(ClientId),
    /// This client is releasing control of the remote session.
    Unlinking(ClientId),
    /// A downstream client logged in.
    ClientConnected {
        client: ClientId,
        remote_connected: bool,
    },
    /// A downstream client went away.
    ClientDisconnected(ClientId),
    /// Every downstream connection is being closed with the given reason.
    ClosingConnections(String),
    /// The upstream session went away.
    RemoteDisconnected {
        kind: DisconnectKind,
        details: String,
    },
    /// Extensions may validate/adjust session options before setup proceeds.
    OptionValidation,
    /// One-time hook point right after a fresh session is established.
    InitialSessionSetup,
}

impl LifecycleEvent {
    /// The payload-free discriminant of this event.
    pub fn kind(&self) -> LifecycleKind {
        match self {
            LifecycleEvent::Starting => LifecycleKind::Starting,
            LifecycleEvent::Started => LifecycleKind::Started,
            LifecycleEvent::Stopping => LifecycleKind::Stopping,
            LifecycleEvent::Stopped => LifecycleKind::Stopped,
            LifecycleEvent::ProxySessionEstablished => LifecycleKind::ProxySessionEstablished,
            LifecycleEvent::AutonomousEntered => LifecycleKind::AutonomousEntered,
            LifecycleEvent::AutonomousExited => LifecycleKind::AutonomousExited,
            LifecycleEvent::Linking(_) => LifecycleKind::Linking,
            LifecycleEvent::Unlinking(_) => LifecycleKind::Unlinking,
            LifecycleEvent::ClientConnected { .. } => LifecycleKind::ClientConnected,
            LifecycleEvent::ClientDisconnected(_) => LifecycleKind::ClientDisconnected,
            LifecycleEvent::ClosingConnections(_) => LifecycleKind::ClosingConnections,
            LifecycleEvent::RemoteDisconnected { .. } => LifecycleKind::RemoteDisconnected,
            LifecycleEvent::OptionValidation => LifecycleKind::OptionValidation,
            LifecycleEvent::InitialSessionSetup => LifecycleKind::InitialSessionSetup,
        }
    }
}

/// Discriminants of [`LifecycleEvent`], used as registration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Starting,
    Started,
    Stopping,
    Stopped,
    ProxySessionEstablished,
    AutonomousEntered,
    AutonomousExited,
    Linking,
    Unlinking,
    ClientConnected,
    ClientDisconnected,
    ClosingConnections,
    RemoteDisconnected,
    OptionValidation,
    InitialSessionSetup,
}

impl LifecycleKind {
    /// The generated handler identity used for a direct lifecycle binding.
    ///
    /// One direct binding per (extension, kind) is permitted; the generated
    /// name is what makes a second binding collide.
    pub fn handler_name(&self) -> &'static str {
        match self {
            LifecycleKind::Starting => "on_starting",
            LifecycleKind::Started => "on_started",
            LifecycleKind::Stopping => "on_stopping",
            LifecycleKind::Stopped => "on_stopped",
            LifecycleKind::ProxySessionEstablished => "on_proxy_session_established",
            LifecycleKind::AutonomousEntered => "on_autonomous_entered",
            LifecycleKind::AutonomousExited => "on_autonomous_exited",
            LifecycleKind::Linking => "on_linking",
            LifecycleKind::Unlinking => "on_unlinking",
            LifecycleKind::ClientConnected => "on_client_connected",
            LifecycleKind::ClientDisconnected => "on_client_disconnected",
            LifecycleKind::ClosingConnections => "on_closing_connections",
            LifecycleKind::RemoteDisconnected => "on_remote_disconnected",
            LifecycleKind::OptionValidation => "on_option_validation",
            LifecycleKind::InitialSessionSetup => "on_initial_session_setup",
        }
    }

    fn key_name(&self) -> &'static str {
        // handler_name minus the "on_" prefix
        &self.handler_name()[3..]
    }
}

impl std::fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key_name())
    }
}

/// Dispatch-table key: either one of the closed lifecycle kinds or a named
/// pass-through remote event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    Lifecycle(LifecycleKind),
    Remote(String),
}

impl EventKey {
    /// Key for a pass-through remote event by name.
    pub fn remote(name: impl Into<String>) -> Self {
        EventKey::Remote(name.into())
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKey::Lifecycle(kind) => write!(f, "lifecycle:{kind}"),
            EventKey::Remote(name) => write!(f, "remote:{name}"),
        }
    }
}

/// What a handler actually receives when its key fires.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Lifecycle(LifecycleEvent),
    Remote {
        name: String,
        payload: serde_json::Value,
    },
}

impl BusEvent {
    /// The dispatch key this event fires under.
    pub fn key(&self) -> EventKey {
        match self {
            BusEvent::Lifecycle(event) => EventKey::Lifecycle(event.kind()),
            BusEvent::Remote { name, .. } => EventKey::Remote(name.clone()),
        }
    }
}
