//! Control-transfer state machine.
//!
//! The coordinator owns the remote-session slot and the controlling-client
//! slot, and is the only component that mutates either. It never talks to
//! the command registry or the extension manager; the orchestrator hands it
//! the event bus per call so transitions publish their lifecycle signals.

use crate::client::ClientHandle;
use crate::error::ControlError;
use crate::session::RemoteSession;
use conduit_event_system::{ClientId, DisconnectKind, EventBus, LifecycleEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Operating mode of the remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    /// No remote session exists.
    Disconnected,
    /// The session is driven by internal/extension logic.
    Autonomous,
    /// Exactly this client drives the session.
    Controlled(ClientId),
}

/// Read-only snapshot of the coordinator, handed to the command registry by
/// the orchestrator so the leaves never reference each other.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlView {
    pub session_active: bool,
    pub controlling: Option<ClientId>,
}

impl ControlView {
    pub fn is_controlling(&self, client: ClientId) -> bool {
        self.controlling == Some(client)
    }
}

/// Owns the single remote-session slot and arbitrates control transfer.
pub struct ControlCoordinator {
    state: RwLock<ControlState>,
    session: RwLock<Option<Arc<dyn RemoteSession>>>,
    manually_stopped: AtomicBool,
}

impl std::fmt::Debug for ControlCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlCoordinator")
            .field("manually_stopped", &self.was_manually_stopped())
            .finish_non_exhaustive()
    }
}

impl ControlCoordinator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ControlState::Disconnected),
            session: RwLock::new(None),
            manually_stopped: AtomicBool::new(false),
        }
    }

    /// Installs a freshly connected session. The state stays `Disconnected`
    /// until the session's spawn signal enters autonomous mode.
    pub async fn install_session(&self, session: Arc<dyn RemoteSession>) {
        *self.session.write().await = Some(session);
    }

    /// The active session, if any.
    pub async fn session(&self) -> Option<Arc<dyn RemoteSession>> {
        self.session.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn state(&self) -> ControlState {
        *self.state.read().await
    }

    pub async fn controlling_client(&self) -> Option<ClientId> {
        match *self.state.read().await {
            ControlState::Controlled(id) => Some(id),
            _ => None,
        }
    }

    pub async fn is_controlling(&self, client: ClientId) -> bool {
        self.controlling_client().await == Some(client)
    }

    /// Snapshot for the command registry.
    pub async fn view(&self) -> ControlView {
        ControlView {
            session_active: self.is_connected().await,
            controlling: self.controlling_client().await,
        }
    }

    /// Transfers control of the session to `client`.
    ///
    /// Returns `Ok(false)` without any state change when `client` already
    /// controls the session. Calling with no active session is a caller
    /// contract violation and returns [`ControlError::NoActiveSession`].
    ///
    /// If a different client currently controls the session, that client is
    /// explicitly unlinked first (replace semantics), so controllers never
    /// accumulate.
    pub async fn link(
        &self,
        client: Arc<dyn ClientHandle>,
        bus: &EventBus,
    ) -> Result<bool, ControlError> {
        let session = self
            .session()
            .await
            .ok_or(ControlError::NoActiveSession)?;
        let id = client.id();

        let previous = *self.state.read().await;
        if previous == ControlState::Controlled(id) {
            return Ok(false);
        }

        if let ControlState::Controlled(old) = previous {
            warn!(old = %old, new = %id, "preempting current controller");
            bus.publish(LifecycleEvent::Unlinking(old)).await;
            session.unlink().await;
        }

        bus.publish(LifecycleEvent::Linking(id)).await;
        if previous == ControlState::Autonomous {
            bus.publish(LifecycleEvent::AutonomousExited).await;
        }
        session.link(client).await;
        *self.state.write().await = ControlState::Controlled(id);
        info!(client = %id, "control transferred");
        Ok(true)
    }

    /// Releases control held by `client` and resumes autonomous mode.
    ///
    /// Returns `Ok(false)` without any state change when `client` is not the
    /// current controller. Calling with no active session is a caller
    /// contract violation.
    pub async fn unlink(&self, client: ClientId, bus: &EventBus) -> Result<bool, ControlError> {
        let session = self
            .session()
            .await
            .ok_or(ControlError::NoActiveSession)?;

        if *self.state.read().await != ControlState::Controlled(client) {
            return Ok(false);
        }

        bus.publish(LifecycleEvent::Unlinking(client)).await;
        session.unlink().await;
        *self.state.write().await = ControlState::Autonomous;
        bus.publish(LifecycleEvent::AutonomousEntered).await;
        info!(client = %client, "control released");
        Ok(true)
    }

    /// Enters autonomous mode, if a session exists and no client controls
    /// it. Driven by the session's spawn signal.
    pub async fn begin_autonomous(&self, bus: &EventBus) {
        if !self.is_connected().await {
            return;
        }
        {
            let mut state = self.state.write().await;
            match *state {
                ControlState::Controlled(_) | ControlState::Autonomous => return,
                ControlState::Disconnected => *state = ControlState::Autonomous,
            }
        }
        bus.publish(LifecycleEvent::AutonomousEntered).await;
    }

    /// The current controller disconnected; drop control and resume
    /// autonomous mode. No-op when `client` was not the controller.
    pub async fn controller_departed(&self, client: ClientId, bus: &EventBus) {
        if *self.state.read().await != ControlState::Controlled(client) {
            return;
        }
        if let Some(session) = self.session().await {
            session.unlink().await;
        }
        *self.state.write().await = ControlState::Autonomous;
        bus.publish(LifecycleEvent::AutonomousEntered).await;
        info!(client = %client, "controller disconnected, resuming autonomous mode");
    }

    /// The upstream session went away (kick, end, or transport error).
    ///
    /// Ends whichever logic mode was active, publishes the typed disconnect
    /// event, and clears the session and controller slots. A fault arriving
    /// after the session was already cleared is a no-op, since late signals from
    /// a torn-down session carry no information.
    pub async fn handle_remote_fault(
        &self,
        kind: DisconnectKind,
        details: impl Into<String>,
        bus: &EventBus,
    ) {
        let session = { self.session.write().await.take() };
        if session.is_none() {
            return;
        }

        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, ControlState::Disconnected)
        };
        if previous == ControlState::Autonomous {
            bus.publish(LifecycleEvent::AutonomousExited).await;
        }
        let details = details.into();
        warn!(kind = %kind, details = %details, "remote session disconnected");
        bus.publish(LifecycleEvent::RemoteDisconnected { kind, details })
            .await;
    }

    /// Clears the session slot for a manual stop, returning the session so
    /// the orchestrator can tear it down. Controller and state reset.
    pub async fn clear_session(&self) -> Option<Arc<dyn RemoteSession>> {
        let session = self.session.write().await.take();
        *self.state.write().await = ControlState::Disconnected;
        session
    }

    pub fn mark_manual_stop(&self) {
        self.manually_stopped.store(true, Ordering::SeqCst);
    }

    pub fn clear_manual_stop(&self) {
        self.manually_stopped.store(false, Ordering::SeqCst);
    }

    /// Whether the last disconnect was operator-initiated. External
    /// reconnect policy reads this to decide whether to retry.
    pub fn was_manually_stopped(&self) -> bool {
        self.manually_stopped.load(Ordering::SeqCst)
    }
}

impl Default for ControlCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockClient, MockSession};

    async fn connected_coordinator() -> (ControlCoordinator, Arc<MockSession>) {
        let coordinator = ControlCoordinator::new();
        let session = Arc::new(MockSession::new());
        coordinator.install_session(session.clone()).await;
        (coordinator, session)
    }

    #[tokio::test]
    async fn link_with_no_session_is_a_contract_violation() {
        let coordinator = ControlCoordinator::new();
        let bus = EventBus::new();
        let client = MockClient::arc("alice");
        let err = coordinator.link(client, &bus).await.unwrap_err();
        assert!(matches!(err, ControlError::NoActiveSession));
        assert_eq!(coordinator.state().await, ControlState::Disconnected);
    }

    #[tokio::test]
    async fn link_twice_is_an_idempotent_no_op() {
        let (coordinator, session) = connected_coordinator().await;
        let bus = EventBus::new();
        let client = MockClient::arc("alice");

        assert!(coordinator.link(client.clone(), &bus).await.unwrap());
        assert!(!coordinator.link(client.clone(), &bus).await.unwrap());
        assert_eq!(session.link_count(), 1);
        assert_eq!(
            coordinator.state().await,
            ControlState::Controlled(client.id())
        );
    }

    #[tokio::test]
    async fn unlink_by_non_controller_is_rejected() {
        let (coordinator, _session) = connected_coordinator().await;
        let bus = EventBus::new();
        let alice = MockClient::arc("alice");
        let bob = MockClient::arc("bob");

        coordinator.link(alice.clone(), &bus).await.unwrap();
        assert!(!coordinator.unlink(bob.id(), &bus).await.unwrap());
        assert_eq!(
            coordinator.state().await,
            ControlState::Controlled(alice.id())
        );
    }

    #[tokio::test]
    async fn at_most_one_controller_across_any_sequence() {
        let (coordinator, session) = connected_coordinator().await;
        let bus = EventBus::new();
        let alice = MockClient::arc("alice");
        let bob = MockClient::arc("bob");

        coordinator.begin_autonomous(&bus).await;
        coordinator.link(alice.clone(), &bus).await.unwrap();
        // Replace semantics: bob preempts alice, alice is unlinked first.
        coordinator.link(bob.clone(), &bus).await.unwrap();
        assert_eq!(coordinator.controlling_client().await, Some(bob.id()));
        assert!(!coordinator.is_controlling(alice.id()).await);
        assert_eq!(session.unlink_count(), 1);

        coordinator.unlink(bob.id(), &bus).await.unwrap();
        assert_eq!(coordinator.controlling_client().await, None);
        assert_eq!(coordinator.state().await, ControlState::Autonomous);
    }

    #[tokio::test]
    async fn remote_fault_resets_to_disconnected() {
        let (coordinator, _session) = connected_coordinator().await;
        let bus = EventBus::new();
        coordinator.begin_autonomous(&bus).await;

        coordinator
            .handle_remote_fault(DisconnectKind::Kicked, "afk too long", &bus)
            .await;
        assert_eq!(coordinator.state().await, ControlState::Disconnected);
        assert!(!coordinator.is_connected().await);

        // A second, late fault is a no-op.
        coordinator
            .handle_remote_fault(DisconnectKind::End, "", &bus)
            .await;
        assert_eq!(coordinator.state().await, ControlState::Disconnected);
    }

    #[tokio::test]
    async fn controller_departure_resumes_autonomous_mode() {
        let (coordinator, session) = connected_coordinator().await;
        let bus = EventBus::new();
        let alice = MockClient::arc("alice");
        coordinator.link(alice.clone(), &bus).await.unwrap();

        coordinator.controller_departed(alice.id(), &bus).await;
        assert_eq!(coordinator.state().await, ControlState::Autonomous);
        assert_eq!(session.unlink_count(), 1);
    }
}
