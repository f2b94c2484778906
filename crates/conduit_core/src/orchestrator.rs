//! The session orchestrator.
//!
//! Owns the upstream session lifecycle, fans lifecycle events out to
//! extensions, and is the entry point every client login, chat line, and
//! completion request passes through. The command registry, control
//! coordinator, and event bus never reference each other; every
//! interaction between them flows through this type.

use crate::client::{ClientHandle, ClientRegistry};
use crate::commands::{handler, CommandNode, CommandRegistry, CommandScope, CommandTree};
use crate::config::{ConduitConfig, ProxyOptions, SessionOptions};
use crate::control::{ControlCoordinator, ControlView};
use crate::error::{ControlError, CoreError};
use crate::extension::{Extension, ExtensionManager};
use crate::session::{RemoteSession, SessionConnector, SessionSignal};
use conduit_event_system::{
    ClientId, DisconnectKind, EventBus, ExtensionBindings, LifecycleEvent,
};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const STOP_REASON: &str = "Proxy manually stopped.";

/// The proxy server: one upstream session, many downstream clients, at most
/// one of them in control.
pub struct ConduitServer {
    options: ProxyOptions,
    session_options: SessionOptions,
    connector: Arc<dyn SessionConnector>,
    bus: Arc<EventBus>,
    commands: CommandRegistry,
    control: ControlCoordinator,
    clients: ClientRegistry,
    extensions: ExtensionManager,
    shared: DashMap<String, serde_json::Value>,
    // Handle to the owning Arc, for command closures and spawned tasks that
    // must not keep the server alive on their own.
    weak_self: Weak<ConduitServer>,
}

impl std::fmt::Debug for ConduitServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConduitServer")
            .field("clients", &self.clients)
            .finish_non_exhaustive()
    }
}

impl ConduitServer {
    /// Builds a server and installs the built-in command set.
    pub async fn new(config: ConduitConfig, connector: Arc<dyn SessionConnector>) -> Arc<Self> {
        let commands = CommandRegistry::new(config.proxy.command_prefix.clone());
        let server = Arc::new_cyclic(|weak| Self {
            options: config.proxy,
            session_options: config.session,
            connector,
            bus: Arc::new(EventBus::new()),
            commands,
            control: ControlCoordinator::new(),
            clients: ClientRegistry::new(),
            extensions: ExtensionManager::new(),
            shared: DashMap::new(),
            weak_self: weak.clone(),
        });
        server.install_builtin_commands().await;
        server
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn options(&self) -> &ProxyOptions {
        &self.options
    }

    /// The active remote session, if any.
    pub async fn session(&self) -> Option<Arc<dyn RemoteSession>> {
        self.control.session().await
    }

    pub async fn is_connected(&self) -> bool {
        self.control.is_connected().await
    }

    pub async fn controlling_client(&self) -> Option<ClientId> {
        self.control.controlling_client().await
    }

    pub async fn is_controlling(&self, client: ClientId) -> bool {
        self.control.is_controlling(client).await
    }

    pub fn was_manually_stopped(&self) -> bool {
        self.control.was_manually_stopped()
    }

    /// Snapshot handed to the command registry on every call that needs
    /// control-state context.
    pub async fn control_view(&self) -> ControlView {
        self.control.view().await
    }

    // ======================= //
    //    session lifecycle    //
    // ======================= //

    /// Connects the upstream session. Idempotent: a no-op while connected.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.control.is_connected().await {
            return Ok(());
        }
        self.control.clear_manual_stop();
        let (session, signals) = self.connector.connect(&self.session_options).await?;
        self.control.install_session(session.clone()).await;
        self.resync_clients(&session).await;
        self.bus.publish(LifecycleEvent::Starting).await;
        self.setup_session(signals).await;
        self.bus.publish(LifecycleEvent::Started).await;
        info!("proxy session started");
        Ok(())
    }

    /// Disconnects the upstream session. Idempotent: a no-op while not
    /// connected. Marks the stop as operator-initiated so external reconnect
    /// policy can tell it apart from an upstream disconnect.
    pub async fn stop(&self) {
        if !self.control.is_connected().await {
            return;
        }
        self.bus.publish(LifecycleEvent::Stopping).await;
        self.control.mark_manual_stop();
        self.disconnect_remote(STOP_REASON).await;
        if self.options.disconnect_all_on_stop {
            self.close_connections(STOP_REASON, None).await;
        } else {
            self.broadcast(STOP_REASON).await;
        }
        self.bus.publish(LifecycleEvent::Stopped).await;
        info!("proxy session stopped");
    }

    /// Stops, waits `delay`, and starts again.
    pub async fn restart(&self, delay: Duration) -> Result<(), CoreError> {
        self.stop().await;
        tokio::time::sleep(delay).await;
        self.start().await
    }

    /// Ends every downstream connection with the given reason.
    pub async fn close_connections(&self, reason: &str, additional: Option<&str>) {
        let full = match additional {
            Some(extra) => format!("{reason}\n\nReason: {extra}"),
            None => reason.to_string(),
        };
        self.bus
            .publish(LifecycleEvent::ClosingConnections(full.clone()))
            .await;
        for client in self.clients.all() {
            client.end(&full).await;
        }
    }

    async fn disconnect_remote(&self, reason: &str) {
        if let Some(session) = self.control.clear_session().await {
            session.unlink().await;
            session.disconnect(reason).await;
        }
    }

    async fn setup_session(&self, mut signals: mpsc::Receiver<SessionSignal>) {
        self.bus
            .publish(LifecycleEvent::ProxySessionEstablished)
            .await;
        self.bus.publish(LifecycleEvent::OptionValidation).await;
        self.bus.publish(LifecycleEvent::InitialSessionSetup).await;

        let server = self.weak_self.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let Some(server) = server.upgrade() else { break };
                server.handle_session_signal(signal).await;
            }
        });
    }

    /// Applies one upstream lifecycle signal.
    ///
    /// A fault signal arriving after the session was already cleared is a
    /// no-op; a torn-down session carries no further information.
    pub async fn handle_session_signal(&self, signal: SessionSignal) {
        match signal {
            SessionSignal::Spawned => self.control.begin_autonomous(&self.bus).await,
            SessionSignal::Kicked(reason) => {
                self.control
                    .handle_remote_fault(DisconnectKind::Kicked, reason, &self.bus)
                    .await
            }
            SessionSignal::Ended => {
                self.control
                    .handle_remote_fault(DisconnectKind::End, "connection ended", &self.bus)
                    .await
            }
            SessionSignal::Errored(error) => {
                self.control
                    .handle_remote_fault(DisconnectKind::Error, error, &self.bus)
                    .await
            }
        }
    }

    /// Re-wires clients that were connected before this session existed.
    async fn resync_clients(&self, session: &Arc<dyn RemoteSession>) {
        if self.clients.is_empty() {
            return;
        }
        self.broadcast("[INFO] Proxy session is starting!").await;
        self.broadcast("Reconnect to see the live world.").await;
        for client in self.clients.all() {
            session.attach(client).await;
        }
    }

    // ======================= //
    //      client traffic     //
    // ======================= //

    /// Entry point for every downstream login.
    pub async fn handle_client_login(&self, client: Arc<dyn ClientHandle>) {
        let id = client.id();
        let remote_connected = self.control.is_connected().await;
        self.clients.insert(client.clone());
        info!(client = %id, username = client.username(), remote_connected, "client connected");
        self.bus
            .publish(LifecycleEvent::ClientConnected {
                client: id,
                remote_connected,
            })
            .await;
        if remote_connected {
            self.connected_login(client).await;
        } else {
            self.offline_login(client).await;
        }
    }

    async fn connected_login(&self, client: Arc<dyn ClientHandle>) {
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        for (extension, _) in self.extensions.snapshot().await {
            if extension.on_connected_login(&client, &this).await.is_some() {
                debug!(extension = extension.name(), "login intercepted");
                return;
            }
        }
        // Default: attach as a silent spectator of the existing controller.
        let Some(session) = self.control.session().await else {
            return;
        };
        session.send_login_sequence(client.clone()).await;
        session.attach(client).await;
    }

    async fn offline_login(&self, client: Arc<dyn ClientHandle>) {
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        for (extension, _) in self.extensions.snapshot().await {
            if extension.on_offline_login(&client, &this).await.is_some() {
                debug!(extension = extension.name(), "login intercepted");
                return;
            }
        }
        // Default: spawn into a neutral placeholder world so the client can
        // issue disconnected-tree commands.
        client
            .write(
                "login",
                json!({
                    "entityId": 0,
                    "levelType": "default",
                    "gameMode": 0,
                    "dimension": 0,
                    "difficulty": 2,
                    "maxPlayers": 1,
                    "reducedDebugInfo": false,
                }),
            )
            .await;
        client
            .write(
                "position",
                json!({
                    "x": 0.0,
                    "y": 1.62,
                    "z": 0.0,
                    "yaw": 0,
                    "pitch": 0,
                    "flags": 0,
                }),
            )
            .await;
    }

    /// Entry point for every downstream disconnect.
    pub async fn handle_client_disconnect(&self, id: ClientId) {
        if self.clients.remove(id).is_none() {
            return;
        }
        self.commands.forget_client(id);
        self.bus.publish(LifecycleEvent::ClientDisconnected(id)).await;
        // A departed controller never keeps the slot.
        self.control.controller_departed(id, &self.bus).await;
    }

    /// Handles one inbound chat message, pipe-splitting it into command
    /// lines. Returns whether the raw chat should be forwarded upstream.
    pub async fn handle_client_chat(&self, client: ClientId, message: &str) -> bool {
        let view = self.control.view().await;
        if self.options.disable_commands {
            return view.is_controlling(client);
        }
        let lines: Vec<&str> = message.split('|').collect();
        self.commands.handle_chat(&view, client, &lines).await
    }

    /// Handles one inbound tab-completion request. Returns whether the
    /// request should continue upstream; when it should not, the response is
    /// written to the client directly.
    pub async fn handle_client_tab_complete(&self, client: ClientId, text: &str) -> bool {
        let view = self.control.view().await;
        if view.session_active {
            self.commands.note_completion_request(client, text);
            if view.is_controlling(client) {
                return true;
            }
        }
        let matches = self.commands.local_completions(&view, client, text).await;
        if let Some(handle) = self.clients.get(client) {
            handle
                .write("tab_complete", json!({ "matches": matches }))
                .await;
        }
        false
    }

    /// Merges registry matches into an upstream completion response bound
    /// for `client`. An error here aborts only this completion request.
    pub async fn handle_remote_tab_complete(
        &self,
        client: ClientId,
        upstream: Vec<String>,
    ) -> Result<Vec<String>, CoreError> {
        let view = self.control.view().await;
        Ok(self
            .commands
            .merge_upstream_matches(&view, client, upstream)
            .await?)
    }

    // ======================= //
    //     control transfer    //
    // ======================= //

    /// Transfers control of the session to `client`. See
    /// [`ControlCoordinator::link`](crate::control::ControlCoordinator::link)
    /// for the contract.
    pub async fn link(&self, client: ClientId) -> Result<bool, CoreError> {
        let handle = self
            .clients
            .get(client)
            .ok_or(ControlError::UnknownClient(client))?;
        Ok(self.control.link(handle, &self.bus).await?)
    }

    /// Releases control held by `client`.
    pub async fn unlink(&self, client: ClientId) -> Result<bool, CoreError> {
        Ok(self.control.unlink(client, &self.bus).await?)
    }

    // ======================= //
    //       extensions        //
    // ======================= //

    /// Loads an extension: creates its capability handle, records it, and
    /// runs its `on_load`. A failed `on_load` rolls the registration back.
    pub async fn load_extension(&self, extension: Arc<dyn Extension>) -> Result<(), CoreError> {
        let Some(this) = self.weak_self.upgrade() else {
            return Ok(());
        };
        let bindings = Arc::new(ExtensionBindings::new(extension.name(), self.bus.clone()));
        self.extensions
            .insert(extension.clone(), bindings.clone())
            .await?;
        if let Err(e) = extension.on_load(&this, &bindings).await {
            warn!(extension = extension.name(), "extension load failed: {e}");
            bindings.unbind_all().await;
            self.extensions.remove(extension.name()).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Unloads an extension and removes every subscription it created.
    pub async fn unload_extension(&self, name: &str) -> bool {
        let Some((extension, bindings)) = self.extensions.remove(name).await else {
            return false;
        };
        if let Some(this) = self.weak_self.upgrade() {
            extension.on_unload(&this).await;
        }
        let removed = bindings.unbind_all().await;
        info!(extension = name, subscriptions = removed, "extension unloaded");
        true
    }

    pub async fn enable_extension(&self, name: &str) -> bool {
        self.extensions.set_enabled(name, true).await
    }

    pub async fn disable_extension(&self, name: &str) -> bool {
        self.extensions.set_enabled(name, false).await
    }

    pub async fn has_extension(&self, name: &str) -> bool {
        self.extensions.is_loaded(name).await
    }

    /// Registers a command tree into the named scope. Exposed to extensions.
    pub async fn register_commands(&self, scope: CommandScope, tree: CommandTree) {
        self.commands.register(scope, tree).await;
    }

    /// Re-emits an upstream domain event to subscribed extensions under the
    /// `remote:<name>` convention.
    pub async fn publish_remote<P: Serialize>(
        &self,
        name: &str,
        payload: &P,
    ) -> Result<(), CoreError> {
        Ok(self.bus.publish_remote(name, payload).await?)
    }

    // ======================= //
    //       shared data       //
    // ======================= //

    /// Stores a value in the process-wide keyed store shared by extensions.
    pub fn share_data(&self, key: impl Into<String>, value: serde_json::Value) {
        self.shared.insert(key.into(), value);
    }

    pub fn get_shared_data(&self, key: &str) -> Option<serde_json::Value> {
        self.shared.get(key).map(|entry| entry.value().clone())
    }

    pub fn drop_shared_data(&self, key: &str) -> bool {
        self.shared.remove(key).is_some()
    }

    // ======================= //
    //      message utils      //
    // ======================= //

    /// Sends a proxy chat message to one client, applying the configured
    /// chat prefix.
    pub async fn message(&self, client: ClientId, text: &str) {
        self.message_with(client, text, true, true).await;
    }

    /// Sends a proxy chat message with explicit prefix/formatting control.
    pub async fn message_with(
        &self,
        client: ClientId,
        text: &str,
        with_prefix: bool,
        allow_formatting: bool,
    ) {
        let mut text = if allow_formatting {
            text.to_string()
        } else {
            strip_format_codes(text)
        };
        if with_prefix {
            if let Some(prefix) = &self.options.chat_prefix {
                text = format!("{prefix}{text}");
            }
        }
        if let Some(handle) = self.clients.get(client) {
            send_chat(handle.as_ref(), &text).await;
        }
    }

    /// Sends a proxy chat message to every connected client.
    pub async fn broadcast(&self, text: &str) {
        for client in self.clients.all() {
            self.message(client.id(), text).await;
        }
    }

    // ======================= //
    //    built-in commands    //
    // ======================= //

    /// Manually runs a command by name for `client`.
    pub async fn run_command(&self, client: ClientId, command: &str, args: Vec<String>) -> bool {
        let view = self.control.view().await;
        self.commands.run_command(&view, client, command, args).await
    }

    async fn install_builtin_commands(&self) {
        let srv = self.weak_self.clone();
        self.commands
            .register_command(
                CommandScope::Connected,
                "pstop",
                CommandNode::new(handler(move |_, _| {
                    let srv = srv.clone();
                    async move {
                        if let Some(srv) = srv.upgrade() {
                            srv.stop().await;
                        }
                        Ok(())
                    }
                }))
                .with_usage("pstop")
                .with_description("stops the proxy"),
            )
            .await;

        let srv = self.weak_self.clone();
        self.commands
            .register_command(
                CommandScope::Disconnected,
                "pstart",
                CommandNode::new(handler(move |_, _| {
                    let srv = srv.clone();
                    async move {
                        if let Some(srv) = srv.upgrade() {
                            srv.start().await?;
                        }
                        Ok(())
                    }
                }))
                .with_usage("pstart")
                .with_description("starts the proxy"),
            )
            .await;

        let srv = self.weak_self.clone();
        self.commands
            .register_command(
                CommandScope::Universal,
                "phelp",
                CommandNode::new(handler(move |client, args| {
                    let srv = srv.clone();
                    async move {
                        if let Some(srv) = srv.upgrade() {
                            srv.print_help(client, args).await;
                        }
                        Ok(())
                    }
                }))
                .with_description("this proxy help message"),
            )
            .await;

        let srv = self.weak_self.clone();
        self.commands
            .register_command(
                CommandScope::Connected,
                "pusage",
                CommandNode::new(handler(move |client, args| {
                    let srv = srv.clone();
                    async move {
                        if let Some(srv) = srv.upgrade() {
                            srv.print_usage(client, args).await;
                        }
                        Ok(())
                    }
                }))
                .with_usage("pusage <cmd>")
                .with_description("gets the usage of a specific command"),
            )
            .await;
    }

    /// Lists the commands `client` may currently run, with descriptions.
    pub async fn print_help(&self, client: ClientId, filter: Vec<String>) {
        let view = self.control.view().await;
        let active = self.commands.active_commands(&view, client, false).await;
        let wanted = filter.join(" ");
        let mut entries: Vec<(String, Option<String>)> = active
            .into_iter()
            .filter(|(key, _)| key.starts_with(&wanted))
            .map(|(key, node)| (key, node.description))
            .collect();
        entries.sort();

        self.message_with(client, "§6---------- Proxy Commands: ------------- ", false, true)
            .await;
        for (key, description) in entries {
            let line = format!("§6{key}:§r {}", description.as_deref().unwrap_or("Unknown."));
            self.message_with(client, &line, false, true).await;
        }
    }

    /// Prints usage for commands whose key contains the wanted text.
    /// Visibility is bypassed: a client may read the usage of a command it
    /// is not currently permitted to run.
    pub async fn print_usage(&self, client: ClientId, wanted: Vec<String>) {
        let wanted = wanted.join(" ");
        let view = self.control.view().await;
        let active = self.commands.active_commands(&view, client, true).await;
        let mut found: Vec<(String, CommandNode)> = active
            .into_iter()
            .filter(|(key, _)| key.contains(&wanted))
            .collect();
        if found.is_empty() {
            self.message(client, "Cannot find command!").await;
            return;
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));

        self.message_with(
            client,
            "§6---------- Proxy Command Usage: ------------- ",
            false,
            true,
        )
        .await;
        for (key, node) in found {
            let line = match (&node.usage, &node.description) {
                (None, None) => format!("Usage of {key} is unknown, assume no arguments!"),
                _ => {
                    let head = match &node.usage {
                        Some(usage) => {
                            format!("§6{}{key}: {usage} |§r ", self.commands.prefix())
                        }
                        None => format!("§6{key}: (no args) |§r "),
                    };
                    format!("{head}{}", node.description.as_deref().unwrap_or("Unknown."))
                }
            };
            self.message_with(client, &line, false, true).await;
        }
    }
}

async fn send_chat(client: &dyn ClientHandle, text: &str) {
    let body = json!({ "text": text });
    client
        .write("chat", json!({ "message": body.to_string(), "position": 1 }))
        .await;
}

/// Removes `§x` formatting codes.
fn strip_format_codes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '§' {
            chars.next();
        } else {
            out.push(c);
        }
    }
    out
}
