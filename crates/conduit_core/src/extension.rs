//! Extension contract and lifecycle management.
//!
//! Extensions are in-process trait objects loaded through the orchestrator.
//! On load each gets a capability handle
//! ([`ExtensionBindings`](conduit_event_system::ExtensionBindings)) for its
//! event subscriptions and registers its command trees through the server;
//! on unload every subscription it created is removed.

use crate::client::ClientHandle;
use crate::orchestrator::ConduitServer;
use async_trait::async_trait;
use conduit_event_system::{ExtensionBindings, ExtensionError};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// One independently authored proxy extension.
///
/// Implementations register commands and event bindings in
/// [`Extension::on_load`] and may intercept the per-client login flows. The
/// login hooks run in registration order; the first hook returning
/// `Some(())` short-circuits the remaining hooks and the default behavior.
#[async_trait]
pub trait Extension: Send + Sync + 'static {
    /// Unique, stable extension name. Used for event ownership, logging,
    /// and enable/disable addressing.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Called once when the extension is loaded. Register commands via
    /// [`ConduitServer::register_commands`] and event handlers via the
    /// capability handle here.
    async fn on_load(
        &self,
        server: &Arc<ConduitServer>,
        bindings: &Arc<ExtensionBindings>,
    ) -> Result<(), ExtensionError>;

    /// Called when the extension is unloaded, before its subscriptions are
    /// removed.
    async fn on_unload(&self, _server: &Arc<ConduitServer>) {}

    /// First-refusal hook for a client logging in while a remote session
    /// exists. Return `Some(())` to take over the login entirely.
    async fn on_connected_login(
        &self,
        _client: &Arc<dyn ClientHandle>,
        _server: &Arc<ConduitServer>,
    ) -> Option<()> {
        None
    }

    /// First-refusal hook for a client logging in with no remote session.
    async fn on_offline_login(
        &self,
        _client: &Arc<dyn ClientHandle>,
        _server: &Arc<ConduitServer>,
    ) -> Option<()> {
        None
    }
}

struct LoadedExtension {
    extension: Arc<dyn Extension>,
    bindings: Arc<ExtensionBindings>,
}

/// Keeps loaded extensions in registration order.
///
/// Order matters: login hooks run first-registered first.
#[derive(Default)]
pub struct ExtensionManager {
    loaded: RwLock<Vec<LoadedExtension>>,
}

impl ExtensionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a loaded extension. Loading the same name twice is a
    /// programming error; unload the old instance first.
    pub(crate) async fn insert(
        &self,
        extension: Arc<dyn Extension>,
        bindings: Arc<ExtensionBindings>,
    ) -> Result<(), ExtensionError> {
        let mut loaded = self.loaded.write().await;
        if loaded.iter().any(|l| l.extension.name() == extension.name()) {
            return Err(ExtensionError::InitializationFailed(format!(
                "extension {} is already loaded",
                extension.name()
            )));
        }
        info!(
            extension = extension.name(),
            version = extension.version(),
            "extension loaded"
        );
        loaded.push(LoadedExtension {
            extension,
            bindings,
        });
        Ok(())
    }

    pub(crate) async fn remove(
        &self,
        name: &str,
    ) -> Option<(Arc<dyn Extension>, Arc<ExtensionBindings>)> {
        let mut loaded = self.loaded.write().await;
        let index = loaded.iter().position(|l| l.extension.name() == name)?;
        let removed = loaded.remove(index);
        Some((removed.extension, removed.bindings))
    }

    /// Flips an extension's enabled flag. Returns whether it was found.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let loaded = self.loaded.read().await;
        match loaded.iter().find(|l| l.extension.name() == name) {
            Some(entry) => {
                entry.bindings.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.loaded
            .read()
            .await
            .iter()
            .any(|l| l.extension.name() == name)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.loaded
            .read()
            .await
            .iter()
            .find(|l| l.extension.name() == name)
            .map(|l| l.extension.clone())
    }

    pub async fn count(&self) -> usize {
        self.loaded.read().await.len()
    }

    /// Registration-order snapshot for hook iteration.
    pub(crate) async fn snapshot(&self) -> Vec<(Arc<dyn Extension>, Arc<ExtensionBindings>)> {
        self.loaded
            .read()
            .await
            .iter()
            .map(|l| (l.extension.clone(), l.bindings.clone()))
            .collect()
    }
}

impl std::fmt::Debug for ExtensionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionManager").finish_non_exhaustive()
    }
}
