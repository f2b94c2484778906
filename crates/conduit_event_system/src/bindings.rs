//! Per-extension capability handles.
//!
//! Every extension talks to the bus through its own [`ExtensionBindings`],
//! which carries the extension's enabled flag and a ledger of everything it
//! installed. The wrapped closures the handle installs check the flag before
//! invoking the real handler, so disabling an extension silently no-ops its
//! handlers without touching the dispatch table.

use crate::bus::{EventBus, HandlerFn};
use crate::events::{BusEvent, EventKey, LifecycleEvent, LifecycleKind};
use crate::{EventError, ExtensionError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// One entry in an extension's subscription ledger: the event it bound and
/// the handler identity it bound under. The wrapped closure itself lives in
/// the bus's dispatch table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub event: EventKey,
    pub handler: String,
}

/// Capability handle held by one loaded extension.
///
/// Owns the extension's enabled flag and subscription ledger; the bus owns
/// only the dispatch table. Dropping the handle does not remove handlers;
/// unload goes through [`ExtensionBindings::unbind_all`] so removal is
/// explicit and complete.
pub struct ExtensionBindings {
    owner: String,
    enabled: Arc<AtomicBool>,
    bus: Arc<EventBus>,
    ledger: Mutex<Vec<Subscription>>,
}

impl std::fmt::Debug for ExtensionBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionBindings")
            .field("owner", &self.owner)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl ExtensionBindings {
    /// Creates a handle for `owner`, enabled by default.
    pub fn new(owner: impl Into<String>, bus: Arc<EventBus>) -> Self {
        Self {
            owner: owner.into(),
            enabled: Arc::new(AtomicBool::new(true)),
            bus,
            ledger: Mutex::new(Vec::new()),
        }
    }

    /// Name of the owning extension.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flips the enabled flag. Installed handlers stay in the dispatch table
    /// either way; while disabled they no-op.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        debug!(extension = %self.owner, enabled, "extension toggled");
    }

    /// Declares a direct binding for one lifecycle kind.
    ///
    /// At most one direct binding per (extension, kind): the handler identity
    /// is generated from the kind, so a second `bind` for the same kind is a
    /// [`ExtensionError::DuplicateSubscription`].
    pub async fn bind<F>(&self, kind: LifecycleKind, handler: F) -> Result<(), ExtensionError>
    where
        F: Fn(&LifecycleEvent) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let enabled = self.enabled.clone();
        let wrapped: HandlerFn = Arc::new(move |event| {
            if !enabled.load(Ordering::SeqCst) {
                return Ok(());
            }
            match event {
                BusEvent::Lifecycle(lifecycle) => handler(lifecycle),
                BusEvent::Remote { .. } => Ok(()),
            }
        });
        self.install(EventKey::Lifecycle(kind), kind.handler_name(), wrapped)
            .await
    }

    /// Generic subscription to any event key under a caller-chosen handler
    /// identity. A duplicate (event, handler) pair for this extension is a
    /// programming error.
    pub async fn subscribe<F>(
        &self,
        key: EventKey,
        handler_name: &str,
        handler: F,
    ) -> Result<(), ExtensionError>
    where
        F: Fn(&BusEvent) -> Result<(), EventError> + Send + Sync + 'static,
    {
        let enabled = self.enabled.clone();
        let wrapped: HandlerFn = Arc::new(move |event| {
            if !enabled.load(Ordering::SeqCst) {
                return Ok(());
            }
            handler(event)
        });
        self.install(key, handler_name, wrapped).await
    }

    /// Removes one generic subscription (or direct binding) by identity.
    ///
    /// Returns whether anything was removed.
    pub async fn unsubscribe(&self, key: &EventKey, handler_name: &str) -> bool {
        let removed = self.bus.remove(&self.owner, key, handler_name).await;
        if removed {
            self.ledger
                .lock()
                .await
                .retain(|s| !(s.event == *key && s.handler == handler_name));
        }
        removed
    }

    /// Removes every subscription this extension created, direct bindings
    /// included. Called on unload; afterwards the dispatch table holds no
    /// entry for this extension.
    pub async fn unbind_all(&self) -> usize {
        let subscriptions: Vec<Subscription> = {
            let mut ledger = self.ledger.lock().await;
            ledger.drain(..).collect()
        };
        let mut removed = 0;
        for sub in &subscriptions {
            if self.bus.remove(&self.owner, &sub.event, &sub.handler).await {
                removed += 1;
            }
        }
        removed
    }

    /// Snapshot of the current ledger.
    pub async fn subscriptions(&self) -> Vec<Subscription> {
        self.ledger.lock().await.clone()
    }

    async fn install(
        &self,
        key: EventKey,
        handler_name: &str,
        wrapped: HandlerFn,
    ) -> Result<(), ExtensionError> {
        self.bus
            .install(&self.owner, key.clone(), handler_name, wrapped)
            .await?;
        self.ledger.lock().await.push(Subscription {
            event: key,
            handler: handler_name.to_string(),
        });
        Ok(())
    }
}
