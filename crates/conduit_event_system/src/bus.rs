//! The dispatch table and publish paths.

use crate::events::{BusEvent, EventKey, LifecycleEvent};
use crate::EventError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Type-erased handler stored in the dispatch table.
///
/// Handlers installed through [`ExtensionBindings`](crate::ExtensionBindings)
/// arrive here already wrapped in the extension's enabled-flag check.
pub type HandlerFn = Arc<dyn Fn(&BusEvent) -> Result<(), EventError> + Send + Sync>;

struct RegisteredHandler {
    owner: String,
    name: String,
    callback: HandlerFn,
}

/// Statistics about the bus, useful for monitoring and tests.
#[derive(Debug, Default, Clone)]
pub struct EventBusStats {
    /// Total number of handlers currently installed.
    pub total_handlers: usize,
    /// Total number of events published since creation.
    pub events_published: u64,
}

/// The event bus that routes lifecycle and pass-through remote events to
/// extension handlers.
///
/// The bus owns nothing but the dispatch table; per-extension state (the
/// enabled flag, the subscription ledger) lives on each extension's
/// [`ExtensionBindings`](crate::ExtensionBindings) capability handle.
///
/// All dispatch is synchronous with respect to other bus operations: handlers
/// for one event run to completion, in installation order, before the next
/// publish proceeds. Handler failures are logged and never abort dispatch of
/// the remaining handlers.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKey, Vec<RegisteredHandler>>>,
    stats: RwLock<EventBusStats>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    /// Creates a new bus with no installed handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            stats: RwLock::new(EventBusStats::default()),
        }
    }

    /// Publishes one lifecycle event to every handler bound to its kind.
    pub async fn publish(&self, event: LifecycleEvent) {
        let key = EventKey::Lifecycle(event.kind());
        self.dispatch(key, BusEvent::Lifecycle(event)).await;
    }

    /// Re-emits an upstream event under the `remote:<name>` convention.
    ///
    /// The payload is serialized to JSON; a payload that cannot be serialized
    /// is a caller bug and is surfaced as an error rather than dispatched
    /// half-formed.
    pub async fn publish_remote<P: Serialize>(
        &self,
        name: &str,
        payload: &P,
    ) -> Result<(), EventError> {
        let payload = serde_json::to_value(payload)?;
        self.dispatch(
            EventKey::remote(name),
            BusEvent::Remote {
                name: name.to_string(),
                payload,
            },
        )
        .await;
        Ok(())
    }

    async fn dispatch(&self, key: EventKey, event: BusEvent) {
        let callbacks: Vec<(String, HandlerFn)> = {
            let handlers = self.handlers.read().await;
            match handlers.get(&key) {
                Some(list) => list
                    .iter()
                    .map(|h| (h.name.clone(), h.callback.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        self.stats.write().await.events_published += 1;
        if callbacks.is_empty() {
            debug!(event = %key, "no handlers for event");
            return;
        }

        for (name, callback) in callbacks {
            if let Err(e) = callback(&event) {
                error!(event = %key, handler = %name, "handler failed: {e}");
            }
        }
    }

    /// Installs a handler under `(owner, key, name)`.
    ///
    /// Rejects a duplicate `(owner, key, name)` triple: registering the same
    /// handler identity for the same event twice is a programming error in
    /// the owning extension.
    pub async fn install(
        &self,
        owner: &str,
        key: EventKey,
        name: &str,
        callback: HandlerFn,
    ) -> Result<(), crate::ExtensionError> {
        let mut handlers = self.handlers.write().await;
        let list = handlers.entry(key.clone()).or_default();
        if list.iter().any(|h| h.owner == owner && h.name == name) {
            return Err(crate::ExtensionError::DuplicateSubscription {
                extension: owner.to_string(),
                event: key.to_string(),
                handler: name.to_string(),
            });
        }
        list.push(RegisteredHandler {
            owner: owner.to_string(),
            name: name.to_string(),
            callback,
        });
        drop(handlers);

        self.stats.write().await.total_handlers += 1;
        info!(extension = owner, event = %key, handler = name, "registered handler");
        Ok(())
    }

    /// Removes the handler installed under `(owner, key, name)`.
    ///
    /// Returns whether anything was removed.
    pub async fn remove(&self, owner: &str, key: &EventKey, name: &str) -> bool {
        let mut handlers = self.handlers.write().await;
        let Some(list) = handlers.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !(h.owner == owner && h.name == name));
        let removed = before - list.len();
        if list.is_empty() {
            handlers.remove(key);
        }
        drop(handlers);

        if removed > 0 {
            self.stats.write().await.total_handlers -= removed;
            debug!(extension = owner, event = %key, handler = name, "removed handler");
        }
        removed > 0
    }

    /// Removes every handler installed by `owner`, across all keys.
    ///
    /// Returns the number of dispatch entries removed. Used on extension
    /// unload so no dispatch entry leaks past the extension's lifetime.
    pub async fn remove_owner(&self, owner: &str) -> usize {
        let mut handlers = self.handlers.write().await;
        let mut removed = 0;
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|h| h.owner != owner);
            removed += before - list.len();
            !list.is_empty()
        });
        drop(handlers);

        if removed > 0 {
            self.stats.write().await.total_handlers -= removed;
            info!(extension = owner, count = removed, "removed all handlers for extension");
        }
        removed
    }

    /// Current bus statistics.
    pub async fn stats(&self) -> EventBusStats {
        self.stats.read().await.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LifecycleKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>) -> HandlerFn {
        Arc::new(move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test]
    async fn publish_reaches_bound_handlers() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.install(
            "test",
            EventKey::Lifecycle(LifecycleKind::Starting),
            "on_starting",
            counting_handler(hits.clone()),
        )
        .await
        .unwrap();

        bus.publish(LifecycleEvent::Starting).await;
        bus.publish(LifecycleEvent::Started).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_install_is_rejected() {
        let bus = EventBus::new();
        let key = EventKey::Lifecycle(LifecycleKind::Linking);
        let hits = Arc::new(AtomicUsize::new(0));
        bus.install("test", key.clone(), "on_linking", counting_handler(hits.clone()))
            .await
            .unwrap();
        let err = bus
            .install("test", key, "on_linking", counting_handler(hits))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::ExtensionError::DuplicateSubscription { .. }
        ));
    }

    #[tokio::test]
    async fn same_name_different_owner_coexists() {
        let bus = EventBus::new();
        let key = EventKey::remote("chat");
        let hits = Arc::new(AtomicUsize::new(0));
        bus.install("one", key.clone(), "observer", counting_handler(hits.clone()))
            .await
            .unwrap();
        bus.install("two", key, "observer", counting_handler(hits.clone()))
            .await
            .unwrap();

        bus.publish_remote("chat", &serde_json::json!({"message": "hi"}))
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn remove_owner_clears_every_entry() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.install(
            "gone",
            EventKey::Lifecycle(LifecycleKind::Started),
            "on_started",
            counting_handler(hits.clone()),
        )
        .await
        .unwrap();
        bus.install("gone", EventKey::remote("chat"), "observer", counting_handler(hits.clone()))
            .await
            .unwrap();

        assert_eq!(bus.remove_owner("gone").await, 2);
        assert_eq!(bus.stats().await.total_handlers, 0);

        bus.publish(LifecycleEvent::Started).await;
        bus.publish_remote("chat", &serde_json::json!({})).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_the_rest() {
        let bus = EventBus::new();
        let key = EventKey::Lifecycle(LifecycleKind::Stopped);
        bus.install(
            "test",
            key.clone(),
            "broken",
            Arc::new(|_| Err(EventError::HandlerExecution("boom".into()))),
        )
        .await
        .unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.install("test", key, "healthy", counting_handler(hits.clone()))
            .await
            .unwrap();

        bus.publish(LifecycleEvent::Stopped).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
