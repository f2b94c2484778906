//! # Conduit Event System
//!
//! The publish/subscribe backbone of the Conduit proxy core. Extensions observe
//! the proxy's lifecycle (session start/stop, control transfer, client churn)
//! and an open-ended stream of pass-through remote events without ever holding
//! a reference to each other or to the server internals.
//!
//! ## Core Features
//!
//! - **Closed lifecycle union**: every fixed lifecycle event is one variant of
//!   [`LifecycleEvent`] with a typed payload, dispatched through a single
//!   [`EventBus::publish`] call.
//! - **Pass-through remote events**: events surfaced by the upstream session
//!   are re-emitted under the `remote:<name>` convention with a JSON payload.
//! - **Capability handles**: each extension registers through its own
//!   [`ExtensionBindings`] handle, which owns the extension's enabled flag and
//!   its subscription ledger. The bus itself owns nothing but the dispatch
//!   table.
//! - **Silent disable**: disabling an extension no-ops all of its handlers in
//!   place; re-enabling restores them with no re-registration cost.
//!
//! ## Quick Start Example
//!
//! ```rust,no_run
//! use conduit_event_system::{EventBus, ExtensionBindings, LifecycleEvent, LifecycleKind};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), conduit_event_system::ExtensionError> {
//! let bus = Arc::new(EventBus::new());
//! let bindings = Arc::new(ExtensionBindings::new("greeter", bus.clone()));
//!
//! bindings.bind(LifecycleKind::Linking, |event: &LifecycleEvent| {
//!     if let LifecycleEvent::Linking(client) = event {
//!         println!("client {client} is taking control");
//!     }
//!     Ok(())
//! }).await?;
//!
//! bus.publish(LifecycleEvent::Starting).await;
//! # Ok(())
//! # }
//! ```

mod bindings;
mod bus;
mod events;
mod types;

pub use bindings::{ExtensionBindings, Subscription};
pub use bus::{EventBus, EventBusStats, HandlerFn};
pub use events::{BusEvent, EventKey, LifecycleEvent, LifecycleKind};
pub use types::{current_timestamp, ClientId, DisconnectKind};

/// Errors raised while publishing events or executing handlers.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// A payload could not be converted to JSON for a pass-through event.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A handler reported a failure; dispatch of the remaining handlers
    /// continues regardless.
    #[error("handler execution error: {0}")]
    HandlerExecution(String),
}

/// Errors raised while managing an extension's subscriptions.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    /// The same extension registered the same handler identity for the same
    /// event twice. This is a programming error in the extension and is never
    /// recovered silently.
    #[error("extension {extension} already registered handler {handler} for {event}")]
    DuplicateSubscription {
        extension: String,
        event: String,
        handler: String,
    },
    /// Extension setup failed before it finished installing its bindings.
    #[error("extension initialization failed: {0}")]
    InitializationFailed(String),
}
