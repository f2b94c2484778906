//! # Conduit Core
//!
//! The stateful heart of the Conduit proxy: one upstream game-protocol
//! session, many downstream clients, and at most one client driving the
//! session at a time.
//!
//! ## Architecture Overview
//!
//! Three leaf components, composed by the [`ConduitServer`] orchestrator:
//!
//! - [`commands::CommandRegistry`]: hierarchical command namespace,
//!   resolution, visibility filtering, and tab completion.
//! - [`control::ControlCoordinator`]: the control-transfer state machine
//!   guaranteeing at most one controlling client.
//! - the event bus from `conduit_event_system`: typed lifecycle
//!   publish/subscribe for extensions.
//!
//! The leaves never call each other; every interaction flows through the
//! orchestrator. The actual game world, wire codec, and movement logic live
//! behind the opaque [`session::RemoteSession`] and [`client::ClientHandle`]
//! contracts.

pub mod client;
pub mod commands;
pub mod config;
pub mod control;
pub mod error;
pub mod extension;
pub mod orchestrator;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{ClientHandle, ClientRegistry};
pub use commands::{
    handler, CommandEntry, CommandFn, CommandNode, CommandRegistry, CommandScope, CommandTree,
    Visibility,
};
pub use config::{ConduitConfig, ProxyOptions, SessionOptions};
pub use control::{ControlCoordinator, ControlState, ControlView};
pub use error::{CompletionError, ConfigError, ControlError, CoreError};
pub use extension::{Extension, ExtensionManager};
pub use orchestrator::ConduitServer;
pub use session::{RemoteSession, SessionConnector, SessionSignal};

// Re-exported so extensions depend on a single crate.
pub use conduit_event_system::{
    BusEvent, ClientId, DisconnectKind, EventBus, EventError, EventKey, ExtensionBindings,
    ExtensionError, LifecycleEvent, LifecycleKind,
};
