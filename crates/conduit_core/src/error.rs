//! Error taxonomy for the proxy core.
//!
//! Caller contract violations (linking with no session, duplicate handler
//! registration) are typed errors the caller must propagate. Expected
//! negative outcomes (a rejected link, a failed command resolution) are
//! `Ok(false)` / `None`, never errors. Upstream faults never surface as
//! errors at all; the coordinator absorbs them into lifecycle events.

use conduit_event_system::ClientId;

/// Top-level error for orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("control error: {0}")]
    Control(#[from] ControlError),
    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),
    #[error("extension error: {0}")]
    Extension(#[from] conduit_event_system::ExtensionError),
    #[error("event error: {0}")]
    Event(#[from] conduit_event_system::EventError),
    #[error("upstream connection failed: {0}")]
    Connect(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Control-transfer contract violations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// `link`/`unlink` was invoked with no active remote session. This is a
    /// logic error in the calling extension, not a recoverable condition.
    #[error("no active remote session")]
    NoActiveSession,
    /// The referenced client is not in the live client registry.
    #[error("client {0} is not connected")]
    UnknownClient(ClientId),
}

/// Faults in the tab-completion protocol with the upstream.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// An upstream response carried zero suggestions and no request text was
    /// cached for the client, so the original query cannot be reconstructed.
    /// Aborts only the in-flight completion request, never the session.
    #[error("no completion request on record for client {0}")]
    MissingQueryEcho(ClientId),
}

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
