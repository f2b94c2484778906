//! Core identifier types shared across the Conduit workspace.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one downstream client connection.
///
/// This is a wrapper around UUID that provides type safety and ensures client
/// ids cannot be confused with other identifiers in the system. The core never
/// owns the connection behind an id; it only bookkeeps against it.
///
/// # Examples
///
/// ```rust
/// use conduit_event_system::ClientId;
///
/// let id = ClientId::new();
/// println!("client: {id}");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Creates a new random client id using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::str::FromStr for ClientId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why the upstream session went away.
///
/// Carried by [`LifecycleEvent::RemoteDisconnected`](crate::LifecycleEvent)
/// so extensions and any external reconnect policy can distinguish a kick
/// from an ordinary connection end or a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectKind {
    /// The upstream service actively kicked the session.
    Kicked,
    /// The connection ended without an explicit kick.
    End,
    /// A transport-level error tore the connection down.
    Error,
}

impl std::fmt::Display for DisconnectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            DisconnectKind::Kicked => "kicked",
            DisconnectKind::End => "end",
            DisconnectKind::Error => "error",
        };
        write!(f, "{tag}")
    }
}

/// Current unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_round_trips_through_display() {
        let id = ClientId::new();
        let parsed: ClientId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn disconnect_kind_serializes_lowercase() {
        let json = serde_json::to_string(&DisconnectKind::Kicked).unwrap();
        assert_eq!(json, "\"kicked\"");
        assert_eq!(DisconnectKind::End.to_string(), "end");
    }
}
