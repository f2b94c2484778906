//! Configuration for the proxy core.
//!
//! Loaded from TOML files or built programmatically. Proxy behavior options
//! are typed here; upstream session options are passed through opaquely to
//! whatever [`SessionConnector`](crate::session::SessionConnector) the
//! embedder supplies.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

fn default_command_prefix() -> String {
    "/".to_string()
}

fn default_port() -> u16 {
    25565
}

/// Top-level configuration: proxy behavior plus upstream session options.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConduitConfig {
    /// Proxy behavior settings.
    #[serde(default)]
    pub proxy: ProxyOptions,
    /// Upstream session settings, passed to the connector.
    #[serde(default)]
    pub session: SessionOptions,
}

impl ConduitConfig {
    /// Parses a configuration from TOML text.
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads a configuration from a TOML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::load_from_str(&text)
    }
}

/// Behavior settings for the proxy itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyOptions {
    /// Prefix prepended to chat messages the proxy sends to clients.
    #[serde(default)]
    pub chat_prefix: Option<String>,
    /// Disconnect all connected clients when the proxy session stops.
    /// When off, clients stay connected but receive no further updates.
    #[serde(default = "default_true")]
    pub disconnect_all_on_stop: bool,
    /// Disable the command handler entirely; chat passes through untouched.
    #[serde(default)]
    pub disable_commands: bool,
    /// Character sequence that marks a chat line as a proxy command.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            chat_prefix: None,
            disconnect_all_on_stop: true,
            disable_commands: false,
            command_prefix: default_command_prefix(),
        }
    }
}

/// Upstream session settings.
///
/// Only the addressing fields are interpreted by the core; everything else
/// rides along in `extra` for the connector to consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Upstream host to connect to.
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Account name presented to the upstream service.
    #[serde(default)]
    pub username: String,
    /// Connector-specific options the core does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            extra: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config = ConduitConfig::load_from_str("").unwrap();
        assert!(config.proxy.disconnect_all_on_stop);
        assert!(!config.proxy.disable_commands);
        assert_eq!(config.proxy.command_prefix, "/");
        assert_eq!(config.session.port, 25565);
    }

    #[test]
    fn unknown_session_keys_land_in_extra() {
        let config = ConduitConfig::load_from_str(
            r#"
            [proxy]
            chat_prefix = "[conduit] "
            disconnect_all_on_stop = false

            [session]
            host = "play.example.net"
            username = "relay_account"
            view_distance = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.proxy.chat_prefix.as_deref(), Some("[conduit] "));
        assert!(!config.proxy.disconnect_all_on_stop);
        assert_eq!(config.session.host, "play.example.net");
        assert_eq!(
            config.session.extra.get("view_distance"),
            Some(&serde_json::json!(8))
        );
    }
}
