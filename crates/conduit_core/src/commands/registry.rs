//! The command registry: two parallel trees, resolution, and batched
//! execution.

use super::tree::{CommandNode, CommandTree};
use crate::control::ControlView;
use conduit_event_system::ClientId;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Delay inserted between successive commands of a batched chat line.
/// Deliberate throttling so bursts of proxied commands do not trip upstream
/// rate-limiting or anti-automation heuristics.
pub const COMMAND_PACING: Duration = Duration::from_millis(300);

/// Which tree a registration lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandScope {
    /// Active while a remote session exists.
    Connected,
    /// Active while no remote session exists.
    Disconnected,
    /// Registered into both trees.
    Universal,
}

/// Hierarchical command namespace with per-client visibility and batched
/// execution.
///
/// Trees mutate only at extension-load time and are read thereafter; the
/// completion cache is a last-write-wins map keyed by client id.
pub struct CommandRegistry {
    prefix: String,
    connected: RwLock<CommandTree>,
    disconnected: RwLock<CommandTree>,
    pub(super) completion_cache: DashMap<ClientId, String>,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl CommandRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            connected: RwLock::new(CommandTree::new()),
            disconnected: RwLock::new(CommandTree::new()),
            completion_cache: DashMap::new(),
        }
    }

    /// The command prefix character sequence (usually `/`).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Merges a tree into the tree(s) named by `scope`.
    pub async fn register(&self, scope: CommandScope, tree: CommandTree) {
        match scope {
            CommandScope::Connected => self.connected.write().await.merge(tree),
            CommandScope::Disconnected => self.disconnected.write().await.merge(tree),
            CommandScope::Universal => {
                self.connected.write().await.merge(tree.clone());
                self.disconnected.write().await.merge(tree);
            }
        }
    }

    /// Registers a single top-level command.
    pub async fn register_command(
        &self,
        scope: CommandScope,
        segment: impl Into<String>,
        node: CommandNode,
    ) {
        let segment = segment.into();
        self.register(scope, CommandTree::new().command(segment, node))
            .await;
    }

    /// Flattened view of the currently applicable tree for `client`.
    ///
    /// `bypass_visibility` keeps every leaf, for usage lookups.
    pub async fn active_commands(
        &self,
        view: &ControlView,
        client: ClientId,
        bypass_visibility: bool,
    ) -> HashMap<String, CommandNode> {
        let tree = if view.session_active {
            self.connected.read().await
        } else {
            self.disconnected.read().await
        };
        tree.flatten_visible(view, client, bypass_visibility)
    }

    /// Resolves raw input against a flattened command map.
    ///
    /// Tokens are consumed while *any* flat key starts with the space-joined
    /// consumed prefix (a prefix test against the whole key, because a leaf
    /// name may itself be a multi-token group path), then the resolver backs
    /// off one token and looks up the exact leaf at the joined prefix.
    /// Returns the leaf plus the residual tokens as arguments, or `None`
    /// when nothing was consumable or no leaf sits at the consumed prefix.
    pub fn resolve(
        flat: &HashMap<String, CommandNode>,
        input: &str,
    ) -> Option<(CommandNode, Vec<String>)> {
        let tokens: Vec<&str> = input.split(' ').collect();
        let mut consumed = 0;
        for end in 1..=tokens.len() {
            let joined = tokens[..end].join(" ");
            if flat.keys().any(|key| key.starts_with(&joined)) {
                consumed = end;
            } else {
                break;
            }
        }
        if consumed == 0 {
            return None;
        }
        let key = tokens[..consumed].join(" ");
        let node = flat.get(&key)?.clone();
        let args = tokens[consumed..].iter().map(|t| t.to_string()).collect();
        Some((node, args))
    }

    /// Handles one chat message already split into command lines.
    ///
    /// Returns whether the caller should forward the raw chat upstream:
    ///
    /// - single non-prefixed line: a no-op that reports whether `client`
    ///   currently controls the session;
    /// - single prefixed line: `false` after executing a resolved command,
    ///   `true` when resolution fails (the upstream may know the command);
    /// - multiple lines: each line resolves and executes in order with
    ///   [`COMMAND_PACING`] between executions; the first line that fails to
    ///   resolve stops processing and the control bool decides fallback.
    pub async fn handle_chat(
        &self,
        view: &ControlView,
        client: ClientId,
        lines: &[&str],
    ) -> bool {
        let in_control = view.is_controlling(client);
        let active = self.active_commands(view, client, false).await;

        if let [line] = lines {
            let Some(stripped) = line.strip_prefix(&self.prefix) else {
                return in_control;
            };
            return match Self::resolve(&active, stripped) {
                Some((node, args)) => {
                    self.execute(&node, client, args).await;
                    false
                }
                None => {
                    debug!(client = %client, input = %line, "unknown command");
                    true
                }
            };
        }

        for line in lines {
            let Some(stripped) = line.strip_prefix(&self.prefix) else {
                return in_control;
            };
            let Some((node, args)) = Self::resolve(&active, stripped) else {
                debug!(client = %client, input = %line, "unknown command in batch");
                return in_control;
            };
            self.execute(&node, client, args).await;
            tokio::time::sleep(COMMAND_PACING).await;
        }
        false
    }

    /// Manually invokes a command by exact name, prefix optional.
    ///
    /// Returns whether a command executed.
    pub async fn run_command(
        &self,
        view: &ControlView,
        client: ClientId,
        command: &str,
        args: Vec<String>,
    ) -> bool {
        let name = command.strip_prefix(&self.prefix).unwrap_or(command);
        let active = self.active_commands(view, client, false).await;
        match active.get(name) {
            Some(node) => {
                let node = node.clone();
                self.execute(&node, client, args).await;
                true
            }
            None => false,
        }
    }

    /// Whether `text` names a registered command in either tree, prefix
    /// optional and visibility ignored.
    pub async fn is_command(&self, text: &str) -> bool {
        let name = text.strip_prefix(&self.prefix).unwrap_or(text);
        self.connected.read().await.flatten().contains_key(name)
            || self.disconnected.read().await.flatten().contains_key(name)
    }

    async fn execute(&self, node: &CommandNode, client: ClientId, args: Vec<String>) {
        if let Err(e) = (node.callable)(client, args).await {
            error!(client = %client, "command failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tree::handler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn noop() -> CommandNode {
        CommandNode::new(handler(|_, _| async { Ok(()) }))
    }

    fn recording(log: Arc<Mutex<Vec<String>>>, tag: &str) -> CommandNode {
        let tag = tag.to_string();
        CommandNode::new(handler(move |_, args| {
            let log = log.clone();
            let tag = tag.clone();
            async move {
                log.lock().unwrap().push(format!("{tag}:{}", args.join(",")));
                Ok(())
            }
        }))
    }

    #[test]
    fn exact_flattened_key_resolves_with_no_arguments() {
        let tree = CommandTree::new()
            .command("pstop", noop())
            .group("nav", CommandTree::new().command("goto", noop()));
        let flat = tree.flatten();

        for key in flat.keys() {
            let (_, args) = CommandRegistry::resolve(&flat, key).expect("key should resolve");
            assert!(args.is_empty(), "residual args for {key}: {args:?}");
        }
    }

    #[test]
    fn residual_tokens_become_arguments() {
        let tree = CommandTree::new().group(
            "nav",
            CommandTree::new().command("goto", noop()),
        );
        let flat = tree.flatten();
        let (_, args) = CommandRegistry::resolve(&flat, "nav goto 10 64 10").unwrap();
        assert_eq!(args, vec!["10", "64", "10"]);
    }

    #[test]
    fn unresolvable_input_fails_without_error() {
        let flat = CommandTree::new().command("pstop", noop()).flatten();
        assert!(CommandRegistry::resolve(&flat, "nothere 1 2").is_none());
        // A consumable prefix with no leaf at it also fails: "pst" extends
        // (it prefixes "pstop") but no leaf is stored under "pst".
        assert!(CommandRegistry::resolve(&flat, "pst").is_none());
    }

    #[tokio::test]
    async fn non_prefixed_chat_reports_control_state() {
        let registry = CommandRegistry::new("/");
        let client = ClientId::new();
        let spectator = ControlView {
            session_active: true,
            controlling: None,
        };
        assert!(!registry.handle_chat(&spectator, client, &["hello"]).await);

        let controller = ControlView {
            session_active: true,
            controlling: Some(client),
        };
        assert!(registry.handle_chat(&controller, client, &["hello"]).await);
    }

    #[tokio::test]
    async fn unknown_single_command_is_forwarded_upstream() {
        let registry = CommandRegistry::new("/");
        let client = ClientId::new();
        let view = ControlView {
            session_active: true,
            controlling: None,
        };
        assert!(registry.handle_chat(&view, client, &["/whois gen"]).await);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_lines_run_in_order_with_pacing() {
        let registry = CommandRegistry::new("/");
        let log = Arc::new(Mutex::new(Vec::new()));
        registry
            .register(
                CommandScope::Disconnected,
                CommandTree::new()
                    .command("pstop", recording(log.clone(), "pstop"))
                    .command("pstart", recording(log.clone(), "pstart")),
            )
            .await;

        let client = ClientId::new();
        let view = ControlView::default();
        let started = tokio::time::Instant::now();
        let forward = registry
            .handle_chat(&view, client, &["/pstop", "/pstart"])
            .await;

        assert!(!forward);
        assert_eq!(*log.lock().unwrap(), vec!["pstop:", "pstart:"]);
        assert!(started.elapsed() >= COMMAND_PACING);
    }

    #[tokio::test]
    async fn batch_stops_at_first_unresolvable_line() {
        let registry = CommandRegistry::new("/");
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        registry
            .register_command(
                CommandScope::Disconnected,
                "pstart",
                CommandNode::new(handler(move |_, _| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })),
            )
            .await;

        let client = ClientId::new();
        let view = ControlView::default();
        let forward = registry
            .handle_chat(&view, client, &["/bogus", "/pstart"])
            .await;
        assert!(!forward, "non-controlling client should not forward");
        assert_eq!(hits.load(Ordering::SeqCst), 0, "later lines must not run");
    }

    #[tokio::test]
    async fn run_command_normalizes_the_prefix() {
        let registry = CommandRegistry::new("/");
        let log = Arc::new(Mutex::new(Vec::new()));
        registry
            .register_command(CommandScope::Disconnected, "pstart", recording(log.clone(), "pstart"))
            .await;

        let client = ClientId::new();
        let view = ControlView::default();
        assert!(registry.run_command(&view, client, "/pstart", vec![]).await);
        assert!(registry.run_command(&view, client, "pstart", vec!["now".into()]).await);
        assert_eq!(*log.lock().unwrap(), vec!["pstart:", "pstart:now"]);
    }

    #[tokio::test]
    async fn is_command_checks_both_trees() {
        let registry = CommandRegistry::new("/");
        registry
            .register_command(CommandScope::Connected, "pstop", noop())
            .await;
        registry
            .register_command(CommandScope::Disconnected, "pstart", noop())
            .await;
        assert!(registry.is_command("/pstop").await);
        assert!(registry.is_command("pstart").await);
        assert!(!registry.is_command("/nothere").await);
    }

    #[tokio::test]
    async fn universal_scope_registers_into_both_trees() {
        let registry = CommandRegistry::new("/");
        registry
            .register_command(CommandScope::Universal, "phelp", noop())
            .await;
        let client = ClientId::new();
        let offline = ControlView::default();
        let online = ControlView {
            session_active: true,
            controlling: None,
        };
        assert!(registry
            .active_commands(&offline, client, false)
            .await
            .contains_key("phelp"));
        assert!(registry
            .active_commands(&online, client, false)
            .await
            .contains_key("phelp"));
    }
}
