//! Command tree model: explicit leaf/group variants and pure flattening.

use crate::control::ControlView;
use crate::error::CoreError;
use conduit_event_system::ClientId;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// Future returned by a command callable.
pub type CommandFuture = BoxFuture<'static, Result<(), CoreError>>;

/// Type-erased command callable: `(invoking client, residual arguments)`.
pub type CommandFn = Arc<dyn Fn(ClientId, Vec<String>) -> CommandFuture + Send + Sync>;

/// Wraps an async closure into a [`CommandFn`].
///
/// ```rust,ignore
/// let node = CommandNode::new(handler(|client, args| async move {
///     // ...
///     Ok(())
/// }));
/// ```
pub fn handler<F, Fut>(f: F) -> CommandFn
where
    F: Fn(ClientId, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
{
    Arc::new(move |client, args| Box::pin(f(client, args)))
}

/// Predicate used by [`Visibility::Custom`].
pub type VisibilityPredicate = Arc<dyn Fn(ClientId) -> bool + Send + Sync>;

/// Who may see (and therefore run) a command.
#[derive(Clone, Default)]
pub enum Visibility {
    /// Visible to every client.
    #[default]
    Always,
    /// Visible only to the client currently controlling the session.
    OnlyControlling,
    /// Visible to every client except the current controller.
    OnlyNotControlling,
    /// Arbitrary per-client predicate.
    Custom(VisibilityPredicate),
}

impl Visibility {
    /// Evaluates the policy for `client` under the given control snapshot.
    pub fn permits(&self, view: &ControlView, client: ClientId) -> bool {
        match self {
            Visibility::Always => true,
            Visibility::OnlyControlling => view.is_controlling(client),
            Visibility::OnlyNotControlling => !view.is_controlling(client),
            Visibility::Custom(predicate) => predicate(client),
        }
    }
}

impl std::fmt::Debug for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Always => write!(f, "Always"),
            Visibility::OnlyControlling => write!(f, "OnlyControlling"),
            Visibility::OnlyNotControlling => write!(f, "OnlyNotControlling"),
            Visibility::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// One invocable command leaf.
#[derive(Clone)]
pub struct CommandNode {
    pub usage: Option<String>,
    pub description: Option<String>,
    pub visibility: Visibility,
    pub callable: CommandFn,
}

impl CommandNode {
    pub fn new(callable: CommandFn) -> Self {
        Self {
            usage: None,
            description: None,
            visibility: Visibility::Always,
            callable,
        }
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

impl std::fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandNode")
            .field("usage", &self.usage)
            .field("description", &self.description)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

/// A node of the command namespace: a leaf or a nested group.
#[derive(Debug, Clone)]
pub enum CommandEntry {
    Leaf(CommandNode),
    Group(HashMap<String, CommandEntry>),
}

/// Tree of command entries keyed by name segment, unbounded depth.
///
/// Flattening joins ancestor segments with single spaces, so the group
/// `nav` holding leaf `goto` yields the flat key `"nav goto"`.
#[derive(Debug, Clone, Default)]
pub struct CommandTree {
    entries: HashMap<String, CommandEntry>,
}

impl CommandTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style leaf insertion.
    pub fn command(mut self, segment: impl Into<String>, node: CommandNode) -> Self {
        self.insert(segment, CommandEntry::Leaf(node));
        self
    }

    /// Builder-style group insertion.
    pub fn group(mut self, segment: impl Into<String>, tree: CommandTree) -> Self {
        self.insert(segment, CommandEntry::Group(tree.entries));
        self
    }

    pub fn insert(&mut self, segment: impl Into<String>, entry: CommandEntry) {
        let segment = segment.into();
        if self.entries.insert(segment.clone(), entry).is_some() {
            // Last write wins; documented, not fatal.
            warn!(segment = %segment, "command segment overwritten");
        }
    }

    /// Merges another tree's top-level entries into this one, last write
    /// winning on collision.
    pub fn merge(&mut self, other: CommandTree) {
        for (segment, entry) in other.entries {
            self.insert(segment, entry);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flattens the whole tree into space-joined keys, no filtering.
    pub fn flatten(&self) -> HashMap<String, CommandNode> {
        let mut flat = HashMap::new();
        flatten_into(&self.entries, "", &mut flat, &mut |_| true);
        flat
    }

    /// Flattens the tree, dropping leaves whose visibility rejects `client`.
    /// With `bypass_visibility` every leaf is kept, so clients can read the
    /// usage of commands they are not currently permitted to run.
    pub fn flatten_visible(
        &self,
        view: &ControlView,
        client: ClientId,
        bypass_visibility: bool,
    ) -> HashMap<String, CommandNode> {
        let mut flat = HashMap::new();
        flatten_into(&self.entries, "", &mut flat, &mut |node| {
            bypass_visibility || node.visibility.permits(view, client)
        });
        flat
    }
}

fn flatten_into(
    entries: &HashMap<String, CommandEntry>,
    prefix: &str,
    flat: &mut HashMap<String, CommandNode>,
    keep: &mut dyn FnMut(&CommandNode) -> bool,
) {
    for (segment, entry) in entries {
        let key = if prefix.is_empty() {
            segment.clone()
        } else {
            format!("{prefix} {segment}")
        };
        match entry {
            CommandEntry::Group(children) => flatten_into(children, &key, flat, keep),
            CommandEntry::Leaf(node) => {
                if keep(node) {
                    flat.insert(key, node.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> CommandNode {
        CommandNode::new(handler(|_, _| async { Ok(()) }))
    }

    fn sample_tree() -> CommandTree {
        CommandTree::new()
            .command("pstop", noop().with_description("stops the proxy"))
            .group(
                "nav",
                CommandTree::new()
                    .command("goto", noop().with_visibility(Visibility::OnlyControlling))
                    .command("halt", noop()),
            )
    }

    #[test]
    fn flatten_joins_segments_with_spaces() {
        let flat = sample_tree().flatten();
        let mut keys: Vec<_> = flat.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["nav goto", "nav halt", "pstop"]);
    }

    #[test]
    fn visibility_filters_unless_bypassed() {
        let client = ClientId::new();
        let view = ControlView {
            session_active: true,
            controlling: None,
        };
        let tree = sample_tree();

        let visible = tree.flatten_visible(&view, client, false);
        assert!(!visible.contains_key("nav goto"));
        assert!(visible.contains_key("nav halt"));

        let bypassed = tree.flatten_visible(&view, client, true);
        assert!(bypassed.contains_key("nav goto"));

        let controlling = ControlView {
            session_active: true,
            controlling: Some(client),
        };
        let visible = tree.flatten_visible(&controlling, client, false);
        assert!(visible.contains_key("nav goto"));
    }

    #[test]
    fn custom_predicate_is_evaluated_directly() {
        let allowed = ClientId::new();
        let denied = ClientId::new();
        let node = noop().with_visibility(Visibility::Custom(Arc::new(move |client| {
            client == allowed
        })));
        let tree = CommandTree::new().command("secret", node);
        let view = ControlView::default();
        assert!(tree.flatten_visible(&view, allowed, false).contains_key("secret"));
        assert!(!tree.flatten_visible(&view, denied, false).contains_key("secret"));
    }

    #[test]
    fn duplicate_segment_overwrites_silently() {
        let tree = CommandTree::new()
            .command("pstop", noop().with_description("first"))
            .command("pstop", noop().with_description("second"));
        let flat = tree.flatten();
        assert_eq!(flat["pstop"].description.as_deref(), Some("second"));
    }
}
