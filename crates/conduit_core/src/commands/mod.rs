//! Hierarchical command routing and tab completion.
mod completion;
mod registry;
mod tree;

pub use registry::{CommandRegistry, CommandScope, COMMAND_PACING};
pub use tree::{handler, CommandEntry, CommandFn, CommandNode, CommandTree, Visibility};
