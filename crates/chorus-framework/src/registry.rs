//! The command forest and its resolution.
//!
//! Commands are declared once at startup through a [`RegistryBuilder`]. Each
//! declaration names an optional parent, so the registry is a forest whose
//! sibling order is declaration order. The built [`CommandRegistry`] is
//! read-only.
//!
//! # Resolution
//!
//! Resolution starts at the top-level nodes. The first node whose trigger
//! matches is entered, its residual becomes the text the children are tried
//! against, and the walk repeats. When no child matches, the node reached so
//! far is the target and the handler receives the residual left after it.
//!
//! ```rust,ignore
//! let mut builder = CommandRegistry::builder();
//! let summary = builder.command("summary", Trigger::new(["summary", "sum"]), summary)?;
//! builder.subcommand(summary, "base", Trigger::new(["base", "b"]), summary_base)?;
//! builder.subcommand(summary, "genre", Trigger::new(["genre"]), summary_genre)?;
//! let registry = builder.build();
//!
//! // "summary   BASE  10-11" resolves to "base" with residual "10-11".
//! ```

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::error::RegistryError;
use crate::handler::{BoxedHandler, Handler, into_handler};
use crate::trigger::Trigger;
use chorus_core::Message;

/// Identifies one command node within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(usize);

impl CommandId {
    /// Returns the declaration index of this node.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a declaration refers to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    /// By the id returned when the parent was declared.
    Id(CommandId),
    /// By the parent's name.
    Name(String),
}

/// One declared command.
pub struct CommandNode {
    id: CommandId,
    name: String,
    doc: Option<String>,
    trigger: Trigger,
    parent: Option<CommandId>,
    children: Vec<CommandId>,
    handler: BoxedHandler,
}

impl CommandNode {
    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn parent(&self) -> Option<CommandId> {
        self.parent
    }

    /// Returns the children in declaration order.
    pub fn children(&self) -> &[CommandId] {
        &self.children
    }

    /// Returns the bound handler.
    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }

    fn label(&self) -> String {
        if self.trigger.is_custom() || self.trigger.patterns().is_empty() {
            format!("<{}>", self.name)
        } else {
            self.trigger.patterns().join(" | ")
        }
    }
}

impl fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

/// A command declaration.
pub struct CommandSpec {
    name: String,
    trigger: Trigger,
    parent: Option<ParentRef>,
    doc: Option<String>,
    handler: BoxedHandler,
}

impl CommandSpec {
    /// Declares a top-level command.
    pub fn new<H>(name: impl Into<String>, trigger: Trigger, handler: H) -> Self
    where
        H: Handler + Clone + Sync,
    {
        Self {
            name: name.into(),
            trigger,
            parent: None,
            doc: None,
            handler: into_handler(handler),
        }
    }

    /// Sets the one-line description shown by [`CommandRegistry::help_lines`].
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Places this command under the node with the given id.
    pub fn parent(mut self, parent: CommandId) -> Self {
        self.parent = Some(ParentRef::Id(parent));
        self
    }

    /// Places this command under the node with the given name.
    pub fn parent_named(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(ParentRef::Name(parent.into()));
        self
    }
}

/// Collects declarations and builds a [`CommandRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    nodes: Vec<CommandNode>,
    roots: Vec<CommandId>,
    by_name: HashMap<String, CommandId>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one declaration and returns the id of the new node.
    ///
    /// Siblings keep the order in which they are registered.
    pub fn register(&mut self, spec: CommandSpec) -> Result<CommandId, RegistryError> {
        if spec.name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.by_name.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateName(spec.name));
        }

        let parent = match spec.parent {
            None => None,
            Some(ParentRef::Id(id)) if id.0 < self.nodes.len() => Some(id),
            Some(ParentRef::Id(id)) => return Err(RegistryError::UnknownParent(id)),
            Some(ParentRef::Name(name)) => match self.by_name.get(&name) {
                Some(id) => Some(*id),
                None => return Err(RegistryError::UnknownParentName(name)),
            },
        };

        let id = CommandId(self.nodes.len());
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => self.roots.push(id),
        }
        self.by_name.insert(spec.name.clone(), id);
        self.nodes.push(CommandNode {
            id,
            name: spec.name,
            doc: spec.doc,
            trigger: spec.trigger,
            parent,
            children: Vec::new(),
            handler: spec.handler,
        });
        Ok(id)
    }

    /// Registers a top-level command.
    pub fn command<H>(
        &mut self,
        name: impl Into<String>,
        trigger: Trigger,
        handler: H,
    ) -> Result<CommandId, RegistryError>
    where
        H: Handler + Clone + Sync,
    {
        self.register(CommandSpec::new(name, trigger, handler))
    }

    /// Registers a command under `parent`.
    pub fn subcommand<H>(
        &mut self,
        parent: CommandId,
        name: impl Into<String>,
        trigger: Trigger,
        handler: H,
    ) -> Result<CommandId, RegistryError>
    where
        H: Handler + Clone + Sync,
    {
        self.register(CommandSpec::new(name, trigger, handler).parent(parent))
    }

    /// Freezes the forest.
    pub fn build(self) -> CommandRegistry {
        CommandRegistry {
            nodes: self.nodes,
            roots: self.roots,
            by_name: self.by_name,
        }
    }
}

/// The result of resolving a message.
#[derive(Debug)]
pub struct Resolution<'r> {
    /// The most specific node that matched.
    pub node: &'r CommandNode,
    /// The text left over after that node's trigger.
    pub residual: String,
}

/// A read-only forest of command nodes.
pub struct CommandRegistry {
    nodes: Vec<CommandNode>,
    roots: Vec<CommandId>,
    by_name: HashMap<String, CommandId>,
}

impl CommandRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Resolves `message` to the most specific matching node.
    ///
    /// Returns `None` when no top-level node matches.
    pub fn resolve(&self, message: &Message) -> Option<Resolution<'_>> {
        let (mut node, mut residual) = self.first_match(&self.roots, message.command(), message)?;

        while let Some((child, rest)) = self.first_match(&node.children, residual, message) {
            node = child;
            residual = rest;
        }

        trace!(command = node.name(), residual, "Resolved command");
        Some(Resolution {
            node,
            residual: residual.to_string(),
        })
    }

    fn first_match<'t>(
        &self,
        candidates: &[CommandId],
        text: &'t str,
        message: &Message,
    ) -> Option<(&CommandNode, &'t str)> {
        candidates.iter().find_map(|id| {
            let node = &self.nodes[id.0];
            node.trigger
                .try_match(text, message)
                .map(|residual| (node, residual))
        })
    }

    pub fn get(&self, id: CommandId) -> Option<&CommandNode> {
        self.nodes.get(id.0)
    }

    /// Looks a node up by name.
    pub fn find(&self, name: &str) -> Option<&CommandNode> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the top-level nodes in declaration order.
    pub fn roots(&self) -> impl Iterator<Item = &CommandNode> {
        self.roots.iter().map(|id| &self.nodes[id.0])
    }

    /// Returns the children of `id` in declaration order.
    pub fn children(&self, id: CommandId) -> impl Iterator<Item = &CommandNode> {
        self.get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|child| &self.nodes[child.0])
    }

    /// Renders the forest as indented lines for a help reply.
    ///
    /// Each line shows a node's patterns (or `<name>` for nodes without
    /// literal patterns) followed by its doc string.
    pub fn help_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut stack: Vec<(CommandId, usize)> =
            self.roots.iter().rev().map(|id| (*id, 0)).collect();

        while let Some((id, depth)) = stack.pop() {
            let node = &self.nodes[id.0];
            let indent = "  ".repeat(depth);
            lines.push(match node.doc() {
                Some(doc) => format!("{indent}{} - {doc}", node.label()),
                None => format!("{indent}{}", node.label()),
            });
            stack.extend(node.children.iter().rev().map(|child| (*child, depth + 1)));
        }
        lines
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("nodes", &self.nodes.len())
            .field("roots", &self.roots)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CommandContext;
    use chorus_core::MessageType;

    async fn noop(_ctx: CommandContext) {}

    fn summary_registry() -> CommandRegistry {
        let mut builder = CommandRegistry::builder();
        let summary = builder
            .register(
                CommandSpec::new("summary", Trigger::new(["summary", "sum"]), noop)
                    .doc("play summary"),
            )
            .unwrap();
        builder
            .register(
                CommandSpec::new("base", Trigger::new(["base", "b"]), noop)
                    .parent(summary)
                    .doc("by base level"),
            )
            .unwrap();
        builder
            .register(CommandSpec::new("genre", Trigger::new(["genre"]), noop).parent_named("summary"))
            .unwrap();
        builder
            .command("bind", Trigger::new(["bind"]).types(MessageType::GROUP), noop)
            .unwrap();
        builder.build()
    }

    fn resolved(registry: &CommandRegistry, msg: &Message) -> Option<(String, String)> {
        registry
            .resolve(msg)
            .map(|r| (r.node.name().to_string(), r.residual))
    }

    #[test]
    fn test_child_with_residual() {
        let registry = summary_registry();
        let msg = Message::new(MessageType::GROUP, "summary   BASE  10-11");
        assert_eq!(
            resolved(&registry, &msg),
            Some(("base".to_string(), "10-11".to_string()))
        );
    }

    #[test]
    fn test_end_to_end_padding() {
        let registry = summary_registry();
        let msg = Message::new(MessageType::GROUP, "  SUMMARY base 10-11  ");
        assert_eq!(
            resolved(&registry, &msg),
            Some(("base".to_string(), "10-11".to_string()))
        );
    }

    #[test]
    fn test_parent_is_target_when_no_child_matches() {
        let registry = summary_registry();
        let msg = Message::new(MessageType::FRIEND, "sum level 13");
        assert_eq!(
            resolved(&registry, &msg),
            Some(("summary".to_string(), "level 13".to_string()))
        );
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let registry = summary_registry();
        let msg = Message::new(MessageType::GROUP, "summary genre pop");
        let first = resolved(&registry, &msg);
        let second = resolved(&registry, &msg);
        assert_eq!(first, second);
        assert_eq!(first, Some(("genre".to_string(), "pop".to_string())));
    }

    #[test]
    fn test_group_only_mask() {
        let registry = summary_registry();
        let friend = Message::new(MessageType::FRIEND, "bind");
        let unset = Message::new(MessageType::UNSET, "bind");
        assert_eq!(resolved(&registry, &friend), None);
        assert_eq!(
            resolved(&registry, &unset),
            Some(("bind".to_string(), String::new()))
        );
    }

    #[test]
    fn test_unrecognized() {
        let registry = summary_registry();
        let msg = Message::new(MessageType::GROUP, "dance");
        assert!(registry.resolve(&msg).is_none());
    }

    #[test]
    fn test_earlier_sibling_wins() {
        let mut builder = CommandRegistry::builder();
        builder.command("catch_all", Trigger::any(), noop).unwrap();
        builder.command("summary", Trigger::new(["summary"]), noop).unwrap();
        let registry = builder.build();

        let msg = Message::new(MessageType::GROUP, "summary");
        assert_eq!(
            resolved(&registry, &msg),
            Some(("catch_all".to_string(), "summary".to_string()))
        );
    }

    #[test]
    fn test_registration_errors() {
        let mut builder = CommandRegistry::builder();
        builder.command("a", Trigger::new(["a"]), noop).unwrap();

        assert_eq!(
            builder.command("a", Trigger::new(["b"]), noop),
            Err(RegistryError::DuplicateName("a".to_string()))
        );
        assert_eq!(
            builder.register(CommandSpec::new("x", Trigger::any(), noop).parent_named("nope")),
            Err(RegistryError::UnknownParentName("nope".to_string()))
        );
        assert_eq!(
            builder.subcommand(CommandId(42), "y", Trigger::any(), noop),
            Err(RegistryError::UnknownParent(CommandId(42)))
        );
        assert_eq!(
            builder.command("  ", Trigger::any(), noop),
            Err(RegistryError::EmptyName)
        );
    }

    #[test]
    fn test_lookup_and_help() {
        let registry = summary_registry();
        assert_eq!(registry.len(), 4);

        let summary = registry.find("summary").unwrap();
        let children: Vec<_> = registry.children(summary.id()).map(|n| n.name()).collect();
        assert_eq!(children, vec!["base", "genre"]);
        assert_eq!(registry.get(summary.children()[0]).unwrap().parent(), Some(summary.id()));

        assert_eq!(
            registry.help_lines(),
            vec![
                "summary | sum - play summary".to_string(),
                "  base | b - by base level".to_string(),
                "  genre".to_string(),
                "bind".to_string(),
            ]
        );
    }
}
