//! # Chorus Framework
//!
//! Command routing and multi-turn conversations.
//!
//! This layer provides:
//! - [`Trigger`] matching with type masks, case folding and residual text
//! - A command forest ([`CommandRegistry`]) built once at startup
//! - Async handlers and single-use dialog continuations ([`Handler`])
//! - The per-conversation dialog table ([`DialogManager`])
//! - The [`Dispatcher`] tying them together, usable as a tower service
//! - [`KeyedLocks`] for handlers sharing external resources
//!
//! ```rust,ignore
//! use chorus_framework::prelude::*;
//!
//! let mut builder = CommandRegistry::builder();
//! let summary = builder.command("summary", Trigger::new(["summary", "sum"]), summary)?;
//! builder.subcommand(summary, "base", Trigger::new(["base", "b"]), summary_base)?;
//!
//! let dispatcher = Dispatcher::new(builder.build());
//! let signal = dispatcher.handle(message).await;
//! ```

pub mod context;
pub mod dialog;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod locks;
pub mod registry;
pub mod trigger;

pub use context::{CommandContext, Turn};
pub use dialog::{DialogManager, DialogResolution};
pub use dispatcher::{DispatchConfig, Dispatcher};
pub use error::{DispatchError, DispatchResult, RegistryError};
pub use handler::{
    BoxedHandler, Continuation, Handler, IntoHandlerResult, into_continuation, into_handler,
};
pub use locks::KeyedLocks;
pub use registry::{
    CommandId, CommandNode, CommandRegistry, CommandSpec, ParentRef, RegistryBuilder, Resolution,
};
pub use trigger::{Comparison, MatchMode, Trigger, TriggerPredicate};

pub use chorus_core::{
    CompletionSignal, ConversationKey, HandlerError, HandlerResult, Message, MessageType,
    ReplyContent,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        CommandContext, CommandRegistry, CommandSpec, CompletionSignal, Dispatcher, HandlerError,
        KeyedLocks, Message, MessageType, Trigger, Turn,
    };
}
