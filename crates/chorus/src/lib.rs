//! # Chorus
//!
//! Command routing and multi-turn dialogs for chat bots.
//!
//! ## Overview
//!
//! Chorus sits between a chat backend and your command handlers. The backend
//! side turns whatever it receives into normalized [`Message`]s; Chorus
//! decides which handler answers each one, and keeps track of conversations
//! that are waiting for a follow-up reply.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     ┌────────────┐     ┌──────────────────────────────┐
//! │ MessageSource │────▶│  Runtime   │────▶│ Dispatcher (one task / msg)  │
//! │  (backend)    │     │ (ingestion)│     │  ├─ pending dialog?  ──▶ continuation
//! └───────────────┘     └────────────┘     │  └─ command forest   ──▶ handler
//!                                          └──────────────────────────────┘
//! ```
//!
//! - **Triggers**: literal aliases with type masks, case folding and prefix or exact matching
//! - **Commands**: a forest of triggers; the deepest match wins, its leftover text is the argument
//! - **Dialogs**: at most one pending continuation per (group, sender) conversation
//! - **Runtime**: polls a source and handles every message on its own task
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chorus::prelude::*;
//!
//! async fn summary_base(ctx: CommandContext) -> String {
//!     format!("summary for base level {}", ctx.args())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut builder = CommandRegistry::builder();
//!     let summary = builder.command("summary", Trigger::new(["summary", "sum"]), summary)?;
//!     builder.subcommand(summary, "base", Trigger::new(["base", "b"]), summary_base)?;
//!
//!     let (tx, source) = ChannelSource::channel(64);
//!     let runtime = ChorusRuntime::builder().build(builder.build(), source)?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use chorus_core as core;
pub use chorus_framework as framework;
pub use chorus_runtime as runtime;

pub use chorus_core::{
    BoxedReply, CompletionSignal, ConversationKey, HandlerError, HandlerResult, Message,
    MessageType, Reply, ReplyContent, ReplyError,
};
pub use chorus_framework::{
    CommandContext, CommandId, CommandRegistry, CommandSpec, Comparison, DialogManager,
    DispatchConfig, DispatchError, Dispatcher, KeyedLocks, RegistryError, Trigger, Turn,
};
pub use chorus_runtime::{ChannelSource, ChorusConfig, ChorusRuntime, MessageSource};

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use chorus::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use chorus_runtime::{ChannelSource, ChorusRuntime, MessageSource};

    // Declaring commands
    pub use chorus_framework::{CommandRegistry, CommandSpec, Comparison, Trigger};

    // Writing handlers
    pub use chorus_framework::{CommandContext, Dispatcher, KeyedLocks, Turn};

    // Core vocabulary
    pub use chorus_core::{
        CompletionSignal, HandlerError, Message, MessageType, Reply, ReplyContent,
    };
}
