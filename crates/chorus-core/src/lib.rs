//! # Chorus Core
//!
//! Foundation types for the Chorus command routing core.
//!
//! This crate defines the vocabulary shared by every other layer:
//!
//! - **Messages**: the normalized inbound snapshot ([`Message`]) and its
//!   type tag / mask ([`MessageType`])
//! - **Conversations**: the identity used to correlate follow-up messages
//!   ([`ConversationKey`])
//! - **Completion**: how handlers finish ([`CompletionSignal`], [`HandlerResult`])
//! - **Replies**: the opaque capability to answer a conversation ([`Reply`])
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────┐     ┌────────────┐     ┌──────────────┐
//! │  Ingestion  │────▶│ Dispatcher │────▶│ Dialog table │──▶ continuation
//! │ (Message)   │     │            │────▶│ Command tree │──▶ handler
//! └─────────────┘     └────────────┘     └──────────────┘
//!                            │
//!                            └──────────▶ Reply (back to the backend)
//! ```

pub mod error;
pub mod message;
pub mod reply;
pub mod signal;

pub use error::{HandlerError, ReplyError, ReplyResult};
pub use message::{ConversationKey, Message, MessageType};
pub use reply::{BoxedReply, DiscardReply, RecordingReply, Reply, ReplyContent};
pub use signal::{CompletionSignal, HandlerResult};

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        CompletionSignal, ConversationKey, HandlerError, HandlerResult, Message, MessageType,
        Reply, ReplyContent,
    };
}
