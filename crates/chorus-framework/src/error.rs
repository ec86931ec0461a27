//! Error types for the Chorus framework.

use thiserror::Error;

use crate::registry::CommandId;
use chorus_core::{ConversationKey, HandlerError};

/// Errors raised while declaring commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The parent id does not belong to this registry.
    #[error("unknown parent command id {0}")]
    UnknownParent(CommandId),

    /// No command with the given name has been declared yet.
    #[error("unknown parent command '{0}'")]
    UnknownParentName(String),

    /// Another command already uses this name.
    #[error("duplicate command name '{0}'")]
    DuplicateName(String),

    /// Command names must not be empty.
    #[error("command name must not be empty")]
    EmptyName,
}

/// Why a message could not be handled.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No pending dialog and no top-level command matched.
    #[error("unrecognized command '{command}'")]
    Unrecognized {
        /// The trimmed command text.
        command: String,
    },

    /// A handler or continuation failed or panicked.
    #[error("handler for '{command}' in conversation {key} failed: {source}")]
    HandlerFault {
        /// The conversation the message belonged to.
        key: ConversationKey,
        /// The command name, or `dialog` for a continuation.
        command: String,
        /// The underlying failure.
        #[source]
        source: HandlerError,
    },
}

impl DispatchError {
    /// Returns `true` for [`DispatchError::Unrecognized`].
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, Self::Unrecognized { .. })
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
