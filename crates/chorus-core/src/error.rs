//! Error types shared across the Chorus layers.
//!
//! Framework-level errors (registry and dispatch errors) are defined in
//! `chorus-framework`; runtime errors in `chorus-runtime`.

use thiserror::Error;

// =============================================================================
// Reply Errors
// =============================================================================

/// Errors raised by a [`Reply`](crate::Reply) implementation.
#[derive(Debug, Clone, Error)]
pub enum ReplyError {
    /// The backend connection is gone.
    #[error("reply channel closed")]
    Closed,

    /// The backend rejected the content.
    #[error("failed to send reply: {0}")]
    SendFailed(String),
}

// =============================================================================
// Handler Errors
// =============================================================================

/// Errors returned by command handlers and dialog continuations.
///
/// Any of these terminates the conversation; the dispatcher converts it into
/// an error reply for the participant.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler could not send a reply it needed to send.
    #[error(transparent)]
    Reply(#[from] ReplyError),

    /// The handler's arguments were malformed.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// Any other failure, usually from an external collaborator.
    #[error("{0}")]
    Custom(String),

    /// A wrapped error from another library.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Creates a custom handler error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates an invalid-arguments error.
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self::Other(Box::new(err))
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for reply operations.
pub type ReplyResult<T> = Result<T, ReplyError>;
