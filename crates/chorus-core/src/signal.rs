//! Completion signals returned by handlers and dialog continuations.

use std::fmt;

use crate::error::HandlerError;

/// How a handler or continuation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionSignal {
    /// The conversation is over.
    Completed,
    /// The handler registered a continuation and expects another message.
    ToBeContinued,
    /// The conversation was abandoned, usually because of bad input.
    Canceled,
}

impl CompletionSignal {
    /// Returns `true` for [`Completed`](Self::Completed) and
    /// [`Canceled`](Self::Canceled).
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::ToBeContinued)
    }
}

impl fmt::Display for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::ToBeContinued => "to-be-continued",
            Self::Canceled => "canceled",
        })
    }
}

/// The result every handler and continuation resolves to.
pub type HandlerResult = Result<CompletionSignal, HandlerError>;
