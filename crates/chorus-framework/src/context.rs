//! The context handed to command handlers and dialog continuations.
//!
//! A [`CommandContext`] wraps the message snapshot for one invocation. Its
//! command text is already the residual left by routing, so handlers read
//! their arguments from [`args`](CommandContext::args) directly.
//!
//! The context is also the handler's door to the dialog table: any handler
//! can ask for the next message of the conversation with
//! [`add_dialog`](CommandContext::add_dialog), or run a state-carrying
//! conversation with [`converse`](CommandContext::converse).

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use chorus_core::{
    CompletionSignal, ConversationKey, HandlerError, Message, ReplyContent, ReplyResult,
};

use crate::dialog::DialogManager;
use crate::handler::{Handler, into_continuation};

/// What a conversation step decided.
///
/// Returned by the step function given to
/// [`CommandContext::converse`]. The state value is the only thing carried
/// from one turn to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn<S> {
    /// Wait for the next message, resuming with this state.
    Continue(S),
    /// End the conversation with this signal.
    Finish(CompletionSignal),
}

impl<S> Turn<S> {
    /// Ends the conversation as completed.
    pub fn done() -> Self {
        Self::Finish(CompletionSignal::Completed)
    }

    /// Ends the conversation as canceled.
    pub fn cancel() -> Self {
        Self::Finish(CompletionSignal::Canceled)
    }
}

/// The context object passed to handlers and continuations.
///
/// Cloning is cheap; all clones of one context share the record of the
/// continuations registered through it.
#[derive(Clone)]
pub struct CommandContext {
    message: Message,
    dialogs: DialogManager,
    /// Dialog entries registered through this context.
    registrations: Arc<Mutex<Vec<(ConversationKey, u64)>>>,
    /// Latest dialog id at the time this context was created.
    since: u64,
}

impl CommandContext {
    /// Creates a context for one invocation.
    pub fn new(message: Message, dialogs: DialogManager) -> Self {
        let since = dialogs.latest_id();
        Self {
            message,
            dialogs,
            registrations: Arc::default(),
            since,
        }
    }

    /// Returns the message snapshot. Its command text is the residual.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Returns the residual argument text.
    pub fn args(&self) -> &str {
        self.message.command()
    }

    /// Returns the conversation this invocation belongs to.
    pub fn key(&self) -> ConversationKey {
        self.message.conversation_key()
    }

    /// Returns the dialog table.
    pub fn dialogs(&self) -> &DialogManager {
        &self.dialogs
    }

    /// Sends content back to the conversation.
    pub async fn reply(&self, content: impl Into<ReplyContent>) -> ReplyResult<()> {
        self.message.reply(content).await
    }

    /// Registers a continuation for the next message of this conversation.
    ///
    /// Replaces any continuation already pending for the conversation.
    /// Returns `true` if one was replaced.
    pub fn add_dialog<H: Handler>(&self, continuation: H) -> bool {
        let key = self.key();
        self.add_dialog_for(key.group_id, key.sender_id, continuation)
    }

    /// Registers a continuation for an arbitrary conversation.
    pub fn add_dialog_for<H: Handler>(
        &self,
        group_id: Option<i64>,
        sender_id: Option<i64>,
        continuation: H,
    ) -> bool {
        let key = ConversationKey::new(group_id, sender_id);
        let (id, replaced) = self.dialogs.insert(key, into_continuation(continuation));
        self.registrations.lock().push((key, id));
        replaced
    }

    /// Runs a multi-turn conversation driven by an explicit state value.
    ///
    /// `step` is called with the current state for every following message
    /// of this conversation. [`Turn::Continue`] re-registers the step with
    /// the new state and yields [`CompletionSignal::ToBeContinued`];
    /// [`Turn::Finish`] ends the conversation.
    ///
    /// ```rust,ignore
    /// enum Bind { AskServer, AskCode { server: String } }
    ///
    /// ctx.converse(Bind::AskServer, |state, next: CommandContext| async move {
    ///     match state {
    ///         Bind::AskServer => Ok(Turn::Continue(Bind::AskCode { server: next.args().into() })),
    ///         Bind::AskCode { server } => { /* ... */ Ok(Turn::done()) }
    ///     }
    /// });
    /// ```
    pub fn converse<S, F, Fut>(&self, state: S, step: F) -> bool
    where
        S: Send + 'static,
        F: Fn(S, CommandContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Turn<S>, HandlerError>> + Send + 'static,
    {
        self.add_dialog(move |next: CommandContext| async move {
            match step(state, next.clone()).await? {
                Turn::Continue(state) => {
                    next.converse(state, step);
                    Ok::<_, HandlerError>(CompletionSignal::ToBeContinued)
                }
                Turn::Finish(signal) => Ok(signal),
            }
        })
    }

    /// Returns `true` if a continuation was registered during this
    /// invocation, either through this context or directly on the dialog
    /// table for this conversation.
    pub fn continuation_registered(&self) -> bool {
        !self.registrations.lock().is_empty()
            || self.dialogs.registered_since(self.key(), self.since)
    }

    /// Withdraws the continuations this invocation registered, keeping any
    /// that were replaced by a later registration since.
    ///
    /// With `own_only` set, only registrations for this conversation are
    /// withdrawn. Returns how many entries were removed.
    pub(crate) fn withdraw_registered(&self, own_only: bool) -> usize {
        let own = self.key();
        let mut registrations = self.registrations.lock();
        let mut removed = 0;
        registrations.retain(|&(key, id)| {
            if own_only && key != own {
                return true;
            }
            removed += usize::from(self.dialogs.withdraw(key, id));
            false
        });
        removed
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("message", &self.message)
            .field("registrations", &self.registrations.lock().len())
            .finish_non_exhaustive()
    }
}
