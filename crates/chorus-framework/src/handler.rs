//! Handler system for the Chorus framework.
//!
//! Command handlers and dialog continuations are plain async functions or
//! closures taking a [`CommandContext`]:
//!
//! ```rust,ignore
//! use chorus_framework::{CommandContext, CompletionSignal};
//!
//! // No return value: the command completes.
//! async fn ping(ctx: CommandContext) {
//!     let _ = ctx.reply("pong").await;
//! }
//!
//! // Returning a String sends it as a reply, then completes.
//! async fn echo(ctx: CommandContext) -> String {
//!     ctx.args().to_string()
//! }
//!
//! // Full control over the completion signal.
//! async fn ask(ctx: CommandContext) -> Result<CompletionSignal, HandlerError> {
//!     ctx.reply("which one?").await?;
//!     ctx.add_dialog(|next: CommandContext| async move { next.args().to_string() });
//!     Ok(CompletionSignal::ToBeContinued)
//! }
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::context::CommandContext;
use chorus_core::{CompletionSignal, HandlerError, HandlerResult, ReplyContent};

// ============================================================================
// IntoHandlerResult - Interpret handler return values
// ============================================================================

/// A trait for types a handler may return.
///
/// Each implementation decides which [`CompletionSignal`] the value stands for
/// and may send a reply on the way.
#[async_trait]
pub trait IntoHandlerResult: Send {
    /// Converts this value into a handler result.
    async fn into_handler_result(self, ctx: &CommandContext) -> HandlerResult;
}

/// `()` completes the command.
#[async_trait]
impl IntoHandlerResult for () {
    async fn into_handler_result(self, _ctx: &CommandContext) -> HandlerResult {
        Ok(CompletionSignal::Completed)
    }
}

#[async_trait]
impl IntoHandlerResult for CompletionSignal {
    async fn into_handler_result(self, _ctx: &CommandContext) -> HandlerResult {
        Ok(self)
    }
}

/// `String` is sent back as a text reply, then the command completes.
#[async_trait]
impl IntoHandlerResult for String {
    async fn into_handler_result(self, ctx: &CommandContext) -> HandlerResult {
        ctx.reply(self).await?;
        Ok(CompletionSignal::Completed)
    }
}

#[async_trait]
impl IntoHandlerResult for ReplyContent {
    async fn into_handler_result(self, ctx: &CommandContext) -> HandlerResult {
        ctx.reply(self).await?;
        Ok(CompletionSignal::Completed)
    }
}

/// `None` completes without a reply; `Some` defers to the inner value.
#[async_trait]
impl<T: IntoHandlerResult> IntoHandlerResult for Option<T> {
    async fn into_handler_result(self, ctx: &CommandContext) -> HandlerResult {
        match self {
            Some(t) => t.into_handler_result(ctx).await,
            None => Ok(CompletionSignal::Completed),
        }
    }
}

/// `Err` becomes a handler fault.
#[async_trait]
impl<T, E> IntoHandlerResult for Result<T, E>
where
    T: IntoHandlerResult,
    E: Into<HandlerError> + Send,
{
    async fn into_handler_result(self, ctx: &CommandContext) -> HandlerResult {
        match self {
            Ok(t) => t.into_handler_result(ctx).await,
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// The core trait for command handlers and dialog continuations.
///
/// Automatically implemented for async functions and closures that take a
/// single [`CommandContext`] and return a type implementing
/// [`IntoHandlerResult`]. Closures need their parameter annotated:
///
/// ```rust,ignore
/// ctx.add_dialog(|next: CommandContext| async move { /* ... */ });
/// ```
pub trait Handler: Send + 'static {
    /// Calls the handler, consuming it.
    fn call(self, ctx: CommandContext) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut, Res> Handler for F
where
    F: FnOnce(CommandContext) -> Fut + Send + 'static,
    Fut: Future<Output = Res> + Send + 'static,
    Res: IntoHandlerResult + 'static,
{
    fn call(self, ctx: CommandContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin(async move {
            let res = (self)(ctx.clone()).await;
            res.into_handler_result(&ctx).await
        })
    }
}

// ============================================================================
// Type-erased handlers
// ============================================================================

/// A type-erased, reusable command handler.
///
/// Internally a closure that captures the original handler and calls a
/// cloned copy on each invocation.
pub type BoxedHandler = Arc<dyn Fn(CommandContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A type-erased, single-use dialog continuation.
pub type Continuation = Box<dyn FnOnce(CommandContext) -> BoxFuture<'static, HandlerResult> + Send>;

/// Converts a handler function into a boxed, reusable handler.
pub fn into_handler<H>(handler: H) -> BoxedHandler
where
    H: Handler + Clone + Sync,
{
    Arc::new(move |ctx| handler.clone().call(ctx))
}

/// Converts a handler function into a single-use continuation.
pub fn into_continuation<H: Handler>(handler: H) -> Continuation {
    Box::new(move |ctx| handler.call(ctx))
}

/// Runs a handler future, turning a panic into [`HandlerError::Panicked`].
pub(crate) async fn invoke_guarded(fut: BoxFuture<'static, HandlerResult>) -> HandlerResult {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::DialogManager;
    use chorus_core::{Message, MessageType, RecordingReply};

    fn context(recorder: &Arc<RecordingReply>) -> CommandContext {
        let msg = Message::new(MessageType::FRIEND, "hello").reply_with(recorder.clone());
        CommandContext::new(msg, DialogManager::new())
    }

    #[tokio::test]
    async fn test_unit_return_completes() {
        let recorder = RecordingReply::new();
        let handler = into_handler(|_ctx: CommandContext| async {});
        let result = handler(context(&recorder)).await;
        assert_eq!(result.unwrap(), CompletionSignal::Completed);
        assert!(recorder.sent().is_empty());
    }

    #[tokio::test]
    async fn test_string_return_replies() {
        let recorder = RecordingReply::new();
        let handler = into_handler(|ctx: CommandContext| async move {
            format!("echo: {}", ctx.args())
        });
        let result = handler(context(&recorder)).await;
        assert_eq!(result.unwrap(), CompletionSignal::Completed);
        assert_eq!(recorder.texts(), vec!["echo: hello".to_string()]);
    }

    #[tokio::test]
    async fn test_error_return_is_fault() {
        let recorder = RecordingReply::new();
        let handler = into_handler(|_ctx: CommandContext| async {
            Err::<(), _>(HandlerError::custom("backend down"))
        });
        let result = handler(context(&recorder)).await;
        assert!(matches!(result, Err(HandlerError::Custom(ref m)) if m == "backend down"));
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let recorder = RecordingReply::new();
        let continuation = into_continuation(|_ctx: CommandContext| async {
            if true {
                panic!("boom");
            }
        });
        let result = invoke_guarded(continuation(context(&recorder))).await;
        assert!(matches!(result, Err(HandlerError::Panicked(ref m)) if m == "boom"));
    }

    #[test]
    fn test_continuation_runs_once_with_owned_state() {
        let recorder = RecordingReply::new();
        let owned = vec![1, 2, 3];
        let continuation = into_continuation(move |_ctx: CommandContext| async move {
            if owned.len() == 3 {
                CompletionSignal::Canceled
            } else {
                CompletionSignal::Completed
            }
        });
        let result = tokio_test::block_on(continuation(context(&recorder)));
        tokio_test::assert_ok!(&result);
        assert_eq!(result.unwrap(), CompletionSignal::Canceled);
    }
}
