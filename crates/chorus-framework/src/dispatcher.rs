//! Message dispatcher for the Chorus framework.
//!
//! The [`Dispatcher`] routes one inbound message at a time:
//!
//! 1. A pending dialog for the message's conversation takes precedence, even
//!    when the text looks like a fresh command.
//! 2. Otherwise the [`CommandRegistry`] resolves the text and the bound
//!    handler runs with the residual as its arguments.
//! 3. The handler's [`CompletionSignal`] is checked: `ToBeContinued` without a
//!    registered dialog is logged and treated as `Completed`.
//! 4. A handler that fails drops every dialog it registered. One that ends
//!    with `Completed` or `Canceled` drops the dialog it registered for its
//!    own conversation; dialogs handed to other conversations stay.
//!
//! [`Dispatcher::try_handle`] reports failures as [`DispatchError`]s.
//! [`Dispatcher::handle`] is the boundary used by the runtime: it turns
//! unrecognized commands and handler faults into replies according to the
//! [`DispatchConfig`] and never fails.
//!
//! `Dispatcher` implements `tower::Service<Message>`, so tower middleware can
//! wrap it:
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use tower::limit::ConcurrencyLimitLayer;
//!
//! let service = ServiceBuilder::new()
//!     .layer(ConcurrencyLimitLayer::new(64))
//!     .service(dispatcher);
//! ```

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tower::Service;
use tracing::{Instrument, debug, debug_span, error, warn};

use crate::context::CommandContext;
use crate::dialog::{DialogManager, DialogResolution};
use crate::error::{DispatchError, DispatchResult};
use crate::handler::invoke_guarded;
use crate::registry::CommandRegistry;
use chorus_core::{
    BoxedReply, CompletionSignal, ConversationKey, HandlerResult, Message, MessageType,
};

/// Dispatch policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Reply sent for unrecognized commands. Empty disables the reply.
    pub unrecognized_reply: String,
    /// Message types that get `unrecognized_reply`; others are ignored.
    pub reply_unrecognized: MessageType,
    /// Reply sent when a handler fails.
    pub fault_reply: String,
    /// Append the failure text to `fault_reply`.
    pub expose_fault_detail: bool,
    /// Drop pending dialogs older than this many seconds. Unset keeps them
    /// until restart.
    pub dialog_expire_secs: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            unrecognized_reply: "Unknown command. Send `help` to list commands.".to_string(),
            reply_unrecognized: MessageType::FRIEND | MessageType::TEMP | MessageType::STRANGER,
            fault_reply: "Something went wrong while handling that.".to_string(),
            expose_fault_detail: false,
            dialog_expire_secs: None,
        }
    }
}

impl DispatchConfig {
    /// Creates a dialog table honoring `dialog_expire_secs`.
    pub fn dialog_manager(&self) -> DialogManager {
        match self.dialog_expire_secs {
            Some(secs) => DialogManager::with_expiry(Duration::from_secs(secs)),
            None => DialogManager::new(),
        }
    }

    fn fault_text(&self, err: &DispatchError) -> String {
        match err {
            DispatchError::HandlerFault { source, .. } if self.expose_fault_detail => {
                format!("{} ({source})", self.fault_reply)
            }
            _ => self.fault_reply.clone(),
        }
    }
}

/// Routes messages to dialogs and command handlers.
///
/// Cheap to clone; clones share the registry and the dialog table.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    dialogs: DialogManager,
    config: Arc<DispatchConfig>,
}

impl Dispatcher {
    /// Creates a dispatcher with default policies.
    pub fn new(registry: CommandRegistry) -> Self {
        Self::with_config(registry, DispatchConfig::default())
    }

    /// Creates a dispatcher with the given policies.
    pub fn with_config(registry: CommandRegistry, config: DispatchConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            dialogs: config.dialog_manager(),
            config: Arc::new(config),
        }
    }

    /// Replaces the dialog table, e.g. to share one with code outside the
    /// dispatcher.
    pub fn with_dialogs(mut self, dialogs: DialogManager) -> Self {
        self.dialogs = dialogs;
        self
    }

    pub fn dialogs(&self) -> &DialogManager {
        &self.dialogs
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Routes one message and reports what happened.
    pub async fn try_handle(&self, message: Message) -> DispatchResult<CompletionSignal> {
        let key = message.conversation_key();
        let span = debug_span!(
            "dispatch",
            %key,
            message_type = %message.message_type(),
        );
        self.route(key, message).instrument(span).await
    }

    async fn route(
        &self,
        key: ConversationKey,
        message: Message,
    ) -> DispatchResult<CompletionSignal> {
        let message = match self.dialogs.try_resolve(message).await {
            DialogResolution::Resolved {
                dialog_id,
                result,
                context,
            } => {
                debug!(dialog_id, "Message consumed by dialog");
                return settle("dialog", key, result, &context);
            }
            DialogResolution::NoDialog(message) => message,
        };

        let Some(resolution) = self.registry.resolve(&message) else {
            debug!(command = message.command(), "Unrecognized command");
            return Err(DispatchError::Unrecognized {
                command: message.command().trim().to_string(),
            });
        };

        let node = resolution.node;
        debug!(
            command = node.name(),
            args = %resolution.residual,
            "Dispatching command"
        );
        let context = CommandContext::new(
            message.with_command(resolution.residual),
            self.dialogs.clone(),
        );
        let result = invoke_guarded((node.handler())(context.clone())).await;
        settle(node.name(), key, result, &context)
    }

    /// Routes one message, applying the configured policies to failures.
    ///
    /// Unrecognized commands and handler faults resolve to
    /// [`CompletionSignal::Canceled`] after their reply (if any) was sent.
    pub async fn handle(&self, message: Message) -> CompletionSignal {
        let message_type = message.message_type();
        let replier = message.replier().clone();

        match self.try_handle(message).await {
            Ok(signal) => signal,
            Err(DispatchError::Unrecognized { command }) => {
                if self.config.reply_unrecognized.intersects(message_type)
                    && !self.config.unrecognized_reply.is_empty()
                {
                    send_reply(&replier, &self.config.unrecognized_reply).await;
                } else {
                    debug!(%command, %message_type, "Ignoring unrecognized command");
                }
                CompletionSignal::Canceled
            }
            Err(err) => {
                error!(error = %err, "Handler fault");
                send_reply(&replier, &self.config.fault_text(&err)).await;
                CompletionSignal::Canceled
            }
        }
    }
}

/// Checks a handler result against the dialog table.
fn settle(
    command: &str,
    key: ConversationKey,
    result: HandlerResult,
    context: &CommandContext,
) -> DispatchResult<CompletionSignal> {
    match result {
        Ok(CompletionSignal::ToBeContinued) if !context.continuation_registered() => {
            warn!(
                command,
                "ToBeContinued returned without registering a dialog, treating as Completed"
            );
            Ok(CompletionSignal::Completed)
        }
        Ok(CompletionSignal::ToBeContinued) => {
            debug!(command, "Handled, waiting for the next message");
            Ok(CompletionSignal::ToBeContinued)
        }
        Ok(signal) => {
            let withdrawn = context.withdraw_registered(true);
            if withdrawn > 0 {
                debug!(command, withdrawn, "Dropped dialog left by a finished handler");
            }
            debug!(command, %signal, "Handled");
            Ok(signal)
        }
        Err(source) => {
            let withdrawn = context.withdraw_registered(false);
            if withdrawn > 0 {
                debug!(command, withdrawn, "Dropped dialogs left by a failed handler");
            }
            Err(DispatchError::HandlerFault {
                key,
                command: command.to_string(),
                source,
            })
        }
    }
}

async fn send_reply(replier: &BoxedReply, text: &str) {
    if let Err(err) = replier.send(text.into()).await {
        error!(error = %err, "Failed to send reply");
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("dialogs", &self.dialogs)
            .field("config", &self.config)
            .finish()
    }
}

impl Service<Message> for Dispatcher {
    type Response = CompletionSignal;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, message: Message) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move { Ok(dispatcher.handle(message).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CommandSpec;
    use crate::trigger::Trigger;
    use chorus_core::{HandlerError, RecordingReply};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn group_msg(recorder: &Arc<RecordingReply>, text: &str) -> Message {
        Message::new(MessageType::GROUP, text)
            .group(100)
            .sender(7)
            .reply_with(recorder.clone())
    }

    fn friend_msg(recorder: &Arc<RecordingReply>, text: &str) -> Message {
        Message::new(MessageType::FRIEND, text)
            .sender(7)
            .reply_with(recorder.clone())
    }

    fn rhythm_dispatcher(calls: Arc<AtomicUsize>) -> Dispatcher {
        let mut builder = CommandRegistry::builder();
        let summary = builder
            .command(
                "summary",
                Trigger::new(["summary", "sum"]),
                |ctx: CommandContext| async move { format!("summary:{}", ctx.args()) },
            )
            .unwrap();
        builder
            .subcommand(
                summary,
                "base",
                Trigger::new(["base", "b"]),
                |ctx: CommandContext| async move { format!("base:{}", ctx.args()) },
            )
            .unwrap();
        builder
            .register(CommandSpec::new(
                "bind",
                Trigger::new(["bind"]),
                move |ctx: CommandContext| {
                    let calls = Arc::clone(&calls);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        ctx.reply("which server?").await?;
                        ctx.add_dialog(|next: CommandContext| async move {
                            format!("bound to {}", next.args())
                        });
                        Ok::<_, HandlerError>(CompletionSignal::ToBeContinued)
                    }
                },
            ))
            .unwrap();
        builder
            .command("crash", Trigger::new(["crash"]), |_ctx: CommandContext| async {
                Err::<(), _>(HandlerError::custom("chart cache missing"))
            })
            .unwrap();
        builder
            .command("boom", Trigger::new(["boom"]), |_ctx: CommandContext| async {
                if true {
                    panic!("kaboom");
                }
            })
            .unwrap();
        builder
            .command("lazy", Trigger::new(["lazy"]), |_ctx: CommandContext| async {
                CompletionSignal::ToBeContinued
            })
            .unwrap();
        builder
            .command("sync", Trigger::new(["sync"]), |ctx: CommandContext| async move {
                ctx.add_dialog(|_next: CommandContext| async { "continued".to_string() });
                match ctx.args() {
                    "done" => Ok(CompletionSignal::Completed),
                    "stop" => Ok(CompletionSignal::Canceled),
                    _ => Err(HandlerError::custom("backend down")),
                }
            })
            .unwrap();
        builder
            .command("invite", Trigger::new(["invite"]), |ctx: CommandContext| async move {
                ctx.add_dialog(|_next: CommandContext| async { "continued".to_string() });
                ctx.add_dialog_for(None, Some(8), |_next: CommandContext| async {
                    "joined".to_string()
                });
                if ctx.args() == "fail" {
                    return Err(HandlerError::custom("backend down"));
                }
                Ok(CompletionSignal::Completed)
            })
            .unwrap();
        Dispatcher::new(builder.build())
    }

    #[tokio::test]
    async fn test_resolves_child_with_residual() {
        let dispatcher = rhythm_dispatcher(Arc::default());
        let recorder = RecordingReply::new();

        let signal = dispatcher
            .handle(group_msg(&recorder, "  SUMMARY base 10-11  "))
            .await;

        assert_eq!(signal, CompletionSignal::Completed);
        assert_eq!(recorder.texts(), vec!["base:10-11".to_string()]);
    }

    #[tokio::test]
    async fn test_dialog_short_circuits_resolution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = rhythm_dispatcher(Arc::clone(&calls));
        let recorder = RecordingReply::new();

        let first = dispatcher.handle(group_msg(&recorder, "bind")).await;
        assert_eq!(first, CompletionSignal::ToBeContinued);

        // Looks like a command, but the pending dialog takes it.
        let second = dispatcher.handle(group_msg(&recorder, "summary base 3")).await;
        assert_eq!(second, CompletionSignal::Completed);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            recorder.texts(),
            vec![
                "which server?".to_string(),
                "bound to summary base 3".to_string()
            ]
        );
        assert_eq!(dispatcher.dialogs().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dialog_is_per_conversation() {
        let dispatcher = rhythm_dispatcher(Arc::default());
        let recorder = RecordingReply::new();

        dispatcher.handle(group_msg(&recorder, "bind")).await;
        // Same sender, private chat: a different conversation.
        let other = dispatcher.handle(friend_msg(&recorder, "sum b 12")).await;
        assert_eq!(other, CompletionSignal::Completed);
        assert_eq!(recorder.texts().last().unwrap(), "base:12");
        assert_eq!(dispatcher.dialogs().pending_count(), 1);
    }

    #[tokio::test]
    async fn test_fault_produces_one_reply() {
        let dispatcher = rhythm_dispatcher(Arc::default());
        let recorder = RecordingReply::new();

        let err = dispatcher
            .try_handle(group_msg(&RecordingReply::new(), "crash"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::HandlerFault { ref command, .. } if command == "crash"
        ));

        let signal = dispatcher.handle(group_msg(&recorder, "crash")).await;
        assert_eq!(signal, CompletionSignal::Canceled);
        assert_eq!(recorder.texts(), vec![DispatchConfig::default().fault_reply]);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let dispatcher = rhythm_dispatcher(Arc::default());
        let recorder = RecordingReply::new();

        let signal = dispatcher.handle(group_msg(&recorder, "boom")).await;
        assert_eq!(signal, CompletionSignal::Canceled);
        assert_eq!(recorder.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_fault_detail_exposed_when_configured() {
        let mut builder = CommandRegistry::builder();
        builder
            .command("crash", Trigger::new(["crash"]), |_ctx: CommandContext| async {
                Err::<(), _>(HandlerError::custom("chart cache missing"))
            })
            .unwrap();
        let config = DispatchConfig {
            expose_fault_detail: true,
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::with_config(builder.build(), config);
        let recorder = RecordingReply::new();

        dispatcher.handle(group_msg(&recorder, "crash")).await;
        let texts = recorder.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("chart cache missing"));
    }

    #[tokio::test]
    async fn test_unfulfilled_to_be_continued() {
        let dispatcher = rhythm_dispatcher(Arc::default());
        let recorder = RecordingReply::new();

        let signal = dispatcher.handle(group_msg(&recorder, "lazy")).await;
        assert_eq!(signal, CompletionSignal::Completed);
        assert_eq!(dispatcher.dialogs().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_handler_leaves_no_dialog() {
        let dispatcher = rhythm_dispatcher(Arc::default());
        let recorder = RecordingReply::new();

        let first = dispatcher.handle(friend_msg(&recorder, "sync")).await;
        assert_eq!(first, CompletionSignal::Canceled);
        assert_eq!(dispatcher.dialogs().pending_count(), 0);

        let second = dispatcher.handle(friend_msg(&recorder, "sum 1")).await;
        assert_eq!(second, CompletionSignal::Completed);
        assert_eq!(
            recorder.texts(),
            vec![
                DispatchConfig::default().fault_reply,
                "summary:1".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_finished_handler_leaves_no_dialog() {
        let dispatcher = rhythm_dispatcher(Arc::default());

        for (text, expected) in [
            ("sync done", CompletionSignal::Completed),
            ("sync stop", CompletionSignal::Canceled),
        ] {
            let recorder = RecordingReply::new();
            let signal = dispatcher.handle(friend_msg(&recorder, text)).await;
            assert_eq!(signal, expected, "after '{text}'");
            assert_eq!(dispatcher.dialogs().pending_count(), 0);

            dispatcher.handle(friend_msg(&recorder, "sum 2")).await;
            assert_eq!(recorder.texts(), vec!["summary:2".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_dialog_handed_to_other_conversation_survives() {
        let dispatcher = rhythm_dispatcher(Arc::default());
        let recorder = RecordingReply::new();
        let invited = ConversationKey::new(None, Some(8));

        let signal = dispatcher.handle(friend_msg(&recorder, "invite")).await;
        assert_eq!(signal, CompletionSignal::Completed);
        assert!(!dispatcher.dialogs().is_pending(ConversationKey::new(None, Some(7))));
        assert!(dispatcher.dialogs().is_pending(invited));

        // A failing handler drops both.
        dispatcher.handle(friend_msg(&recorder, "invite fail")).await;
        assert_eq!(dispatcher.dialogs().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_handler_keeps_newer_dialog() {
        let mut builder = CommandRegistry::builder();
        builder
            .command("sync", Trigger::new(["sync"]), |ctx: CommandContext| async move {
                ctx.add_dialog(|_next: CommandContext| async { "stale".to_string() });
                // Registered straight on the table, as another message would.
                ctx.dialogs()
                    .add_handler(None, Some(7), |_next: CommandContext| async {
                        "fresh".to_string()
                    });
                Err::<(), _>(HandlerError::custom("backend down"))
            })
            .unwrap();
        let dispatcher = Dispatcher::new(builder.build());
        let recorder = RecordingReply::new();

        let first = dispatcher.handle(friend_msg(&recorder, "sync")).await;
        assert_eq!(first, CompletionSignal::Canceled);
        assert_eq!(dispatcher.dialogs().pending_count(), 1);

        let second = dispatcher.handle(friend_msg(&recorder, "anything")).await;
        assert_eq!(second, CompletionSignal::Completed);
        assert_eq!(recorder.texts().last().unwrap(), "fresh");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_messages_resume_dialog_once() {
        for _ in 0..50 {
            let dispatcher = rhythm_dispatcher(Arc::default());
            let recorder = RecordingReply::new();
            let resumed = Arc::new(AtomicUsize::new(0));
            let r = Arc::clone(&resumed);
            dispatcher
                .dialogs()
                .add_handler(Some(100), Some(7), move |_ctx: CommandContext| async move {
                    r.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    "resumed".to_string()
                });

            let a = tokio::spawn({
                let d = dispatcher.clone();
                let m = group_msg(&recorder, "sum x");
                async move { d.handle(m).await }
            });
            let b = tokio::spawn({
                let d = dispatcher.clone();
                let m = group_msg(&recorder, "sum y");
                async move { d.handle(m).await }
            });
            assert_eq!(a.await.unwrap(), CompletionSignal::Completed);
            assert_eq!(b.await.unwrap(), CompletionSignal::Completed);

            assert_eq!(resumed.load(Ordering::SeqCst), 1);
            let texts = recorder.texts();
            assert_eq!(texts.len(), 2);
            assert_eq!(texts.iter().filter(|t| *t == "resumed").count(), 1);
            assert_eq!(texts.iter().filter(|t| t.starts_with("summary:")).count(), 1);
            assert_eq!(dispatcher.dialogs().pending_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_unrecognized_policy() {
        let dispatcher = rhythm_dispatcher(Arc::default());

        let group = RecordingReply::new();
        let err = dispatcher
            .try_handle(group_msg(&group, "  dance  "))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Unrecognized { ref command } if command == "dance"));

        let signal = dispatcher.handle(group_msg(&group, "dance")).await;
        assert_eq!(signal, CompletionSignal::Canceled);
        assert!(group.sent().is_empty());

        let friend = RecordingReply::new();
        let signal = dispatcher.handle(friend_msg(&friend, "dance")).await;
        assert_eq!(signal, CompletionSignal::Canceled);
        assert_eq!(
            friend.texts(),
            vec![DispatchConfig::default().unrecognized_reply]
        );
    }

    #[tokio::test]
    async fn test_dialog_expiry_from_config() {
        let config = DispatchConfig {
            dialog_expire_secs: Some(0),
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::with_config(
            CommandRegistry::builder().build(),
            config,
        );
        dispatcher
            .dialogs()
            .add_handler(None, Some(7), |_ctx: CommandContext| async {});

        let recorder = RecordingReply::new();
        let signal = dispatcher.handle(friend_msg(&recorder, "late")).await;
        assert_eq!(signal, CompletionSignal::Canceled);
        assert_eq!(recorder.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_tower_service() {
        let dispatcher = rhythm_dispatcher(Arc::default());
        let recorder = RecordingReply::new();

        let signal = dispatcher
            .oneshot(group_msg(&recorder, "sum 13"))
            .await
            .unwrap();
        assert_eq!(signal, CompletionSignal::Completed);
        assert_eq!(recorder.texts(), vec!["summary:13".to_string()]);
    }
}
