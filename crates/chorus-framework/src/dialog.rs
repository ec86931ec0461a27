//! The dialog table: pending continuations keyed by conversation.
//!
//! Each [`ConversationKey`] has at most one pending continuation. The state
//! machine per key is:
//!
//! ```text
//!               add_handler                 try_resolve (entry removed first)
//! NoPendingDialog ─────────▶ PendingDialog ───────────────────────────────▶ continuation runs
//!        ▲                      ▲   │ add_handler (replaces, old one abandoned)   │
//!        │                      │   └──────────────┘                              │
//!        │                      └──── continuation re-registers ◀── ToBeContinued ┤
//!        └──────────────────────────────────────────────── Completed / Canceled ◀─┘
//! ```
//!
//! Taking an entry out of the table is atomic: when two messages of the same
//! conversation race, exactly one of them gets the continuation and the other
//! falls through to normal command resolution. The table lock only guards
//! the map operation itself and is never held while a continuation runs, so
//! unrelated conversations never wait on each other.
//!
//! Abandoned dialogs stay in the table until they are replaced or the
//! process exits, unless an expiry is configured with
//! [`DialogManager::with_expiry`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::context::CommandContext;
use crate::handler::{Continuation, Handler, into_continuation, invoke_guarded};
use chorus_core::{ConversationKey, HandlerResult, Message};

/// A pending continuation.
struct DialogEntry {
    id: u64,
    registered_at: Instant,
    continuation: Continuation,
}

struct DialogTable {
    entries: Mutex<HashMap<ConversationKey, DialogEntry>>,
    next_id: AtomicU64,
    expire_after: Option<Duration>,
}

/// Outcome of [`DialogManager::try_resolve`].
pub enum DialogResolution {
    /// No continuation was pending; the message is handed back untouched.
    NoDialog(Message),
    /// A continuation was taken and ran.
    Resolved {
        /// Id of the consumed dialog entry.
        dialog_id: u64,
        /// What the continuation returned.
        result: HandlerResult,
        /// The context the continuation ran with.
        context: CommandContext,
    },
}

impl std::fmt::Debug for DialogResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoDialog(message) => f.debug_tuple("NoDialog").field(message).finish(),
            Self::Resolved {
                dialog_id, result, ..
            } => f
                .debug_struct("Resolved")
                .field("dialog_id", dialog_id)
                .field("result", result)
                .finish_non_exhaustive(),
        }
    }
}

/// Tracks at most one pending continuation per conversation.
///
/// Cheap to clone; all clones share one table.
#[derive(Clone)]
pub struct DialogManager {
    inner: Arc<DialogTable>,
}

impl Default for DialogManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DialogManager {
    /// Creates an empty table whose entries never expire.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates an empty table whose entries are dropped once they are older
    /// than `expire_after`.
    pub fn with_expiry(expire_after: Duration) -> Self {
        Self::build(Some(expire_after))
    }

    fn build(expire_after: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(DialogTable {
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                expire_after,
            }),
        }
    }

    /// Registers `continuation` for the conversation `(group_id, sender_id)`.
    ///
    /// Any continuation already pending for that conversation is dropped
    /// without being invoked. Returns `true` if one was replaced.
    pub fn add_handler<H: Handler>(
        &self,
        group_id: Option<i64>,
        sender_id: Option<i64>,
        continuation: H,
    ) -> bool {
        self.add(
            ConversationKey::new(group_id, sender_id),
            into_continuation(continuation),
        )
    }

    /// Registers an already boxed continuation for `key`.
    pub fn add(&self, key: ConversationKey, continuation: Continuation) -> bool {
        self.insert(key, continuation).1
    }

    /// Inserts an entry and returns its id and whether it replaced another.
    pub(crate) fn insert(&self, key: ConversationKey, continuation: Continuation) -> (u64, bool) {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = DialogEntry {
            id,
            registered_at: Instant::now(),
            continuation,
        };

        let previous = self.inner.entries.lock().insert(key, entry);
        match &previous {
            Some(old) => debug!(
                %key,
                dialog_id = id,
                replaced = old.id,
                "Replaced pending dialog"
            ),
            None => debug!(%key, dialog_id = id, "Registered dialog"),
        }
        (id, previous.is_some())
    }

    /// Removes the entry pending for `key` only if it is the registration
    /// with id `dialog_id`.
    ///
    /// A newer registration for the same conversation is left alone.
    /// Returns `true` if the entry was removed.
    pub fn withdraw(&self, key: ConversationKey, dialog_id: u64) -> bool {
        let mut entries = self.inner.entries.lock();
        if entries.get(&key).is_none_or(|entry| entry.id != dialog_id) {
            return false;
        }
        entries.remove(&key);
        debug!(%key, dialog_id, "Withdrew dialog");
        true
    }

    /// Returns `true` if a live continuation is pending for `key`.
    pub fn is_pending(&self, key: ConversationKey) -> bool {
        self.inner
            .entries
            .lock()
            .get(&key)
            .is_some_and(|entry| !self.is_expired(entry))
    }

    /// Returns the number of entries in the table, expired ones included.
    pub fn pending_count(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Returns the id of the most recent registration, or 0.
    pub fn latest_id(&self) -> u64 {
        self.inner.next_id.load(Ordering::SeqCst)
    }

    /// Returns `true` if the entry pending for `key` was registered after the
    /// registration with id `since`.
    pub fn registered_since(&self, key: ConversationKey, since: u64) -> bool {
        self.inner
            .entries
            .lock()
            .get(&key)
            .is_some_and(|entry| entry.id > since)
    }

    /// Removes every expired entry. Returns how many were removed.
    ///
    /// Does nothing when no expiry is configured.
    pub fn purge_expired(&self) -> usize {
        if self.inner.expire_after.is_none() {
            return 0;
        }
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Purged expired dialogs");
        }
        removed
    }

    /// Atomically removes the live entry for `key`.
    fn take(&self, key: ConversationKey) -> Option<DialogEntry> {
        let entry = self.inner.entries.lock().remove(&key)?;
        if self.is_expired(&entry) {
            debug!(%key, dialog_id = entry.id, "Dropped expired dialog");
            return None;
        }
        Some(entry)
    }

    fn is_expired(&self, entry: &DialogEntry) -> bool {
        self.inner
            .expire_after
            .is_some_and(|ttl| entry.registered_at.elapsed() >= ttl)
    }

    /// Resumes the conversation `message` belongs to, if it has a pending
    /// continuation.
    ///
    /// The entry is removed before the continuation runs, so a continuation
    /// that wants another turn has to register a fresh one. A panicking
    /// continuation resolves to [`HandlerError::Panicked`].
    ///
    /// [`HandlerError::Panicked`]: chorus_core::HandlerError::Panicked
    pub async fn try_resolve(&self, message: Message) -> DialogResolution {
        let key = message.conversation_key();
        let Some(entry) = self.take(key) else {
            trace!(%key, "No pending dialog");
            return DialogResolution::NoDialog(message);
        };

        debug!(%key, dialog_id = entry.id, "Resuming dialog");
        let context = CommandContext::new(message, self.clone());
        let result = invoke_guarded((entry.continuation)(context.clone())).await;

        DialogResolution::Resolved {
            dialog_id: entry.id,
            result,
            context,
        }
    }
}

impl std::fmt::Debug for DialogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogManager")
            .field("pending", &self.pending_count())
            .field("expire_after", &self.inner.expire_after)
            .finish()
    }
}
