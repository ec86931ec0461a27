//! The reply capability carried by every message.
//!
//! The core never talks to the chat backend directly. Whatever produced a
//! [`Message`](crate::Message) attaches a [`Reply`] implementation that knows
//! how to send content back to the originating conversation.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::ReplyResult;

/// Content that can be sent back to a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyContent {
    /// Plain text.
    Text(String),
    /// A base64-encoded image.
    Image {
        /// The encoded image data.
        base64: String,
    },
}

impl ReplyContent {
    /// Creates an image reply from base64 data.
    pub fn image(base64: impl Into<String>) -> Self {
        Self::Image {
            base64: base64.into(),
        }
    }

    /// Returns the text if this is a text reply.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Image { .. } => None,
        }
    }
}

impl From<String> for ReplyContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ReplyContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Sends content back to the conversation a message came from.
#[async_trait]
pub trait Reply: Send + Sync {
    /// Sends one piece of content.
    async fn send(&self, content: ReplyContent) -> ReplyResult<()>;
}

/// A shareable reply capability.
pub type BoxedReply = Arc<dyn Reply>;

/// Reply capability that drops everything. Used when the ingestion side did
/// not attach one.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardReply;

#[async_trait]
impl Reply for DiscardReply {
    async fn send(&self, content: ReplyContent) -> ReplyResult<()> {
        debug!(?content, "Discarding reply, message has no reply capability");
        Ok(())
    }
}

/// Reply capability that records everything it is asked to send.
///
/// Useful in tests and in local consoles that print replies afterwards.
#[derive(Debug, Default)]
pub struct RecordingReply {
    sent: Mutex<Vec<ReplyContent>>,
}

impl RecordingReply {
    /// Creates an empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns everything sent so far.
    pub fn sent(&self) -> Vec<ReplyContent> {
        self.sent.lock().clone()
    }

    /// Returns the text replies sent so far.
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|c| c.as_text().map(str::to_string))
            .collect()
    }

    /// Drains and returns everything sent so far.
    pub fn take(&self) -> Vec<ReplyContent> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl Reply for RecordingReply {
    async fn send(&self, content: ReplyContent) -> ReplyResult<()> {
        self.sent.lock().push(content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Message, MessageType};

    #[tokio::test]
    async fn test_recording_reply_through_message() {
        let recorder = RecordingReply::new();
        let msg = Message::new(MessageType::FRIEND, "ping").reply_with(recorder.clone());

        msg.reply("pong").await.unwrap();
        msg.reply(ReplyContent::image("aGVsbG8=")).await.unwrap();

        assert_eq!(recorder.texts(), vec!["pong".to_string()]);
        assert_eq!(recorder.sent().len(), 2);
        assert_eq!(recorder.take().len(), 2);
        assert!(recorder.sent().is_empty());
    }
}
