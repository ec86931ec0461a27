//! Inbound message sources.
//!
//! The runtime pulls batches of normalized [`Message`]s from a
//! [`MessageSource`]. Backends implement the trait on top of whatever they
//! poll; [`ChannelSource`] feeds messages pushed through a tokio channel and
//! is what tests and the demo use.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use chorus_core::Message;

/// Errors reported by a message source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source will never produce messages again.
    #[error("message source closed")]
    Closed,

    /// A single fetch failed; the runtime retries after the poll interval.
    #[error("failed to fetch messages: {0}")]
    Fetch(String),
}

impl SourceError {
    /// Creates a fetch error.
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }
}

/// A batch-oriented supplier of inbound messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Returns the messages that arrived since the last fetch.
    ///
    /// An empty batch means nothing is pending right now.
    async fn fetch(&self) -> Result<Vec<Message>, SourceError>;
}

/// The sending half of a [`ChannelSource`].
pub type MessageSender = mpsc::Sender<Message>;

/// A [`MessageSource`] backed by a bounded tokio channel.
///
/// Reports [`SourceError::Closed`] once every sender is dropped and the
/// buffer is drained.
#[derive(Debug)]
pub struct ChannelSource {
    rx: Mutex<mpsc::Receiver<Message>>,
    max_batch: usize,
}

impl ChannelSource {
    /// Default number of messages returned per fetch.
    pub const DEFAULT_BATCH: usize = 32;

    /// Creates a source and its sender with room for `capacity` messages.
    pub fn channel(capacity: usize) -> (MessageSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        let source = Self {
            rx: Mutex::new(rx),
            max_batch: Self::DEFAULT_BATCH,
        };
        (tx, source)
    }

    /// Caps the number of messages returned per fetch.
    pub fn max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn fetch(&self) -> Result<Vec<Message>, SourceError> {
        let mut rx = self.rx.lock().await;
        let mut batch = Vec::new();

        while batch.len() < self.max_batch {
            match rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) if batch.is_empty() => {
                    return Err(SourceError::Closed);
                }
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }

        Ok(batch)
    }
}
