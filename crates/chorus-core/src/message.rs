//! Normalized inbound messages.
//!
//! A [`Message`] is an immutable snapshot produced by the ingestion side from
//! whatever the chat backend delivered. The routing core only ever looks at
//! the fields defined here, so it stays agnostic to the wire format.
//!
//! # Message types
//!
//! [`MessageType`] doubles as a single message's type tag and as the
//! allowed-type mask of a command declaration:
//!
//! ```rust,ignore
//! use chorus_core::MessageType;
//!
//! let mask = MessageType::GROUP | MessageType::FRIEND;
//! assert!(mask.intersects(MessageType::GROUP));
//! assert!(!mask.intersects(MessageType::TEMP));
//! ```

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ReplyResult;
use crate::reply::{BoxedReply, DiscardReply, ReplyContent};

// ============================================================================
// MessageType
// ============================================================================

/// Message type tag / allowed-type bitmask.
///
/// Single messages carry exactly one bit, or [`MessageType::UNSET`] when the
/// ingestion side could not classify them. Masks combine bits with `|`.
///
/// In configuration files the type is written as a list of names:
///
/// ```toml
/// reply_unrecognized = ["friend", "temp", "stranger"]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct MessageType(u8);

impl MessageType {
    /// No type information. Matches every declaration mask.
    pub const UNSET: Self = Self(0);
    /// Message sent in a group chat.
    pub const GROUP: Self = Self(0b0001);
    /// Private message from a friend.
    pub const FRIEND: Self = Self(0b0010);
    /// Temporary session started from a group.
    pub const TEMP: Self = Self(0b0100);
    /// Private message from a non-friend.
    pub const STRANGER: Self = Self(0b1000);
    /// Every concrete type.
    pub const ALL: Self = Self(0b1111);

    const NAMES: [(Self, &'static str); 4] = [
        (Self::GROUP, "group"),
        (Self::FRIEND, "friend"),
        (Self::TEMP, "temp"),
        (Self::STRANGER, "stranger"),
    ];

    /// Returns the raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` for the unset (zero) value.
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }

    /// Returns the union of two values. Usable in constant contexts.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns `true` if the two values share at least one bit.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns `true` if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Decides whether a declaration mask admits a message of type `message`.
    ///
    /// A zero mask admits every type, and an unset message type is admitted by
    /// every mask.
    pub const fn admits(self, message: Self) -> bool {
        self.is_unset() || message.is_unset() || self.intersects(message)
    }

    /// Returns the lowercase names of the bits set in this value.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(ty, _)| self.contains(*ty))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for MessageType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MessageType {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "unset" => Ok(Self::UNSET),
            "all" => Ok(Self::ALL),
            "private" => Ok(Self::FRIEND | Self::TEMP | Self::STRANGER),
            other => Self::NAMES
                .iter()
                .find(|(_, name)| *name == other)
                .map(|(ty, _)| *ty)
                .ok_or_else(|| format!("unknown message type '{s}'")),
        }
    }
}

impl TryFrom<Vec<String>> for MessageType {
    type Error = String;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        names.iter().try_fold(Self::UNSET, |acc, name| {
            name.parse::<Self>().map(|ty| acc | ty)
        })
    }
}

impl From<MessageType> for Vec<String> {
    fn from(ty: MessageType) -> Self {
        ty.names().into_iter().map(str::to_string).collect()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unset() {
            return f.write_str("unset");
        }
        f.write_str(&self.names().join("|"))
    }
}

// ============================================================================
// ConversationKey
// ============================================================================

/// Identity of one conversation: the group it happens in (if any) and the
/// participant who is talking.
///
/// A follow-up message is correlated with a pending dialog only when both
/// halves are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ConversationKey {
    /// Group id, `None` for private conversations.
    pub group_id: Option<i64>,
    /// Sender id, `None` when the backend did not report one.
    pub sender_id: Option<i64>,
}

impl ConversationKey {
    /// Creates a key from its two halves.
    pub const fn new(group_id: Option<i64>, sender_id: Option<i64>) -> Self {
        Self {
            group_id,
            sender_id,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.group_id, self.sender_id) {
            (Some(g), Some(s)) => write!(f, "{g}/{s}"),
            (Some(g), None) => write!(f, "{g}/-"),
            (None, Some(s)) => write!(f, "-/{s}"),
            (None, None) => f.write_str("-/-"),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// An immutable snapshot of one inbound message.
///
/// Routing never mutates a message; [`with_command`](Self::with_command)
/// returns a new snapshot carrying the residual text instead. Cloning is
/// cheap apart from the command text.
#[derive(Clone, Serialize)]
pub struct Message {
    #[serde(rename = "type")]
    message_type: MessageType,
    command: String,
    sender_id: Option<i64>,
    sender_name: Option<String>,
    group_id: Option<i64>,
    #[serde(skip)]
    reply: BoxedReply,
}

impl Message {
    /// Creates a message with no sender, no group and a reply capability that
    /// discards everything.
    pub fn new(message_type: MessageType, command: impl Into<String>) -> Self {
        Self {
            message_type,
            command: command.into(),
            sender_id: None,
            sender_name: None,
            group_id: None,
            reply: Arc::new(DiscardReply),
        }
    }

    /// Sets the sender id.
    pub fn sender(mut self, sender_id: i64) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    /// Sets the sender display name.
    pub fn sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    /// Sets the group id.
    pub fn group(mut self, group_id: i64) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Sets the reply capability.
    pub fn reply_with(mut self, reply: BoxedReply) -> Self {
        self.reply = reply;
        self
    }

    /// Returns a copy of this snapshot carrying a different command text.
    pub fn with_command(&self, command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..self.clone()
        }
    }

    /// Returns the type tag.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Returns the command text.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the sender id.
    pub fn sender_id(&self) -> Option<i64> {
        self.sender_id
    }

    /// Returns the sender display name.
    pub fn sender_display_name(&self) -> Option<&str> {
        self.sender_name.as_deref()
    }

    /// Returns the group id.
    pub fn group_id(&self) -> Option<i64> {
        self.group_id
    }

    /// Returns the conversation this message belongs to.
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(self.group_id, self.sender_id)
    }

    /// Returns the reply capability.
    pub fn replier(&self) -> &BoxedReply {
        &self.reply
    }

    /// Sends content back to the conversation this message came from.
    pub async fn reply(&self, content: impl Into<ReplyContent>) -> ReplyResult<()> {
        self.reply.send(content.into()).await
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("message_type", &self.message_type)
            .field("command", &self.command)
            .field("sender_id", &self.sender_id)
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_zero_mask_and_unset_message() {
        assert!(MessageType::UNSET.admits(MessageType::TEMP));
        assert!(MessageType::GROUP.admits(MessageType::UNSET));
        assert!(MessageType::GROUP.admits(MessageType::GROUP));
        assert!(!MessageType::GROUP.admits(MessageType::FRIEND));
    }

    #[test]
    fn test_parse_names() {
        let ty: MessageType = "Friend".parse().unwrap();
        assert_eq!(ty, MessageType::FRIEND);

        let private: MessageType = "private".parse().unwrap();
        assert!(private.contains(MessageType::STRANGER));
        assert!(!private.contains(MessageType::GROUP));

        assert!("channel".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_serde_as_name_list() {
        let ty = MessageType::GROUP | MessageType::TEMP;
        let json = serde_json::to_string(&ty).unwrap();
        assert_eq!(json, r#"["group","temp"]"#);

        let back: MessageType = serde_json::from_str(r#"["temp","group"]"#).unwrap();
        assert_eq!(back, ty);
    }

    #[test]
    fn test_with_command_keeps_identity() {
        let msg = Message::new(MessageType::GROUP, "summary base 10")
            .group(42)
            .sender(7);
        let residual = msg.with_command("base 10");

        assert_eq!(msg.command(), "summary base 10");
        assert_eq!(residual.command(), "base 10");
        assert_eq!(residual.conversation_key(), msg.conversation_key());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ConversationKey::new(Some(1), Some(2)).to_string(), "1/2");
        assert_eq!(ConversationKey::new(None, Some(2)).to_string(), "-/2");
    }
}
