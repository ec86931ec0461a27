//! Trigger matching for command nodes.
//!
//! A [`Trigger`] decides whether a command text, arriving in a message of a
//! given type, addresses one command node, and if so which part of the text
//! is left over as arguments (the *residual*).
//!
//! # Matching rules
//!
//! 1. The declaration's type mask must admit the message type (a zero mask
//!    admits everything, an unset message type is admitted by every mask).
//! 2. An empty pattern list matches any text; the residual is the trimmed text.
//! 3. Otherwise the text is trimmed and patterns are tried in declaration
//!    order. Prefix mode needs the text to start with the pattern, exact mode
//!    needs equality. The first hit wins and the residual is whatever follows
//!    the pattern, left-trimmed.
//!
//! Declaration order is the only tie-break: a shorter alias declared first
//! shadows a longer one declared after it.
//!
//! ```rust,ignore
//! use chorus_framework::Trigger;
//!
//! let trigger = Trigger::new(["summary", "sum"]);
//! assert_eq!(trigger.try_match("SUM base 13", &msg), Some("base 13"));
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use chorus_core::{Message, MessageType};

/// How pattern characters are compared with command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Comparison {
    /// Characters must be identical.
    Ordinal,
    /// Characters are compared through their one-to-one uppercase mapping.
    /// Characters whose uppercase form is longer than one char, such as
    /// `ß`, only match themselves.
    #[default]
    OrdinalIgnoreCase,
}

/// Whether a pattern must cover the whole text or only its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMode {
    /// The text must start with the pattern.
    #[default]
    Prefix,
    /// The text must equal the pattern.
    Exact,
}

/// A custom predicate replacing literal matching.
///
/// Receives the current (untrimmed) command text and the message snapshot.
pub type TriggerPredicate = Arc<dyn Fn(&str, &Message) -> bool + Send + Sync>;

/// A declared matching rule attached to a command node.
#[derive(Clone)]
pub struct Trigger {
    patterns: Vec<String>,
    types: MessageType,
    comparison: Comparison,
    mode: MatchMode,
    predicate: Option<TriggerPredicate>,
}

impl Trigger {
    /// The type mask used when a declaration does not set one.
    pub const DEFAULT_TYPES: MessageType = MessageType::GROUP.union(MessageType::FRIEND);

    /// Creates a prefix, case-insensitive trigger for group and friend
    /// messages.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            types: Self::DEFAULT_TYPES,
            comparison: Comparison::default(),
            mode: MatchMode::default(),
            predicate: None,
        }
    }

    /// Creates a trigger with no patterns, matching any text.
    pub fn any() -> Self {
        Self::new(Vec::<String>::new())
    }

    /// Creates a trigger whose applicability is decided by `predicate`
    /// instead of literal patterns.
    ///
    /// The type mask is still checked before the predicate runs.
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&str, &Message) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Some(Arc::new(predicate)),
            ..Self::any()
        }
    }

    /// Sets the allowed message types.
    pub fn types(mut self, types: MessageType) -> Self {
        self.types = types;
        self
    }

    /// Sets the comparison mode.
    pub fn comparison(mut self, comparison: Comparison) -> Self {
        self.comparison = comparison;
        self
    }

    /// Switches between exact (`true`) and prefix (`false`) matching.
    pub fn strict(mut self, strict: bool) -> Self {
        self.mode = if strict {
            MatchMode::Exact
        } else {
            MatchMode::Prefix
        };
        self
    }

    /// Returns the declared patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Returns the allowed message types.
    pub fn allowed_types(&self) -> MessageType {
        self.types
    }

    /// Returns the match mode.
    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Returns `true` if a custom predicate replaces literal matching.
    pub fn is_custom(&self) -> bool {
        self.predicate.is_some()
    }

    /// Tries to match `text`, taken from `message`, against this trigger.
    ///
    /// Returns the residual text on success. The residual always borrows from
    /// `text`, so the caller keeps the original casing.
    pub fn try_match<'t>(&self, text: &'t str, message: &Message) -> Option<&'t str> {
        if !self.types.admits(message.message_type()) {
            return None;
        }

        if let Some(predicate) = &self.predicate {
            return predicate(text, message).then(|| text.trim());
        }

        let trimmed = text.trim();
        if self.patterns.is_empty() {
            return Some(trimmed);
        }

        self.patterns
            .iter()
            .find_map(|pattern| self.strip(trimmed, pattern))
            .map(str::trim_start)
    }

    fn strip<'t>(&self, text: &'t str, pattern: &str) -> Option<&'t str> {
        let rest = match self.comparison {
            Comparison::Ordinal => text.strip_prefix(pattern),
            Comparison::OrdinalIgnoreCase => strip_prefix_ignore_case(text, pattern),
        }?;

        match self.mode {
            MatchMode::Prefix => Some(rest),
            MatchMode::Exact => rest.is_empty().then_some(rest),
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("patterns", &self.patterns)
            .field("types", &self.types)
            .field("comparison", &self.comparison)
            .field("mode", &self.mode)
            .field("custom", &self.predicate.is_some())
            .finish()
    }
}

/// Strips `prefix` from `text` comparing characters case-insensitively.
///
/// Walks both strings char by char so the returned slice starts on a char
/// boundary of `text` even when case mapping pairs chars of different byte lengths.
fn strip_prefix_ignore_case<'t>(text: &'t str, prefix: &str) -> Option<&'t str> {
    let mut chars = text.char_indices();
    for expected in prefix.chars() {
        let (_, actual) = chars.next()?;
        if !chars_eq_ignore_case(actual, expected) {
            return None;
        }
    }
    let offset = chars.next().map_or(text.len(), |(i, _)| i);
    Some(&text[offset..])
}

fn chars_eq_ignore_case(a: char, b: char) -> bool {
    a == b || simple_upper(a) == simple_upper(b)
}

/// Uppercases `c` when the mapping is a single char, otherwise returns `c`.
fn simple_upper(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}
