//! Message types observed on source feeds.
//!
//! A [`CandidateMessage`] is the engine's view of a single post in a source
//! channel. It is produced by an ingestion adapter and never mutated after
//! it has been observed; a later observation of the same post (for example
//! after an edit) arrives as a fresh value.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a channel (feed) on the chat platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

/// Identifier of a message on the chat platform.
///
/// Platform identifiers are time-ordered, so a larger id was created later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChannelId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A file attached to a source message.
///
/// The content is held as [`Bytes`] so that one download can be handed to
/// every destination without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Original filename, reused for every relayed copy
    pub filename: String,
    /// Whether the file is hidden behind a spoiler
    pub spoiler: bool,
    /// Size of the file in bytes as reported by the platform
    pub size: u64,
    /// Raw file content
    pub content: Bytes,
}

impl Attachment {
    pub fn new(filename: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            filename: filename.into(),
            spoiler: false,
            size: content.len() as u64,
            content,
        }
    }

    pub fn spoiler(mut self, spoiler: bool) -> Self {
        self.spoiler = spoiler;
        self
    }
}

/// A message observed in a source feed, eligible for relay evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMessage {
    /// Unique identifier of the message on the platform
    pub id: MessageId,
    /// Channel the message was posted in
    pub channel: ChannelId,
    /// Text body, possibly empty
    pub text: String,
    /// First attachment of the message, if any
    pub attachment: Option<Attachment>,
    /// Creation time reported by the platform
    pub created_at: DateTime<Utc>,
}

impl CandidateMessage {
    pub fn new(id: impl Into<MessageId>, channel: impl Into<ChannelId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel: channel.into(),
            text: text.into(),
            attachment: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn has_attachment(&self) -> bool {
        self.attachment.is_some()
    }

    /// Text to relay, trimmed of surrounding whitespace.
    pub fn relay_text(&self) -> &str {
        self.text.trim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_size_from_content() {
        let attachment = Attachment::new("a.png", vec![0u8; 100]);
        assert_eq!(attachment.size, 100);
        assert!(!attachment.spoiler);
        assert!(attachment.spoiler(true).spoiler);
    }

    #[test]
    fn test_relay_text_is_trimmed() {
        let msg = CandidateMessage::new(1, 2, "  ch1 out \n");
        assert_eq!(msg.relay_text(), "ch1 out");
        assert!(!msg.has_attachment());
    }

    #[test]
    fn test_ids_display_as_integers() {
        assert_eq!(ChannelId(863803391239127090).to_string(), "863803391239127090");
        assert_eq!(MessageId(7).to_string(), "7");
        assert!(MessageId(7) < MessageId(8));
    }
}
