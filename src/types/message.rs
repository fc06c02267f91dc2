use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::MessageId;
use crate::utils::time::now;

/// Who authored a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// Text typed by the person using the client.
    User,

    /// Text produced by the AI backend.
    Assistant,

    /// Notices produced by the client itself: command output, errors.
    System,
}

impl Sender {
    /// Display label used in transcripts and exports.
    pub fn label(self) -> &'static str {
        match self {
            Sender::User => "You",
            Sender::Assistant => "Codeius AI",
            Sender::System => "System",
        }
    }
}

/// Lifecycle status of a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Complete and persisted.
    Final,

    /// An assistant reply still receiving tokens.
    Streaming,

    /// A message that failed to be produced or delivered.
    Error,
}

/// A single entry in a session's message log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message id.
    pub id: MessageId,

    /// Author of the message.
    pub sender: Sender,

    /// Message text; may embed fenced code blocks.
    pub content: String,

    /// Creation time.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// Lifecycle status.
    pub status: MessageStatus,
}

impl Message {
    /// Creates a new final message with a fresh id.
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            sender,
            content: content.into(),
            created_at: now(),
            status: MessageStatus::Final,
        }
    }

    /// Creates a final user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content)
    }

    /// Creates a final assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, content)
    }

    /// Creates a final system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Sender::System, content)
    }

    /// Creates an empty assistant message in `streaming` status.
    pub fn streaming_placeholder() -> Self {
        Self {
            status: MessageStatus::Streaming,
            ..Self::new(Sender::Assistant, String::new())
        }
    }

    /// Returns true while the message is still receiving tokens.
    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }

    /// Returns true if the content contains a fenced code block.
    pub fn has_code_block(&self) -> bool {
        self.content.contains("```")
    }

    /// Applies a patch in place.
    pub fn apply(&mut self, patch: &MessagePatch) {
        if let Some(content) = &patch.content {
            self.content.clone_from(content);
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
    }
}

/// A partial update to a message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    /// Replacement content.
    pub content: Option<String>,

    /// Replacement status.
    pub status: Option<MessageStatus>,
}

impl MessagePatch {
    /// A patch that replaces the content.
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            status: None,
        }
    }

    /// A patch that replaces the status.
    pub fn status(status: MessageStatus) -> Self {
        Self {
            content: None,
            status: Some(status),
        }
    }
}
