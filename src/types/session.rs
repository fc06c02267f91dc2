use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{Message, Sender, SessionId};

/// Title shown for sessions without a user message.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Preview shown for sessions without a user message.
pub const DEFAULT_PREVIEW: &str = "No messages yet";

const TITLE_CHARS: usize = 40;
const PREVIEW_CHARS: usize = 80;

/// Denormalized metadata about a session, used for history lists.
///
/// A summary is always derived from the session's message log; see
/// [`SessionSummary::refresh`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// The session this summary describes.
    pub id: SessionId,

    /// Display title derived from the first user message.
    pub title: String,

    /// Short preview derived from the first user message.
    pub preview: String,

    /// Creation time of the session.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// Time of the last mutation.
    #[serde(with = "crate::utils::time")]
    pub last_modified: OffsetDateTime,

    /// Number of persisted messages.
    pub message_count: usize,
}

impl SessionSummary {
    /// Creates the summary of an empty session.
    pub fn new(id: SessionId, at: OffsetDateTime) -> Self {
        Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            preview: DEFAULT_PREVIEW.to_string(),
            created_at: at,
            last_modified: at,
            message_count: 0,
        }
    }

    /// Re-derives title, preview and count from `messages` and stamps the
    /// modification time.
    pub fn refresh(&mut self, messages: &[Message], at: OffsetDateTime) {
        self.title = derive_title(messages);
        self.preview = derive_preview(messages);
        self.message_count = messages.len();
        self.last_modified = at;
    }
}

/// Derives a session title from its first user message.
pub fn derive_title(messages: &[Message]) -> String {
    match first_user_text(messages) {
        Some(text) => {
            let first_line = text.lines().next().unwrap_or_default().trim();
            truncate_chars(first_line, TITLE_CHARS)
        }
        None => DEFAULT_TITLE.to_string(),
    }
}

/// Derives a session preview from its first user message.
pub fn derive_preview(messages: &[Message]) -> String {
    match first_user_text(messages) {
        Some(text) => {
            let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
            truncate_chars(&collapsed, PREVIEW_CHARS)
        }
        None => DEFAULT_PREVIEW.to_string(),
    }
}

fn first_user_text(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .find(|m| m.sender == Sender::User && !m.content.trim().is_empty())
        .map(|m| m.content.trim())
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(limit).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_without_user_message() {
        let messages = vec![Message::system("welcome")];
        assert_eq!(derive_title(&messages), DEFAULT_TITLE);
        assert_eq!(derive_preview(&messages), DEFAULT_PREVIEW);
        assert_eq!(derive_title(&[]), DEFAULT_TITLE);
    }

    #[test]
    fn title_uses_first_line_of_first_user_message() {
        let messages = vec![
            Message::system("welcome"),
            Message::user("Fix the parser\nIt breaks on tabs"),
            Message::user("second question"),
        ];
        assert_eq!(derive_title(&messages), "Fix the parser");
        assert_eq!(derive_preview(&messages), "Fix the parser It breaks on tabs");
    }

    #[test]
    fn long_titles_are_truncated_on_char_boundaries() {
        let text = "é".repeat(60);
        let title = derive_title(&[Message::user(text)]);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), TITLE_CHARS + 3);
    }

    #[test]
    fn refresh_tracks_count_and_time() {
        let start = crate::utils::time::now();
        let mut summary = SessionSummary::new(SessionId::from("s"), start);
        let later = start + time::Duration::seconds(5);
        summary.refresh(&[Message::user("hello")], later);
        assert_eq!(summary.title, "hello");
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.last_modified, later);
        assert_eq!(summary.created_at, start);
    }
}
