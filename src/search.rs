//! Substring search across every stored conversation.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::store::SessionStore;
use crate::types::{Message, Sender, SessionId};

/// Default number of hits returned.
pub const DEFAULT_LIMIT: usize = 10;

/// Restricts which messages can match.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum SearchFilter {
    /// Every message.
    #[default]
    All,
    /// Messages the user wrote.
    User,
    /// Assistant replies.
    Assistant,
    /// Messages containing a fenced code block.
    Code,
}

impl SearchFilter {
    /// Returns true if `message` passes the filter.
    pub fn admits(self, message: &Message) -> bool {
        match self {
            SearchFilter::All => true,
            SearchFilter::User => message.sender == Sender::User,
            SearchFilter::Assistant => message.sender == Sender::Assistant,
            SearchFilter::Code => message.has_code_block(),
        }
    }
}

impl FromStr for SearchFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(SearchFilter::All),
            "user" => Ok(SearchFilter::User),
            "ai" | "assistant" => Ok(SearchFilter::Assistant),
            "code" => Ok(SearchFilter::Code),
            _ => Err(Error::validation(
                format!("unknown search filter {s:?} (use all, user, ai, or code)"),
                Some("filter".to_string()),
            )),
        }
    }
}

impl fmt::Display for SearchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchFilter::All => "all",
            SearchFilter::User => "user",
            SearchFilter::Assistant => "ai",
            SearchFilter::Code => "code",
        };
        f.write_str(name)
    }
}

/// What to look for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    /// Text to find, matched case-insensitively.
    pub text: String,
    /// Which messages may match.
    pub filter: SearchFilter,
    /// Maximum number of hits.
    pub limit: usize,
}

impl SearchQuery {
    /// Creates a query with the default filter and limit.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            filter: SearchFilter::All,
            limit: DEFAULT_LIMIT,
        }
    }

    /// Sets the filter.
    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the hit limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// One matching message.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Session holding the message.
    pub session_id: SessionId,
    /// Title of that session.
    pub session_title: String,
    /// True if the session is the current one.
    pub in_current_session: bool,
    /// The matching message.
    pub message: Message,
}

/// Searches every session.
///
/// Hits from `current` come first, newest message first within a session,
/// other sessions follow in most-recently-modified order.  An empty query
/// matches nothing.
pub fn search(
    store: &mut SessionStore,
    current: Option<&SessionId>,
    query: &SearchQuery,
) -> Vec<SearchHit> {
    let needle = query.text.trim().to_lowercase();
    if needle.is_empty() || query.limit == 0 {
        return Vec::new();
    }
    let mut current_hits = Vec::new();
    let mut other_hits = Vec::new();
    store.for_each_session(|summary, messages| {
        let in_current = current == Some(&summary.id);
        let hits = if in_current {
            &mut current_hits
        } else {
            &mut other_hits
        };
        for message in messages.iter().rev() {
            if query.filter.admits(message) && message.content.to_lowercase().contains(&needle) {
                hits.push(SearchHit {
                    session_id: summary.id.clone(),
                    session_title: summary.title.clone(),
                    in_current_session: in_current,
                    message: message.clone(),
                });
            }
        }
    });
    current_hits.extend(other_hits);
    current_hits.truncate(query.limit);
    current_hits
}

/// Cuts a one-line excerpt of about `width` characters around the first
/// case-insensitive occurrence of `needle`.
pub fn excerpt(content: &str, needle: &str, width: usize) -> String {
    let flat: Vec<char> = content.split_whitespace().collect::<Vec<_>>().join(" ").chars().collect();
    if flat.len() <= width {
        return flat.into_iter().collect();
    }
    let lowered: String = flat.iter().flat_map(|c| c.to_lowercase()).collect();
    // Lowercasing can change lengths; fall back to the start when it does.
    let center = if lowered.chars().count() == flat.len() {
        lowered
            .find(&needle.to_lowercase())
            .map(|byte| lowered[..byte].chars().count())
            .unwrap_or(0)
    } else {
        0
    };
    let start = center.saturating_sub(width / 2).min(flat.len() - width);
    let end = start + width;
    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.extend(&flat[start..end]);
    if end < flat.len() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn seeded() -> (SessionStore, SessionId, SessionId) {
        let mut store = SessionStore::open(MemoryStore::new());
        let old = store.create_session();
        store.append_message(&old, Message::user("How do I reverse a Vec?"));
        store.append_message(&old, Message::assistant("Use ```v.reverse()```"));
        let current = store.create_session();
        store.append_message(&current, Message::user("reverse a string"));
        store.append_message(&current, Message::assistant("Try chars().rev()"));
        (store, old, current)
    }

    #[test]
    fn current_session_hits_come_first() {
        let (mut store, old, current) = seeded();
        let hits = search(&mut store, Some(&current), &SearchQuery::new("REVERSE"));
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].session_id, current);
        assert!(hits[0].in_current_session);
        assert_eq!(hits[1].session_id, old);
        assert_eq!(hits[1].session_title, "How do I reverse a Vec?");
    }

    #[test]
    fn filters_restrict_matches() {
        let (mut store, _, current) = seeded();
        let code = search(
            &mut store,
            Some(&current),
            &SearchQuery::new("reverse").with_filter(SearchFilter::Code),
        );
        assert_eq!(code.len(), 1);
        assert!(code[0].message.has_code_block());

        let ai = search(
            &mut store,
            None,
            &SearchQuery::new("rev").with_filter("ai".parse().unwrap()),
        );
        assert!(ai.iter().all(|hit| hit.message.sender == Sender::Assistant));
        assert_eq!(ai.len(), 2);
    }

    #[test]
    fn limit_and_empty_query() {
        let (mut store, _, _) = seeded();
        assert_eq!(
            search(&mut store, None, &SearchQuery::new("reverse").with_limit(1)).len(),
            1
        );
        assert!(search(&mut store, None, &SearchQuery::new("   ")).is_empty());
    }

    #[test]
    fn unknown_filter_is_validation_error() {
        assert!("images".parse::<SearchFilter>().unwrap_err().is_validation());
        assert_eq!(SearchFilter::Assistant.to_string(), "ai");
    }

    #[test]
    fn excerpt_centers_on_match() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        assert_eq!(excerpt("short", "x", 20), "short");
        let cut = excerpt(text, "THETA", 16);
        assert!(cut.contains("theta"), "{cut}");
        assert!(cut.starts_with("..."));
    }
}
