//! The session store: an in-memory registry of sessions backed by a
//! write-through [`PersistenceAdapter`].
//!
//! The store keeps three kinds of records in the adapter:
//!
//! - the session index (`codeius_sessions`), one [`SessionSummary`] per session;
//! - the current session pointer (`codeius_current_session`);
//! - one message log per session (`codeius_messages_<id>`).
//!
//! Every mutation updates the in-memory message log and the matching index
//! entry together, then writes both through before returning.  Write
//! failures are logged and counted; the in-memory state stays authoritative
//! so the conversation remains usable when storage is not.
//!
//! A document that failed to read is never overwritten with the partial
//! in-memory copy.  The read is retried before the next write, and what was
//! stored is merged with what was added in the meantime.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::observability::{
    MESSAGES_APPENDED, PERSISTENCE_ERRORS, PERSISTENCE_WRITES, SESSIONS_CREATED, SESSIONS_DELETED,
};
use crate::persistence::PersistenceAdapter;
use crate::types::{Message, MessageId, MessagePatch, SessionId, SessionSummary};
use crate::utils::time::now;

/// Key of the session index document.
pub const INDEX_KEY: &str = "codeius_sessions";

/// Key of the current session pointer.
pub const CURRENT_SESSION_KEY: &str = "codeius_current_session";

const MESSAGES_KEY_PREFIX: &str = "codeius_messages_";
const FORMAT_VERSION: u8 = 1;
const UNREADABLE_SUFFIX: &str = "_unreadable";

/// Returns the storage key of a session's message log.
pub fn messages_key(id: &SessionId) -> String {
    format!("{MESSAGES_KEY_PREFIX}{id}")
}

/// Registry of sessions and their message logs.
pub struct SessionStore {
    adapter: Box<dyn PersistenceAdapter>,
    index: HashMap<SessionId, SessionSummary>,
    logs: HashMap<SessionId, Vec<Message>>,
    current: Option<SessionId>,
    // The stored index could not be read.  It is merged in before the next
    // index write and never overwritten while unread.
    index_unread: bool,
    // Sessions deleted while the stored index was unread.
    deleted_unread: HashSet<SessionId>,
    // Sessions whose stored log could not be read.  Their cached log holds
    // only the messages added since.
    unread_logs: HashSet<SessionId>,
    current_unread: bool,
}

impl SessionStore {
    /// Opens a store over `adapter`, loading the index and current pointer.
    ///
    /// Opening never fails.  A missing document starts empty.  A document
    /// that cannot be read is retried before it would be overwritten, and a
    /// corrupt one is copied aside under `<key>_unreadable` first.
    pub fn open(adapter: impl PersistenceAdapter + 'static) -> Self {
        let adapter: Box<dyn PersistenceAdapter> = Box::new(adapter);
        let (index, index_unread) = match read_document::<IndexFile>(adapter.as_ref(), INDEX_KEY) {
            Stored::Found(file) => (
                file.sessions
                    .into_iter()
                    .map(|summary| (summary.id.clone(), summary))
                    .collect(),
                false,
            ),
            Stored::Absent => (HashMap::new(), false),
            Stored::Unreadable => (HashMap::new(), true),
        };
        let (current, current_unread) = match read_current(adapter.as_ref()) {
            Stored::Found(id) => (Some(id), false),
            Stored::Absent => (None, false),
            Stored::Unreadable => (None, true),
        };
        Self {
            adapter,
            index,
            logs: HashMap::new(),
            current,
            index_unread,
            deleted_unread: HashSet::new(),
            unread_logs: HashSet::new(),
            current_unread,
        }
    }

    /// Allocates a new empty session, makes it current, and returns its id.
    pub fn create_session(&mut self) -> SessionId {
        let id = SessionId::generate();
        self.index
            .insert(id.clone(), SessionSummary::new(id.clone(), now()));
        self.logs.insert(id.clone(), Vec::new());
        self.current = Some(id.clone());
        self.current_unread = false;
        SESSIONS_CREATED.click();
        tracing::debug!(session = %id, "created session");

        self.write_messages(&id);
        self.write_index();
        self.write_current();
        id
    }

    /// Returns the current session id, creating a session if none is set.
    pub fn current_session_id(&mut self) -> SessionId {
        if self.current.is_none() && self.current_unread {
            match read_current(self.adapter.as_ref()) {
                Stored::Found(id) => {
                    self.current = Some(id);
                    self.current_unread = false;
                }
                Stored::Absent => self.current_unread = false,
                Stored::Unreadable => {}
            }
        }
        match &self.current {
            Some(id) => id.clone(),
            None => self.create_session(),
        }
    }

    /// Returns the current session id without creating one.
    pub fn peek_current_session_id(&self) -> Option<&SessionId> {
        self.current.as_ref()
    }

    /// Switches the current session pointer.
    ///
    /// The id is not validated; a session that does not exist simply has an
    /// empty message log.
    pub fn set_current_session_id(&mut self, id: SessionId) {
        self.current = Some(id);
        self.current_unread = false;
        self.write_current();
    }

    /// Returns all session summaries, most recently modified first.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> = self.index.values().cloned().collect();
        sessions.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        sessions
    }

    /// Returns the summary of one session.
    pub fn summary(&self, id: &SessionId) -> Option<&SessionSummary> {
        self.index.get(id)
    }

    /// Returns true if the session is registered in the index.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.index.contains_key(id)
    }

    /// Finds sessions whose id starts with `prefix`.
    pub fn resolve_prefix(&self, prefix: &str) -> Vec<SessionId> {
        let mut matches: Vec<SessionId> = self
            .index
            .keys()
            .filter(|id| id.as_str().starts_with(prefix))
            .cloned()
            .collect();
        matches.sort();
        matches
    }

    /// Returns the messages of a session; empty if nothing was persisted.
    pub fn load_messages(&mut self, id: &SessionId) -> Vec<Message> {
        self.log(id).clone()
    }

    /// Replaces the full message log of a session.
    pub fn save_session_messages(&mut self, id: &SessionId, messages: Vec<Message>) {
        self.unread_logs.remove(id);
        self.logs.insert(id.clone(), messages);
        self.commit(id);
    }

    /// Appends a message to a session's log.
    pub fn append_message(&mut self, id: &SessionId, message: Message) {
        tracing::trace!(session = %id, message_id = %message.id, sender = ?message.sender, "append");
        self.log(id).push(message);
        MESSAGES_APPENDED.click();
        self.commit(id);
    }

    /// Applies `patch` to one message and returns the updated message.
    pub fn replace_message(
        &mut self,
        id: &SessionId,
        message_id: &MessageId,
        patch: &MessagePatch,
    ) -> Result<Message> {
        let log = self.log(id);
        let Some(message) = log.iter_mut().find(|m| &m.id == message_id) else {
            return Err(message_not_found(message_id));
        };
        message.apply(patch);
        let updated = message.clone();
        self.commit(id);
        Ok(updated)
    }

    /// Removes one message and returns it.
    pub fn delete_message(&mut self, id: &SessionId, message_id: &MessageId) -> Result<Message> {
        let log = self.log(id);
        let Some(position) = log.iter().position(|m| &m.id == message_id) else {
            return Err(message_not_found(message_id));
        };
        let removed = log.remove(position);
        self.commit(id);
        Ok(removed)
    }

    /// Removes every message of a session, keeping the session itself.
    pub fn clear_messages(&mut self, id: &SessionId) {
        self.unread_logs.remove(id);
        self.logs.insert(id.clone(), Vec::new());
        self.commit(id);
    }

    /// Deletes a session and its messages.
    ///
    /// If the session was current the pointer is cleared, so the next call to
    /// [`SessionStore::current_session_id`] creates a fresh session.  Returns
    /// true if the session was known.
    pub fn delete_session(&mut self, id: &SessionId) -> bool {
        let existed = self.index.remove(id).is_some();
        if self.index_unread {
            self.deleted_unread.insert(id.clone());
        }
        self.logs.remove(id);
        self.unread_logs.remove(id);
        self.persist(&messages_key(id), self.adapter.remove(&messages_key(id)));
        self.write_index();
        if self.current.as_ref() == Some(id) {
            self.current = None;
            self.current_unread = false;
            self.persist(
                CURRENT_SESSION_KEY,
                self.adapter.remove(CURRENT_SESSION_KEY),
            );
        }
        if existed {
            SESSIONS_DELETED.click();
            tracing::debug!(session = %id, "deleted session");
        }
        existed
    }

    /// Iterates over every session's messages, loading logs as needed.
    ///
    /// Only the current session's log stays cached afterwards.
    pub fn for_each_session<F>(&mut self, mut f: F)
    where
        F: FnMut(&SessionSummary, &[Message]),
    {
        let summaries = self.list_sessions();
        for summary in &summaries {
            f(summary, self.log(&summary.id));
        }
        let current = self.current.as_ref();
        let unread = &self.unread_logs;
        self.logs
            .retain(|id, _| Some(id) == current || unread.contains(id));
    }

    fn log(&mut self, id: &SessionId) -> &mut Vec<Message> {
        if !self.logs.contains_key(id) || self.unread_logs.contains(id) {
            self.load_log(id);
        }
        self.logs.entry(id.clone()).or_default()
    }

    fn load_log(&mut self, id: &SessionId) {
        let mut messages =
            match read_document::<MessagesFile>(self.adapter.as_ref(), &messages_key(id)) {
                Stored::Found(file) => file.messages,
                Stored::Absent => Vec::new(),
                Stored::Unreadable => {
                    self.unread_logs.insert(id.clone());
                    self.logs.entry(id.clone()).or_default();
                    return;
                }
            };
        let added = self.logs.remove(id).unwrap_or_default();
        let recovered = self.unread_logs.remove(id) && !added.is_empty();
        for message in added {
            if !messages.iter().any(|m| m.id == message.id) {
                messages.push(message);
            }
        }
        self.logs.insert(id.clone(), messages);
        if recovered {
            tracing::info!(session = %id, "merged messages added while the log was unreadable");
            self.commit(id);
        }
    }

    fn commit(&mut self, id: &SessionId) {
        if self.unread_logs.contains(id) {
            PERSISTENCE_ERRORS.click();
            tracing::warn!(session = %id, "stored log is unreadable; holding changes in memory");
            return;
        }
        let at = now();
        let messages = self.logs.get(id).map(Vec::as_slice).unwrap_or_default();
        self.index
            .entry(id.clone())
            .or_insert_with(|| SessionSummary::new(id.clone(), at))
            .refresh(messages, at);
        self.write_messages(id);
        self.write_index();
    }

    fn write_messages(&self, id: &SessionId) {
        let key = messages_key(id);
        let messages = self.logs.get(id).map(Vec::as_slice).unwrap_or_default();
        let file = MessagesFileRef {
            version: FORMAT_VERSION,
            messages,
        };
        let result = serde_json::to_vec(&file)
            .map_err(Error::from)
            .and_then(|bytes| self.adapter.set(&key, &bytes));
        self.persist(&key, result);
    }

    fn write_index(&mut self) {
        if !self.reload_index() {
            PERSISTENCE_ERRORS.click();
            tracing::warn!(key = INDEX_KEY, "stored index is unreadable; not overwriting it");
            return;
        }
        let file = IndexFile {
            version: FORMAT_VERSION,
            sessions: self.list_sessions(),
        };
        let result = serde_json::to_vec(&file)
            .map_err(Error::from)
            .and_then(|bytes| self.adapter.set(INDEX_KEY, &bytes));
        self.persist(INDEX_KEY, result);
    }

    /// Merges the stored index into memory if it was unread at open.
    ///
    /// Returns false while it still cannot be read.
    fn reload_index(&mut self) -> bool {
        if !self.index_unread {
            return true;
        }
        let stored = match read_document::<IndexFile>(self.adapter.as_ref(), INDEX_KEY) {
            Stored::Found(file) => file.sessions,
            Stored::Absent => Vec::new(),
            Stored::Unreadable => return false,
        };
        for summary in stored {
            if self.deleted_unread.contains(&summary.id) {
                continue;
            }
            self.index
                .entry(summary.id.clone())
                .and_modify(|known| known.created_at = known.created_at.min(summary.created_at))
                .or_insert(summary);
        }
        self.index_unread = false;
        self.deleted_unread.clear();
        tracing::info!(sessions = self.index.len(), "merged stored session index");
        true
    }

    fn write_current(&self) {
        let result = match &self.current {
            Some(id) => self.adapter.set(CURRENT_SESSION_KEY, id.as_str().as_bytes()),
            None => self.adapter.remove(CURRENT_SESSION_KEY),
        };
        self.persist(CURRENT_SESSION_KEY, result);
    }

    fn persist(&self, key: &str, result: Result<()>) {
        PERSISTENCE_WRITES.click();
        if let Err(err) = result {
            PERSISTENCE_ERRORS.click();
            tracing::warn!(key, error = %err, "persistence write failed; keeping in-memory state");
        }
    }

    #[cfg(test)]
    fn cached_logs(&self) -> usize {
        self.logs.len()
    }
}

fn message_not_found(message_id: &MessageId) -> Error {
    Error::not_found(
        "no such message in session",
        Some("message".to_string()),
        Some(message_id.to_string()),
    )
}

/// What a read of one stored document found.
enum Stored<T> {
    Absent,
    Found(T),
    /// The adapter failed; the stored value is unknown.
    Unreadable,
}

fn read_document<T: DeserializeOwned>(adapter: &dyn PersistenceAdapter, key: &str) -> Stored<T> {
    let bytes = match adapter.get(key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Stored::Absent,
        Err(err) => {
            PERSISTENCE_ERRORS.click();
            tracing::warn!(key, error = %err, "persistence read failed");
            return Stored::Unreadable;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(document) => Stored::Found(document),
        Err(err) => {
            PERSISTENCE_ERRORS.click();
            let aside = format!("{key}{UNREADABLE_SUFFIX}");
            match adapter.set(&aside, &bytes) {
                Ok(()) => {
                    tracing::warn!(key, moved_to = %aside, error = %err, "set aside corrupt document");
                    Stored::Absent
                }
                Err(set_err) => {
                    tracing::warn!(key, error = %set_err, "could not set aside corrupt document");
                    Stored::Unreadable
                }
            }
        }
    }
}

fn read_current(adapter: &dyn PersistenceAdapter) -> Stored<SessionId> {
    match adapter.get(CURRENT_SESSION_KEY) {
        Ok(Some(bytes)) => String::from_utf8(bytes)
            .ok()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map_or(Stored::Absent, |id| Stored::Found(SessionId::from(id))),
        Ok(None) => Stored::Absent,
        Err(err) => {
            PERSISTENCE_ERRORS.click();
            tracing::warn!(error = %err, "could not read current session pointer");
            Stored::Unreadable
        }
    }
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u8,
    sessions: Vec<SessionSummary>,
}

#[derive(Deserialize)]
struct MessagesFile {
    #[allow(dead_code)]
    version: u8,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct MessagesFileRef<'a> {
    version: u8,
    messages: &'a [Message],
}
