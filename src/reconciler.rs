//! Merges streamed tokens into a single in-progress message.
//!
//! Each session is a small state machine:
//!
//! ```text
//! Idle --begin--> Streaming --complete--> Committed --> Idle
//!                           --cancel----> Cancelled --> Idle
//!                           --error-----> Errored   --> Idle
//! ```
//!
//! While streaming, the session owns one [`StreamContext`] and one placeholder
//! [`Message`] in `streaming` status.  The placeholder is visible through
//! [`StreamReconciler::view`] but is not written to the store until the
//! stream ends.  Every operation names the stream by correlation id; calls
//! that do not match the open stream are stale and change nothing.

use std::collections::HashMap;
use std::time::Instant;

use time::OffsetDateTime;

use crate::error::{Error, Result};
use crate::observability::{
    STREAM_DURATION, STREAM_STALE_EVENTS, STREAM_TOKENS, STREAMS_CANCELLED, STREAMS_COMPLETED,
    STREAMS_ERRORED, STREAMS_STARTED,
};
use crate::store::SessionStore;
use crate::types::{CorrelationId, Message, MessageId, MessageStatus, SessionId};
use crate::utils::time::now;

/// State of one open stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamContext {
    /// Session the stream writes into.
    pub session_id: SessionId,
    /// Correlation id of the stream.
    pub correlation_id: CorrelationId,
    /// Text received so far.
    pub accumulated_text: String,
    /// When the stream was opened.
    pub started_at: OffsetDateTime,
}

/// How a stream ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The transport reported completion.
    Completed,
    /// The stream was stopped by the user.
    Cancelled,
    /// The transport reported a failure.
    Errored,
}

struct ActiveStream {
    context: StreamContext,
    placeholder: Message,
    opened: Instant,
}

/// Tracks at most one open stream per session.
#[derive(Default)]
pub struct StreamReconciler {
    active: HashMap<SessionId, ActiveStream>,
}

impl StreamReconciler {
    /// Creates a reconciler with no open streams.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a stream in `session_id` and returns the placeholder's id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the session already has an open
    /// stream, or if `correlation_id` already routes to another session.
    pub fn begin_stream(
        &mut self,
        session_id: &SessionId,
        correlation_id: &CorrelationId,
    ) -> Result<MessageId> {
        if let Some(existing) = self.active.get(session_id) {
            return Err(Error::invalid_state(format!(
                "session {session_id} already has an open stream ({})",
                existing.context.correlation_id
            )));
        }
        if let Some(other) = self.session_for(correlation_id) {
            return Err(Error::invalid_state(format!(
                "correlation id {correlation_id} is already streaming in session {other}"
            )));
        }
        let placeholder = Message::streaming_placeholder();
        let placeholder_id = placeholder.id.clone();
        self.active.insert(
            session_id.clone(),
            ActiveStream {
                context: StreamContext {
                    session_id: session_id.clone(),
                    correlation_id: correlation_id.clone(),
                    accumulated_text: String::new(),
                    started_at: now(),
                },
                placeholder,
                opened: Instant::now(),
            },
        );
        STREAMS_STARTED.click();
        tracing::debug!(session = %session_id, correlation = %correlation_id, "stream opened");
        Ok(placeholder_id)
    }

    /// Appends a token to the open stream.  Returns false, without touching
    /// any message, when the correlation id is stale.
    pub fn append_token(
        &mut self,
        session_id: &SessionId,
        correlation_id: &CorrelationId,
        token: &str,
    ) -> bool {
        let Some(active) = self.matching_mut(session_id, correlation_id) else {
            stale(session_id, correlation_id, "token");
            return false;
        };
        active.context.accumulated_text.push_str(token);
        active.placeholder.content.push_str(token);
        STREAM_TOKENS.click();
        true
    }

    /// Finalizes the stream and appends its message to the session.
    ///
    /// Returns the committed message; a repeated or stale completion returns
    /// `None` and does nothing.
    pub fn complete_stream(
        &mut self,
        store: &mut SessionStore,
        session_id: &SessionId,
        correlation_id: &CorrelationId,
    ) -> Option<Message> {
        let Some(active) = self.take_matching(session_id, correlation_id) else {
            stale(session_id, correlation_id, "completion");
            return None;
        };
        STREAMS_COMPLETED.click();
        commit(store, active, StreamOutcome::Completed)
    }

    /// Stops the stream.  Partial text is kept as a final message; an empty
    /// placeholder is discarded.
    pub fn cancel_stream(
        &mut self,
        store: &mut SessionStore,
        session_id: &SessionId,
        correlation_id: &CorrelationId,
    ) -> Option<Message> {
        let Some(active) = self.take_matching(session_id, correlation_id) else {
            stale(session_id, correlation_id, "cancellation");
            return None;
        };
        STREAMS_CANCELLED.click();
        if active.context.accumulated_text.is_empty() {
            record_duration(&active);
            tracing::debug!(session = %session_id, "discarded empty stream");
            return None;
        }
        commit(store, active, StreamOutcome::Cancelled)
    }

    /// Ends the stream with an error.  Partial text is kept as a final
    /// message, followed by a system message carrying `reason`.  Returns the
    /// messages appended to the session.
    pub fn error_stream(
        &mut self,
        store: &mut SessionStore,
        session_id: &SessionId,
        correlation_id: &CorrelationId,
        reason: &str,
    ) -> Vec<Message> {
        let Some(active) = self.take_matching(session_id, correlation_id) else {
            stale(session_id, correlation_id, "failure");
            return Vec::new();
        };
        STREAMS_ERRORED.click();
        tracing::warn!(session = %session_id, correlation = %correlation_id, reason, "stream failed");
        if !store.contains(session_id) {
            record_duration(&active);
            return Vec::new();
        }
        let mut appended = Vec::new();
        if active.context.accumulated_text.is_empty() {
            record_duration(&active);
        } else if let Some(partial) = commit(store, active, StreamOutcome::Errored) {
            appended.push(partial);
        }
        let mut notice = Message::system(format!("Error: {reason}"));
        notice.status = MessageStatus::Error;
        store.append_message(session_id, notice.clone());
        appended.push(notice);
        appended
    }

    /// Drops the open stream of a session without committing anything.
    ///
    /// Used when the session itself goes away.
    pub fn abandon(&mut self, session_id: &SessionId) -> Option<StreamContext> {
        self.active.remove(session_id).map(|active| {
            record_duration(&active);
            active.context
        })
    }

    /// Returns the open stream of a session.
    pub fn context(&self, session_id: &SessionId) -> Option<&StreamContext> {
        self.active.get(session_id).map(|active| &active.context)
    }

    /// Returns the live placeholder of a session.
    pub fn placeholder(&self, session_id: &SessionId) -> Option<&Message> {
        self.active.get(session_id).map(|active| &active.placeholder)
    }

    /// Returns true if the session has an open stream.
    pub fn is_streaming(&self, session_id: &SessionId) -> bool {
        self.active.contains_key(session_id)
    }

    /// Returns the sessions that have an open stream.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.active.keys().cloned().collect()
    }

    /// Finds the session whose open stream carries `correlation_id`.
    pub fn session_for(&self, correlation_id: &CorrelationId) -> Option<SessionId> {
        self.active
            .values()
            .find(|active| &active.context.correlation_id == correlation_id)
            .map(|active| active.context.session_id.clone())
    }

    /// Returns the persisted messages of a session followed by its live
    /// placeholder, if any.
    pub fn view(&self, store: &mut SessionStore, session_id: &SessionId) -> Vec<Message> {
        let mut messages = store.load_messages(session_id);
        if let Some(placeholder) = self.placeholder(session_id) {
            messages.push(placeholder.clone());
        }
        messages
    }

    fn matching_mut(
        &mut self,
        session_id: &SessionId,
        correlation_id: &CorrelationId,
    ) -> Option<&mut ActiveStream> {
        self.active
            .get_mut(session_id)
            .filter(|active| &active.context.correlation_id == correlation_id)
    }

    fn take_matching(
        &mut self,
        session_id: &SessionId,
        correlation_id: &CorrelationId,
    ) -> Option<ActiveStream> {
        self.matching_mut(session_id, correlation_id)?;
        self.active.remove(session_id)
    }
}

fn commit(store: &mut SessionStore, active: ActiveStream, outcome: StreamOutcome) -> Option<Message> {
    record_duration(&active);
    let ActiveStream {
        context,
        mut placeholder,
        ..
    } = active;
    if !store.contains(&context.session_id) {
        tracing::warn!(
            session = %context.session_id,
            ?outcome,
            "session vanished while streaming; dropping reply"
        );
        return None;
    }
    placeholder.content = context.accumulated_text;
    placeholder.status = MessageStatus::Final;
    store.append_message(&context.session_id, placeholder.clone());
    tracing::debug!(session = %context.session_id, ?outcome, "stream committed");
    Some(placeholder)
}

fn record_duration(active: &ActiveStream) {
    STREAM_DURATION.add(active.opened.elapsed().as_secs_f64());
}

fn stale(session_id: &SessionId, correlation_id: &CorrelationId, what: &str) {
    STREAM_STALE_EVENTS.click();
    tracing::debug!(
        session = %session_id,
        correlation = %correlation_id,
        what,
        "ignoring stale stream event"
    );
}
