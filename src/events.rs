//! Typed notifications from the engine to whatever front end drives it.
//!
//! The engine never reaches into the view.  It publishes [`ChatEvent`]s and
//! front ends react: refocus the input box, scroll, redraw the history list.

use tokio::sync::broadcast;

use crate::reconciler::StreamOutcome;
use crate::types::{CorrelationId, Message, SessionId};

/// Default number of events a slow subscriber may fall behind by.
pub const DEFAULT_CAPACITY: usize = 256;

/// Something the front end may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A message was committed to a session.
    MessageAppended {
        session_id: SessionId,
        message: Message,
    },
    /// An assistant reply started streaming.
    StreamStarted {
        session_id: SessionId,
        correlation_id: CorrelationId,
    },
    /// A token was added to the live reply.
    TokenAppended { session_id: SessionId, token: String },
    /// The live reply ended.
    StreamEnded {
        session_id: SessionId,
        outcome: StreamOutcome,
    },
    /// A different session became current.
    SessionSwitched { session_id: SessionId },
    /// The session list changed (created, deleted, retitled).
    SessionsChanged,
    /// The view should scroll to the newest message.
    ScrollToBottom,
    /// The input box should take focus.
    FocusInput,
    /// The input box should be emptied.
    ClearInput,
    /// The input box should accept or refuse submissions.
    InputEnabled(bool),
}

/// Fan-out channel of [`ChatEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChatEvent>,
}

impl EventBus {
    /// Creates a bus that buffers up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event.  Events published with no subscriber are dropped.
    pub fn publish(&self, event: ChatEvent) {
        tracing::trace!(?event, "publish");
        let _ = self.sender.send(event);
    }

    /// Subscribes to events published from now on.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiving end of an [`EventBus`].
pub struct EventSubscriber {
    receiver: broadcast::Receiver<ChatEvent>,
}

impl EventSubscriber {
    /// Waits for the next event.  Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking: takes every pending event.
    pub fn drain(&mut self) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(_) => break,
            }
        }
        events
    }
}
