//! The AI transport contract.
//!
//! A transport opens streams against the AI backend and reports their
//! progress as [`TransportEvent`]s on a channel.  The engine reads that
//! channel and applies each event to the matching stream; events whose
//! correlation id no longer matches an open stream are dropped, which is
//! what makes cancellation safe when bytes are still in flight.

use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::{CorrelationId, SessionId};

/// Progress of a stream, as reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A chunk of assistant text arrived.
    TokenReceived {
        /// Stream the token belongs to.
        correlation_id: CorrelationId,
        /// The text chunk.
        token: String,
    },

    /// The stream ended normally.
    StreamCompleted {
        /// Stream that ended.
        correlation_id: CorrelationId,
    },

    /// The stream ended with an error.
    StreamFailed {
        /// Stream that failed.
        correlation_id: CorrelationId,
        /// Human-readable failure reason.
        reason: String,
    },
}

impl TransportEvent {
    /// Returns the correlation id carried by the event.
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            TransportEvent::TokenReceived { correlation_id, .. }
            | TransportEvent::StreamCompleted { correlation_id }
            | TransportEvent::StreamFailed { correlation_id, .. } => correlation_id,
        }
    }

    /// Returns true for events that end a stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportEvent::TokenReceived { .. })
    }
}

/// Sending half of a transport event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of a transport event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Creates a transport event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Opens and cancels AI response streams.
#[async_trait::async_trait]
pub trait AiTransport: Send + Sync {
    /// Starts generating a reply to `prompt` in `session_id`.
    ///
    /// Returns the correlation id that every event of the new stream will
    /// carry.  Events may start arriving before this call returns; the
    /// engine does not read them until it has registered the stream.
    async fn open_stream(&self, prompt: &str, session_id: &SessionId) -> Result<CorrelationId>;

    /// Asks the transport to stop a stream.  Best effort: events already in
    /// flight may still be delivered.
    async fn cancel(&self, correlation_id: &CorrelationId) -> Result<()>;
}
