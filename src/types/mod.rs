// Public modules
pub mod ids;
pub mod message;
pub mod session;

// Re-exports
pub use ids::{CorrelationId, MessageId, SessionId};
pub use message::{Message, MessagePatch, MessageStatus, Sender};
pub use session::{DEFAULT_PREVIEW, DEFAULT_TITLE, SessionSummary, derive_preview, derive_title};
