// Public modules
pub mod backend;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod export;
pub mod observability;
pub mod persistence;
pub mod reconciler;
pub mod render;
pub mod retry;
pub mod scroll;
pub mod search;
pub mod store;
pub mod transport;
pub mod types;
pub mod utils;

// Re-exports
pub use backend::{Backend, HttpTransport};
pub use commands::{CommandDispatcher, CommandHandler, CommandSpec};
pub use config::{ChatArgs, EngineConfig};
pub use engine::{ChatEngine, SubmitOutcome};
pub use error::{Error, Result};
pub use events::{ChatEvent, EventBus};
pub use observability::register_biometrics;
pub use persistence::{DirectoryStore, MemoryStore, PersistenceAdapter};
pub use reconciler::{StreamOutcome, StreamReconciler};
pub use scroll::{ScrollPolicy, Viewport};
pub use store::SessionStore;
pub use transport::{AiTransport, TransportEvent};
pub use types::*;
