//! Interactive terminal client for the Codeius assistant.
//!
//! Chats are saved under the data directory and survive restarts; the most
//! recently used chat is reopened on start.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a backend on localhost:8080
//! codeius-chat
//!
//! # Another backend, chats kept in memory only
//! codeius-chat --backend-url http://10.0.0.2:8080/api/ --ephemeral
//!
//! # Settings from a file, plain output
//! codeius-chat --config codeius.yaml --no-color
//! ```
//!
//! Type `/help` for commands and `/quit` to leave.  Ctrl+C stops a reply
//! that is still arriving.  Set `CODEIUS_LOG=debug` for diagnostics on
//! stderr.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use codeius::commands::remote::register_backend_commands;
use codeius::config::LOG_ENV;
use codeius::events::EventSubscriber;
use codeius::render::{PlainTextRenderer, Renderer};
use codeius::transport::event_channel;
use codeius::{
    Backend, ChatArgs, ChatEngine, ChatEvent, DirectoryStore, EngineConfig, HttpTransport,
    MemoryStore, Sender, SessionStore, StreamOutcome, SubmitOutcome,
};

/// How often a streaming reply checks for Ctrl+C.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("codeius-chat [OPTIONS]");
    let config = EngineConfig::from_args(args)?;
    let mut renderer = PlainTextRenderer::with_color(config.use_color);

    let store = if config.ephemeral {
        SessionStore::open(MemoryStore::new())
    } else {
        SessionStore::open(DirectoryStore::open(&config.data_dir)?)
    };
    let backend = Arc::new(Backend::with_options(
        Some(&config.backend_url),
        Some(config.timeout()),
        Some(config.retry_policy()),
    )?);
    let (tx, rx) = event_channel();
    let transport = Arc::new(HttpTransport::new(backend.clone(), tx));
    let mut engine = ChatEngine::new(&config, store, transport, rx)?;
    register_backend_commands(engine.dispatcher_mut(), backend.clone())?;
    let mut events = engine.subscribe();

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    println!("Codeius AI ({})", backend.base_url());
    match backend.health().await {
        Ok(health) if health.is_healthy() => {}
        Ok(health) => renderer.print_error(&format!(
            "Backend reports {}: {}",
            health.status, health.message
        )),
        Err(err) => renderer.print_error(&format!("Backend unreachable: {err}")),
    }
    println!("Type /help for commands, /quit to exit\n");
    for message in engine.messages() {
        renderer.print_message(&message);
    }

    let mut rl = DefaultEditor::new()?;
    loop {
        interrupted.store(false, Ordering::Relaxed);

        match rl.readline("You: ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                if matches!(line, "/quit" | "/exit") {
                    println!("Goodbye!");
                    break;
                }

                match engine.submit(line).await {
                    Ok(SubmitOutcome::Streaming { .. }) => {
                        render_events(&mut engine, &mut events, &mut renderer);
                        follow_stream(&mut engine, &mut events, &mut renderer, &interrupted).await;
                    }
                    Ok(_) => render_events(&mut engine, &mut events, &mut renderer),
                    Err(err) => renderer.print_error(&err.to_string()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        }
    }

    Ok(())
}

/// Applies transport events until the current reply ends or Ctrl+C stops it.
async fn follow_stream(
    engine: &mut ChatEngine,
    events: &mut EventSubscriber,
    renderer: &mut PlainTextRenderer,
    interrupted: &AtomicBool,
) {
    while engine.is_streaming() {
        if interrupted.swap(false, Ordering::Relaxed) {
            engine.stop().await;
        } else if let Ok(None) = tokio::time::timeout(POLL_INTERVAL, engine.pump()).await {
            renderer.print_error("Transport closed");
            break;
        }
        render_events(engine, events, renderer);
    }
}

/// Prints whatever the engine published since the last call.
///
/// A session switch reprints the whole session instead of the individual
/// events.
fn render_events(
    engine: &mut ChatEngine,
    events: &mut EventSubscriber,
    renderer: &mut PlainTextRenderer,
) {
    let batch = events.drain();
    if batch
        .iter()
        .any(|event| matches!(event, ChatEvent::SessionSwitched { .. }))
    {
        for message in engine.messages() {
            renderer.print_message(&message);
        }
        return;
    }
    for event in batch {
        match event {
            ChatEvent::StreamStarted { .. } => renderer.start_response(),
            ChatEvent::TokenAppended { token, .. } => renderer.print_text(&token),
            ChatEvent::StreamEnded { outcome, .. } => match outcome {
                StreamOutcome::Cancelled => renderer.print_interrupted(),
                StreamOutcome::Completed | StreamOutcome::Errored => renderer.finish_response(),
            },
            ChatEvent::MessageAppended { message, .. } if message.sender == Sender::System => {
                renderer.print_message(&message)
            }
            _ => {}
        }
    }
}
