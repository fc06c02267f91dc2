//! The chat engine: one owner for the store, the stream reconciler, the
//! command table and the scroll policy.
//!
//! A front end drives the engine with [`ChatEngine::submit`] and feeds it
//! transport events with [`ChatEngine::pump`] (or [`ChatEngine::drain_events`]
//! when polling).  Everything the front end should react to is published on
//! the engine's [`EventBus`].  All mutation goes through `&mut self`, so one
//! operation always finishes before the next begins.

use std::collections::HashMap;
use std::sync::Arc;

use crate::commands::builtin::register_builtins;
use crate::commands::{CommandContext, CommandDispatcher, Dispatch};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::{ChatEvent, EventBus, EventSubscriber};
use crate::observability::STREAM_STALE_EVENTS;
use crate::reconciler::{StreamOutcome, StreamReconciler};
use crate::scroll::{ScrollPolicy, Viewport};
use crate::store::SessionStore;
use crate::transport::{AiTransport, EventReceiver, TransportEvent};
use crate::types::{CorrelationId, Message, MessageStatus, SessionId, SessionSummary};

/// What happened to a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Blank input; nothing happened.
    Ignored,
    /// The input was a command; these messages were added to the session.
    Command(Vec<Message>),
    /// The input was sent to the assistant and a reply is streaming.
    Streaming {
        session_id: SessionId,
        correlation_id: CorrelationId,
    },
    /// The input was kept but the assistant could not be reached; `notice`
    /// explains why.
    NotSent { notice: Message },
}

/// Conversation engine.
pub struct ChatEngine {
    store: SessionStore,
    reconciler: StreamReconciler,
    dispatcher: CommandDispatcher,
    scroll: ScrollPolicy,
    transport: Arc<dyn AiTransport>,
    transport_events: EventReceiver,
    bus: EventBus,
    // Command output for sessions whose reply is still streaming.  Appended
    // once the reply ends so the log stays in order.
    held: HashMap<SessionId, Vec<Message>>,
}

impl ChatEngine {
    /// Creates an engine with the built-in commands registered.
    ///
    /// `transport_events` must be the receiving end of the channel the
    /// transport reports on.
    pub fn new(
        config: &EngineConfig,
        store: SessionStore,
        transport: Arc<dyn AiTransport>,
        transport_events: EventReceiver,
    ) -> Result<Self> {
        let mut dispatcher = CommandDispatcher::new();
        register_builtins(&mut dispatcher, config.export_dir.clone())?;
        Ok(Self {
            store,
            reconciler: StreamReconciler::new(),
            dispatcher,
            scroll: ScrollPolicy::new(config.scroll_threshold),
            transport,
            transport_events,
            bus: EventBus::new(config.event_capacity),
            held: HashMap::new(),
        })
    }

    /// Command table, for registering more handlers.
    pub fn dispatcher_mut(&mut self) -> &mut CommandDispatcher {
        &mut self.dispatcher
    }

    /// Command table.
    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Read access to the session store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Event bus the engine publishes on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribes to engine events.
    pub fn subscribe(&self) -> EventSubscriber {
        self.bus.subscribe()
    }

    /// Returns the current session, creating one if needed.
    pub fn current_session_id(&mut self) -> SessionId {
        self.store.current_session_id()
    }

    /// Handles one line of user input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] while a reply is streaming in the
    /// current session.  Transport and command failures are not errors; they
    /// are reported as `system` messages.
    pub async fn submit(&mut self, text: &str) -> Result<SubmitOutcome> {
        if text.trim().is_empty() {
            return Ok(SubmitOutcome::Ignored);
        }
        let session_id = self.store.current_session_id();
        if self.reconciler.is_streaming(&session_id) {
            return Err(Error::invalid_state(
                "wait for the current reply to finish or stop it first",
            ));
        }

        let mut ctx = CommandContext::new(session_id.clone(), &mut self.store);
        match self.dispatcher.dispatch(text, &mut ctx).await {
            Dispatch::Handled(messages) => Ok(SubmitOutcome::Command(
                self.finish_command(&session_id, messages).await,
            )),
            Dispatch::Message(prompt) => self.send_prompt(session_id, prompt).await,
        }
    }

    /// Applies one transport event.  Returns false if the event was stale.
    pub fn handle_event(&mut self, event: TransportEvent) -> bool {
        let Some(session_id) = self.reconciler.session_for(event.correlation_id()) else {
            STREAM_STALE_EVENTS.click();
            tracing::debug!(correlation = %event.correlation_id(), "event for no open stream");
            return false;
        };
        match event {
            TransportEvent::TokenReceived {
                correlation_id,
                token,
            } => {
                if !self
                    .reconciler
                    .append_token(&session_id, &correlation_id, &token)
                {
                    return false;
                }
                self.bus.publish(ChatEvent::TokenAppended {
                    session_id: session_id.clone(),
                    token,
                });
                if self.is_current(&session_id) && self.scroll.is_near_bottom() {
                    self.bus.publish(ChatEvent::ScrollToBottom);
                }
                true
            }
            TransportEvent::StreamCompleted { correlation_id } => {
                let committed =
                    self.reconciler
                        .complete_stream(&mut self.store, &session_id, &correlation_id);
                if let Some(message) = committed {
                    self.after_append(&session_id, message);
                }
                self.stream_ended(session_id, StreamOutcome::Completed);
                true
            }
            TransportEvent::StreamFailed {
                correlation_id,
                reason,
            } => {
                let appended = self.reconciler.error_stream(
                    &mut self.store,
                    &session_id,
                    &correlation_id,
                    &reason,
                );
                for message in appended {
                    self.after_append(&session_id, message);
                }
                self.stream_ended(session_id, StreamOutcome::Errored);
                true
            }
        }
    }

    /// Waits for the next transport event and applies it.
    ///
    /// Returns `None` once every transport sender is gone.
    pub async fn pump(&mut self) -> Option<TransportEvent> {
        let event = self.transport_events.recv().await?;
        self.handle_event(event.clone());
        Some(event)
    }

    /// Applies every transport event that is already waiting.  Returns how
    /// many were taken off the channel.
    pub fn drain_events(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.transport_events.try_recv() {
            self.handle_event(event);
            count += 1;
        }
        count
    }

    /// Stops the reply streaming in the current session.
    ///
    /// Partial text is kept.  Returns false if nothing was streaming.
    pub async fn stop(&mut self) -> bool {
        let Some(session_id) = self.store.peek_current_session_id().cloned() else {
            return false;
        };
        let Some(correlation_id) = self
            .reconciler
            .context(&session_id)
            .map(|context| context.correlation_id.clone())
        else {
            return false;
        };
        self.cancel_transport(&correlation_id).await;
        if let Some(message) =
            self.reconciler
                .cancel_stream(&mut self.store, &session_id, &correlation_id)
        {
            self.after_append(&session_id, message);
        }
        self.stream_ended(session_id, StreamOutcome::Cancelled);
        true
    }

    /// Starts a new empty session and makes it current.
    pub fn new_session(&mut self) -> SessionId {
        let id = self.store.create_session();
        self.session_switched(id.clone());
        id
    }

    /// Makes `id` the current session.  Unknown ids show as empty sessions.
    pub fn switch_session(&mut self, id: SessionId) {
        if self.store.peek_current_session_id() == Some(&id) {
            return;
        }
        self.store.set_current_session_id(id.clone());
        self.session_switched(id);
    }

    /// Deletes a session, stopping its stream if it has one.  Returns true
    /// if the session existed.
    pub async fn delete_session(&mut self, id: &SessionId) -> bool {
        let was_current = self.store.peek_current_session_id() == Some(id);
        if let Some(context) = self.reconciler.abandon(id) {
            self.cancel_transport(&context.correlation_id).await;
        }
        self.held.remove(id);
        let existed = self.store.delete_session(id);
        self.bus.publish(ChatEvent::SessionsChanged);
        if was_current {
            let fresh = self.store.current_session_id();
            self.session_switched(fresh);
        }
        existed
    }

    /// Messages of the current session, including a live placeholder and
    /// any command output waiting for the reply to end.
    pub fn messages(&mut self) -> Vec<Message> {
        let id = self.store.current_session_id();
        let mut view = self.reconciler.view(&mut self.store, &id);
        if let Some(held) = self.held.get(&id) {
            view.extend(held.iter().cloned());
        }
        view
    }

    /// Summaries of all sessions, most recently modified first.
    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.store.list_sessions()
    }

    /// Records where the reader is scrolled.  Returns whether that is near
    /// the bottom.
    pub fn observe_viewport(&mut self, viewport: Viewport) -> bool {
        self.scroll.observe(viewport)
    }

    /// Returns true while a reply streams in the current session.
    pub fn is_streaming(&self) -> bool {
        self.store
            .peek_current_session_id()
            .is_some_and(|id| self.reconciler.is_streaming(id))
    }

    /// Text received so far for the current session's reply.
    pub fn streaming_text(&self) -> Option<&str> {
        let id = self.store.peek_current_session_id()?;
        self.reconciler
            .context(id)
            .map(|context| context.accumulated_text.as_str())
    }

    async fn send_prompt(&mut self, session_id: SessionId, prompt: String) -> Result<SubmitOutcome> {
        let user = Message::user(prompt.clone());
        self.store.append_message(&session_id, user.clone());
        self.after_append(&session_id, user);
        self.bus.publish(ChatEvent::ClearInput);
        self.bus.publish(ChatEvent::SessionsChanged);

        let correlation_id = match self.transport.open_stream(&prompt, &session_id).await {
            Ok(correlation_id) => correlation_id,
            Err(err) => {
                tracing::warn!(session = %session_id, error = %err, "could not reach the assistant");
                let mut notice = Message::system(format!("Error: {err}"));
                notice.status = MessageStatus::Error;
                self.store.append_message(&session_id, notice.clone());
                self.after_append(&session_id, notice.clone());
                self.bus.publish(ChatEvent::FocusInput);
                return Ok(SubmitOutcome::NotSent { notice });
            }
        };
        self.reconciler.begin_stream(&session_id, &correlation_id)?;
        self.bus.publish(ChatEvent::InputEnabled(false));
        self.bus.publish(ChatEvent::StreamStarted {
            session_id: session_id.clone(),
            correlation_id: correlation_id.clone(),
        });
        Ok(SubmitOutcome::Streaming {
            session_id,
            correlation_id,
        })
    }

    async fn finish_command(&mut self, issued_in: &SessionId, messages: Vec<Message>) -> Vec<Message> {
        // Commands may delete sessions that still have a reply in flight.
        for id in self.reconciler.active_sessions() {
            if !self.store.contains(&id) {
                if let Some(context) = self.reconciler.abandon(&id) {
                    self.cancel_transport(&context.correlation_id).await;
                }
                self.held.remove(&id);
            }
        }
        let current = self.store.current_session_id();
        if &current != issued_in {
            self.session_switched(current.clone());
        }
        if self.reconciler.is_streaming(&current) {
            tracing::debug!(session = %current, count = messages.len(), "holding command output until the reply ends");
            self.held
                .entry(current)
                .or_default()
                .extend(messages.iter().cloned());
        } else {
            for message in &messages {
                self.store.append_message(&current, message.clone());
                self.after_append(&current, message.clone());
            }
        }
        self.bus.publish(ChatEvent::SessionsChanged);
        self.bus.publish(ChatEvent::ClearInput);
        self.bus.publish(ChatEvent::FocusInput);
        messages
    }

    async fn cancel_transport(&self, correlation_id: &CorrelationId) {
        if let Err(err) = self.transport.cancel(correlation_id).await {
            tracing::warn!(correlation = %correlation_id, error = %err, "transport cancel failed");
        }
    }

    fn after_append(&mut self, session_id: &SessionId, message: Message) {
        if self.is_current(session_id) {
            let count = self
                .store
                .summary(session_id)
                .map_or(0, |summary| summary.message_count);
            if self.scroll.should_follow(message.sender, count) {
                self.bus.publish(ChatEvent::ScrollToBottom);
            }
        }
        self.bus.publish(ChatEvent::MessageAppended {
            session_id: session_id.clone(),
            message,
        });
    }

    fn stream_ended(&mut self, session_id: SessionId, outcome: StreamOutcome) {
        for message in self.held.remove(&session_id).unwrap_or_default() {
            self.store.append_message(&session_id, message.clone());
            self.after_append(&session_id, message);
        }
        let current = self.is_current(&session_id);
        self.bus.publish(ChatEvent::StreamEnded {
            session_id,
            outcome,
        });
        self.bus.publish(ChatEvent::SessionsChanged);
        if current {
            self.bus.publish(ChatEvent::InputEnabled(true));
            self.bus.publish(ChatEvent::FocusInput);
        }
    }

    fn session_switched(&mut self, id: SessionId) {
        self.scroll.reset();
        self.bus.publish(ChatEvent::SessionSwitched { session_id: id });
        self.bus.publish(ChatEvent::SessionsChanged);
        self.bus.publish(ChatEvent::InputEnabled(!self.is_streaming()));
        self.bus.publish(ChatEvent::FocusInput);
        self.bus.publish(ChatEvent::ScrollToBottom);
    }

    fn is_current(&self, id: &SessionId) -> bool {
        self.store.peek_current_session_id() == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::persistence::MemoryStore;
    use crate::transport::{EventSender, event_channel};
    use crate::types::Sender;

    #[derive(Default)]
    struct Recorder {
        opened: Mutex<Vec<(String, SessionId)>>,
        cancelled: Mutex<Vec<CorrelationId>>,
        refuse: bool,
    }

    #[async_trait::async_trait]
    impl AiTransport for Recorder {
        async fn open_stream(&self, prompt: &str, session_id: &SessionId) -> Result<CorrelationId> {
            if self.refuse {
                return Err(Error::transport("connection refused", None));
            }
            let mut opened = self.opened.lock().unwrap();
            opened.push((prompt.to_string(), session_id.clone()));
            Ok(CorrelationId::from(format!("c{}", opened.len())))
        }

        async fn cancel(&self, correlation_id: &CorrelationId) -> Result<()> {
            self.cancelled.lock().unwrap().push(correlation_id.clone());
            Ok(())
        }
    }

    fn engine_with(transport: Arc<Recorder>) -> (ChatEngine, EventSender) {
        let (tx, rx) = event_channel();
        let dir = std::env::temp_dir();
        let config = EngineConfig::new().with_export_dir(dir).ephemeral();
        let engine =
            ChatEngine::new(&config, SessionStore::open(MemoryStore::new()), transport, rx).unwrap();
        (engine, tx)
    }

    fn token(id: &str, text: &str) -> TransportEvent {
        TransportEvent::TokenReceived {
            correlation_id: CorrelationId::from(id),
            token: text.to_string(),
        }
    }

    #[tokio::test]
    async fn prompt_streams_into_one_reply() {
        let transport = Arc::new(Recorder::default());
        let (mut engine, _tx) = engine_with(transport.clone());
        let outcome = engine.submit("hi there").await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Streaming { .. }));
        assert!(engine.is_streaming());

        assert!(engine.handle_event(token("c1", "Hel")));
        assert!(engine.handle_event(token("c1", "lo")));
        assert_eq!(engine.streaming_text(), Some("Hello"));
        let view = engine.messages();
        assert_eq!(view.len(), 2);
        assert!(view[1].is_streaming());

        engine.handle_event(TransportEvent::StreamCompleted {
            correlation_id: CorrelationId::from("c1"),
        });
        let messages = engine.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Hello");
        assert_eq!(messages[1].status, MessageStatus::Final);
        assert!(!engine.is_streaming());
        assert_eq!(transport.opened.lock().unwrap()[0].0, "hi there");
    }

    #[tokio::test]
    async fn submission_while_streaming_is_rejected() {
        let (mut engine, _tx) = engine_with(Arc::new(Recorder::default()));
        engine.submit("first").await.unwrap();
        let err = engine.submit("second").await.unwrap_err();
        assert!(err.is_invalid_state());
        assert!(engine.submit("/help").await.is_err());
    }

    #[tokio::test]
    async fn refused_transport_keeps_prompt_and_explains() {
        let transport = Arc::new(Recorder {
            refuse: true,
            ..Recorder::default()
        });
        let (mut engine, _tx) = engine_with(transport);
        let outcome = engine.submit("anyone there?").await.unwrap();
        let SubmitOutcome::NotSent { notice } = outcome else {
            panic!("expected NotSent");
        };
        assert!(notice.content.contains("connection refused"));
        let messages = engine.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[1].sender, Sender::System);
        assert!(!engine.is_streaming());
    }

    #[tokio::test]
    async fn stop_keeps_partial_and_ignores_late_tokens() {
        let transport = Arc::new(Recorder::default());
        let (mut engine, tx) = engine_with(transport.clone());
        engine.submit("tell me a story").await.unwrap();
        engine.handle_event(token("c1", "Once upon"));
        assert!(engine.stop().await);
        assert_eq!(
            transport.cancelled.lock().unwrap().as_slice(),
            &[CorrelationId::from("c1")]
        );

        tx.send(token("c1", " a time")).unwrap();
        assert_eq!(engine.drain_events(), 1);
        let messages = engine.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Once upon");
        assert!(!engine.stop().await);
    }

    #[tokio::test]
    async fn commands_post_system_messages() {
        let (mut engine, _tx) = engine_with(Arc::new(Recorder::default()));
        let SubmitOutcome::Command(messages) = engine.submit("/help").await.unwrap() else {
            panic!("expected command");
        };
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, Sender::System);
        assert_eq!(engine.messages().len(), 1);
    }

    #[tokio::test]
    async fn new_command_switches_and_publishes() {
        let (mut engine, _tx) = engine_with(Arc::new(Recorder::default()));
        let before = engine.current_session_id();
        let mut events = engine.subscribe();
        engine.submit("/new").await.unwrap();
        let after = engine.current_session_id();
        assert_ne!(before, after);
        let events = events.drain();
        assert!(events.contains(&ChatEvent::SessionSwitched {
            session_id: after.clone()
        }));
        assert_eq!(engine.sessions().len(), 2);
    }

    #[tokio::test]
    async fn deleting_streaming_session_cancels_it() {
        let transport = Arc::new(Recorder::default());
        let (mut engine, _tx) = engine_with(transport.clone());
        engine.submit("question").await.unwrap();
        let id = engine.current_session_id();
        assert!(engine.delete_session(&id).await);
        assert_eq!(transport.cancelled.lock().unwrap().len(), 1);
        assert!(!engine.handle_event(token("c1", "late")));
        let fresh = engine.current_session_id();
        assert_ne!(fresh, id);
        assert!(engine.messages().is_empty());
        assert!(!engine.store().contains(&id));
    }

    #[tokio::test]
    async fn scrolled_up_reader_is_not_yanked() {
        let (mut engine, _tx) = engine_with(Arc::new(Recorder::default()));
        engine.submit("first question").await.unwrap();
        engine.observe_viewport(Viewport::new(0.0, 4000.0, 500.0));
        let mut events = engine.subscribe();
        engine.handle_event(token("c1", "answer"));
        engine.handle_event(TransportEvent::StreamCompleted {
            correlation_id: CorrelationId::from("c1"),
        });
        assert!(!events.drain().contains(&ChatEvent::ScrollToBottom));

        engine.observe_viewport(Viewport::new(3500.0, 4000.0, 500.0));
        engine.submit("follow-up").await.unwrap();
        assert!(events.drain().contains(&ChatEvent::ScrollToBottom));
    }

    #[tokio::test]
    async fn command_output_waits_for_streaming_reply() {
        let (mut engine, _tx) = engine_with(Arc::new(Recorder::default()));
        engine.submit("slow question").await.unwrap();
        let first = engine.current_session_id();
        engine.new_session();
        engine
            .submit(&format!("/open {}", &first.as_str()[..8]))
            .await
            .unwrap();
        assert_eq!(engine.current_session_id(), first);
        assert!(engine.is_streaming());

        let view = engine.messages();
        assert_eq!(view.len(), 3);
        assert!(view[1].is_streaming());
        assert_eq!(view[2].sender, Sender::System);
        assert_eq!(engine.store.summary(&first).unwrap().message_count, 1);

        engine.handle_event(token("c1", "answer"));
        engine.handle_event(TransportEvent::StreamCompleted {
            correlation_id: CorrelationId::from("c1"),
        });
        let senders: Vec<Sender> = engine
            .store
            .load_messages(&first)
            .iter()
            .map(|m| m.sender)
            .collect();
        assert_eq!(senders, vec![Sender::User, Sender::Assistant, Sender::System]);
        assert_eq!(engine.messages().len(), 3);
    }

    #[tokio::test]
    async fn pump_applies_channel_events() {
        let (mut engine, tx) = engine_with(Arc::new(Recorder::default()));
        engine.submit("ping").await.unwrap();
        tx.send(token("c1", "pong")).unwrap();
        tx.send(TransportEvent::StreamCompleted {
            correlation_id: CorrelationId::from("c1"),
        })
        .unwrap();
        assert!(engine.pump().await.is_some());
        assert!(engine.pump().await.unwrap().is_terminal());
        assert_eq!(engine.messages()[1].content, "pong");
        drop(tx);
        assert!(engine.pump().await.is_none());
    }
}
