//! Property tests for the stream reconciler.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use codeius::{
        CorrelationId, MemoryStore, Message, MessageStatus, SessionId, SessionStore,
        StreamReconciler,
    };

    #[derive(Debug, Clone)]
    enum Op {
        Begin(usize, usize),
        Token(usize, usize, String),
        Complete(usize, usize),
        Cancel(usize, usize),
        Fail(usize, usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        let session = 0..2usize;
        let stream = 0..3usize;
        prop_oneof![
            (session.clone(), stream.clone()).prop_map(|(s, c)| Op::Begin(s, c)),
            (session.clone(), stream.clone(), "[a-z ]{0,6}")
                .prop_map(|(s, c, t)| Op::Token(s, c, t)),
            (session.clone(), stream.clone()).prop_map(|(s, c)| Op::Complete(s, c)),
            (session.clone(), stream.clone()).prop_map(|(s, c)| Op::Cancel(s, c)),
            (session, stream).prop_map(|(s, c)| Op::Fail(s, c)),
        ]
    }

    struct World {
        store: SessionStore,
        reconciler: StreamReconciler,
        sessions: Vec<SessionId>,
        streams: Vec<CorrelationId>,
    }

    impl World {
        fn new() -> Self {
            let mut store = SessionStore::open(MemoryStore::new());
            let sessions = vec![store.create_session(), store.create_session()];
            let streams = (0..3)
                .map(|i| CorrelationId::from(format!("c{i}")))
                .collect();
            Self {
                store,
                reconciler: StreamReconciler::new(),
                sessions,
                streams,
            }
        }

        fn view(&mut self, session: usize) -> Vec<Message> {
            let id = self.sessions[session].clone();
            self.reconciler.view(&mut self.store, &id)
        }

        fn is_active(&self, session: usize, stream: usize) -> bool {
            self.reconciler
                .context(&self.sessions[session])
                .is_some_and(|ctx| ctx.correlation_id == self.streams[stream])
        }

        fn apply(&mut self, op: &Op) {
            let (s, c) = match op {
                Op::Begin(s, c)
                | Op::Token(s, c, _)
                | Op::Complete(s, c)
                | Op::Cancel(s, c)
                | Op::Fail(s, c) => (*s, *c),
            };
            let session = self.sessions[s].clone();
            let stream = self.streams[c].clone();
            match op {
                Op::Begin(..) => {
                    // Refused when the session or the correlation id is already busy.
                    let _ = self.reconciler.begin_stream(&session, &stream);
                }
                Op::Token(.., token) => {
                    self.reconciler.append_token(&session, &stream, token);
                }
                Op::Complete(..) => {
                    self.reconciler
                        .complete_stream(&mut self.store, &session, &stream);
                }
                Op::Cancel(..) => {
                    self.reconciler
                        .cancel_stream(&mut self.store, &session, &stream);
                }
                Op::Fail(..) => {
                    self.reconciler
                        .error_stream(&mut self.store, &session, &stream, "lost");
                }
            }
        }
    }

    proptest! {
        #[test]
        fn at_most_one_streaming_message_per_session(ops in prop::collection::vec(op(), 0..40)) {
            let mut world = World::new();
            for op in &ops {
                world.apply(op);
                for session in 0..2 {
                    let view = world.view(session);
                    let streaming = view.iter().filter(|m| m.is_streaming()).count();
                    prop_assert!(streaming <= 1);
                    if streaming == 1 {
                        prop_assert!(view.last().is_some_and(|m| m.is_streaming()));
                    }
                    let id = world.sessions[session].clone();
                    let persisted = world.store.load_messages(&id);
                    prop_assert!(persisted.iter().all(|m| m.status != MessageStatus::Streaming));
                }
            }
        }

        #[test]
        fn stale_tokens_never_mutate(
            ops in prop::collection::vec(op(), 0..30),
            session in 0..2usize,
            stream in 0..3usize,
            token in "[a-z]{1,6}",
        ) {
            let mut world = World::new();
            for op in &ops {
                world.apply(op);
            }
            prop_assume!(!world.is_active(session, stream));
            let before = [world.view(0), world.view(1)];
            world.apply(&Op::Token(session, stream, token));
            let after = [world.view(0), world.view(1)];
            prop_assert_eq!(before, after);
        }

        #[test]
        fn cancel_adds_at_most_one_final_message(tokens in prop::collection::vec("[a-z ]{0,4}", 0..6)) {
            let mut world = World::new();
            world.apply(&Op::Begin(0, 0));
            for token in &tokens {
                world.apply(&Op::Token(0, 0, token.clone()));
            }
            let before = world.store.load_messages(&world.sessions[0].clone()).len();
            world.apply(&Op::Cancel(0, 0));
            let after = world.view(0);
            let text: String = tokens.concat();
            if text.is_empty() {
                prop_assert_eq!(after.len(), before);
            } else {
                prop_assert_eq!(after.len(), before + 1);
                let last = after.last().unwrap();
                prop_assert_eq!(last.status, MessageStatus::Final);
                prop_assert_eq!(&last.content, &text);
            }
            prop_assert!(!world.reconciler.is_streaming(&world.sessions[0]));
        }
    }
}
