use biometrics::{Collector, Counter, Moments};

pub(crate) static SESSIONS_CREATED: Counter = Counter::new("codeius.sessions.created");
pub(crate) static SESSIONS_DELETED: Counter = Counter::new("codeius.sessions.deleted");
pub(crate) static MESSAGES_APPENDED: Counter = Counter::new("codeius.messages.appended");

pub(crate) static PERSISTENCE_WRITES: Counter = Counter::new("codeius.persistence.writes");
pub(crate) static PERSISTENCE_ERRORS: Counter = Counter::new("codeius.persistence.errors");

pub(crate) static STREAMS_STARTED: Counter = Counter::new("codeius.stream.started");
pub(crate) static STREAMS_COMPLETED: Counter = Counter::new("codeius.stream.completed");
pub(crate) static STREAMS_CANCELLED: Counter = Counter::new("codeius.stream.cancelled");
pub(crate) static STREAMS_ERRORED: Counter = Counter::new("codeius.stream.errored");
pub(crate) static STREAM_TOKENS: Counter = Counter::new("codeius.stream.tokens");
pub(crate) static STREAM_STALE_EVENTS: Counter = Counter::new("codeius.stream.stale_events");
pub(crate) static STREAM_DURATION: Moments = Moments::new("codeius.stream.duration_seconds");

pub(crate) static COMMANDS_DISPATCHED: Counter = Counter::new("codeius.commands.dispatched");
pub(crate) static COMMANDS_UNKNOWN: Counter = Counter::new("codeius.commands.unknown");
pub(crate) static COMMANDS_UNSUPPORTED: Counter = Counter::new("codeius.commands.unsupported");
pub(crate) static COMMANDS_FAILED: Counter = Counter::new("codeius.commands.failed");

pub(crate) static BACKEND_REQUESTS: Counter = Counter::new("codeius.backend.requests");
pub(crate) static BACKEND_REQUEST_ERRORS: Counter = Counter::new("codeius.backend.request_errors");
pub(crate) static BACKEND_RETRIES: Counter = Counter::new("codeius.backend.retries");
pub(crate) static BACKEND_RETRY_BACKOFF: Moments =
    Moments::new("codeius.backend.retry_backoff_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&SESSIONS_CREATED);
    collector.register_counter(&SESSIONS_DELETED);
    collector.register_counter(&MESSAGES_APPENDED);

    collector.register_counter(&PERSISTENCE_WRITES);
    collector.register_counter(&PERSISTENCE_ERRORS);

    collector.register_counter(&STREAMS_STARTED);
    collector.register_counter(&STREAMS_COMPLETED);
    collector.register_counter(&STREAMS_CANCELLED);
    collector.register_counter(&STREAMS_ERRORED);
    collector.register_counter(&STREAM_TOKENS);
    collector.register_counter(&STREAM_STALE_EVENTS);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&COMMANDS_DISPATCHED);
    collector.register_counter(&COMMANDS_UNKNOWN);
    collector.register_counter(&COMMANDS_UNSUPPORTED);
    collector.register_counter(&COMMANDS_FAILED);

    collector.register_counter(&BACKEND_REQUESTS);
    collector.register_counter(&BACKEND_REQUEST_ERRORS);
    collector.register_counter(&BACKEND_RETRIES);
    collector.register_moments(&BACKEND_RETRY_BACKOFF);
}

#[cfg(test)]
mod tests {
    use super::*;
    use biometrics::Sensor;

    #[test]
    fn counters_register_and_count() {
        register_biometrics(Collector::new());
        let before = STREAM_STALE_EVENTS.read();
        STREAM_STALE_EVENTS.click();
        assert!(STREAM_STALE_EVENTS.read() > before);
    }
}
