//! REST client for the Codeius backend, and an [`AiTransport`] built on it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{Client as ReqwestClient, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{BACKEND_REQUESTS, BACKEND_REQUEST_ERRORS};
use crate::retry::{Idempotency, RetryPolicy};
use crate::transport::{AiTransport, EventSender, TransportEvent};
use crate::types::{CorrelationId, SessionId};

/// Where the backend listens unless told otherwise.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/";

/// Per-request timeout.  Generating an answer can take a while.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// A model the backend can switch to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Display name.
    pub name: String,
    /// Who serves the model.
    #[serde(default)]
    pub provider: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

/// Answer of the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Health {
    /// `healthy` when all is well.
    pub status: String,
    /// Human-readable detail.
    #[serde(default)]
    pub message: String,
}

impl Health {
    /// Returns true if the backend reports itself healthy.
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }
}

#[derive(Serialize)]
struct AskRequest<'a> {
    prompt: &'a str,
    session_id: &'a str,
}

#[derive(Deserialize)]
struct AskResponse {
    response: String,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: BTreeMap<String, ModelInfo>,
}

#[derive(Serialize)]
struct SwitchModelRequest<'a> {
    model_key: &'a str,
}

#[derive(Deserialize)]
struct ResultResponse {
    result: serde_json::Value,
}

impl ResultResponse {
    fn into_text(self) -> String {
        match self.result {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        }
    }
}

/// Client for the Codeius REST API.
#[derive(Debug, Clone)]
pub struct Backend {
    client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Backend {
    /// Creates a client for the default local backend.
    pub fn new() -> Result<Self> {
        Self::with_options(None, None, None)
    }

    /// Creates a client with custom settings.
    pub fn with_options(
        base_url: Option<&str>,
        timeout: Option<Duration>,
        retry: Option<RetryPolicy>,
    ) -> Result<Self> {
        let mut base = base_url.unwrap_or(DEFAULT_BASE_URL).to_string();
        // Url::join drops the last path segment unless it ends in a slash.
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::transport(
                    format!("failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self {
            client,
            base_url,
            timeout,
            retry: retry.unwrap_or_default(),
        })
    }

    /// Returns the API root.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Asks the assistant and returns its full reply.
    ///
    /// Not retried: a repeated prompt would be answered (and recorded) twice.
    pub async fn ask(&self, prompt: &str, session_id: &SessionId) -> Result<String> {
        let body = AskRequest {
            prompt,
            session_id: session_id.as_str(),
        };
        let response: AskResponse = self
            .retry
            .run("ask", Idempotency::NonIdempotent, || {
                self.post_json("ask", &body)
            })
            .await?;
        Ok(response.response)
    }

    /// Lists the models the backend offers, keyed by model key.
    pub async fn models(&self) -> Result<BTreeMap<String, ModelInfo>> {
        let response: ModelsResponse = self
            .retry
            .run("models", Idempotency::Idempotent, || self.get_json("models"))
            .await?;
        Ok(response.models)
    }

    /// Switches the backend to `model_key` and returns its confirmation.
    pub async fn switch_model(&self, model_key: &str) -> Result<String> {
        let body = SwitchModelRequest { model_key };
        let response: ResultResponse = self
            .retry
            .run("switch_model", Idempotency::Idempotent, || {
                self.post_json("switch_model", &body)
            })
            .await?;
        Ok(response.into_text())
    }

    /// Drops the backend's own conversation memory.
    pub async fn clear_history(&self) -> Result<String> {
        let body = serde_json::json!({});
        let response: ResultResponse = self
            .retry
            .run("clear_history", Idempotency::Idempotent, || {
                self.post_json("clear_history", &body)
            })
            .await?;
        Ok(response.into_text())
    }

    /// Checks that the backend is up.  Tried once.
    pub async fn health(&self) -> Result<Health> {
        self.get_json("health").await
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        tracing::debug!(%url, "GET");
        let response = self.client.get(url).send().await;
        self.read_json(path, response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.endpoint(path)?;
        tracing::debug!(%url, "POST");
        let response = self.client.post(url).json(body).send().await;
        self.read_json(path, response).await
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        path: &str,
        response: std::result::Result<Response, reqwest::Error>,
    ) -> Result<T> {
        BACKEND_REQUESTS.click();
        let result = match response {
            Ok(response) if response.status().is_success() => {
                response.json::<T>().await.map_err(|e| {
                    Error::serialization(
                        format!("failed to parse /{path} response: {e}"),
                        Some(Box::new(e)),
                    )
                })
            }
            Ok(response) => Err(error_from_response(response).await),
            Err(e) => Err(self.send_error(e)),
        };
        if let Err(err) = &result {
            BACKEND_REQUEST_ERRORS.click();
            tracing::debug!(path, error = %err, "backend request failed");
        }
        result
    }

    fn send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("request timed out: {e}"),
                Some(self.timeout.as_secs_f64()),
            )
        } else {
            Error::transport(format!("request failed: {e}"), Some(Box::new(e)))
        }
    }
}

async fn error_from_response(response: Response) -> Error {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
        details: Option<String>,
    }

    let status = response.status().as_u16();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => format!("unreadable error body: {e}"),
    };
    let message = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody {
            error: Some(error),
            details: Some(details),
        }) => format!("{error}: {details}"),
        Ok(ErrorBody {
            error: Some(error), ..
        }) => error,
        _ if body.trim().is_empty() => "no details".to_string(),
        _ => body,
    };
    if status == 408 {
        Error::timeout(message, None)
    } else {
        Error::api(status, message)
    }
}

/// Splits a reply into word-sized tokens that concatenate back to it.
pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(char::is_whitespace)
}

/////////////////////////////////////////// HttpTransport //////////////////////////////////////////

/// An [`AiTransport`] over the `/ask` endpoint.
///
/// The backend answers in one piece; the transport replays the answer as a
/// token stream so the rest of the engine sees the same events it would from
/// a streaming backend.  Tokens therefore arrive only once the whole answer
/// is in, and the backend's socket.io event channel is not used.  Cancelling
/// aborts the request task.
pub struct HttpTransport {
    backend: Arc<Backend>,
    events: EventSender,
    tasks: Mutex<HashMap<CorrelationId, AbortHandle>>,
}

impl HttpTransport {
    /// Creates a transport that reports on `events`.
    pub fn new(backend: Arc<Backend>, events: EventSender) -> Self {
        Self {
            backend,
            events,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<CorrelationId, AbortHandle>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl AiTransport for HttpTransport {
    async fn open_stream(&self, prompt: &str, session_id: &SessionId) -> Result<CorrelationId> {
        let correlation_id = CorrelationId::generate();
        let backend = self.backend.clone();
        let events = self.events.clone();
        let prompt = prompt.to_string();
        let session_id = session_id.clone();
        let id = correlation_id.clone();
        let handle = tokio::spawn(async move {
            let last = match backend.ask(&prompt, &session_id).await {
                Ok(reply) => {
                    for token in tokenize(&reply) {
                        let event = TransportEvent::TokenReceived {
                            correlation_id: id.clone(),
                            token: token.to_string(),
                        };
                        if events.send(event).is_err() {
                            return;
                        }
                        tokio::task::yield_now().await;
                    }
                    TransportEvent::StreamCompleted { correlation_id: id }
                }
                Err(err) => TransportEvent::StreamFailed {
                    correlation_id: id,
                    reason: err.to_string(),
                },
            };
            let _ = events.send(last);
        });
        let mut tasks = self.tasks();
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(correlation_id.clone(), handle.abort_handle());
        Ok(correlation_id)
    }

    async fn cancel(&self, correlation_id: &CorrelationId) -> Result<()> {
        if let Some(task) = self.tasks().remove(correlation_id) {
            task.abort();
            tracing::debug!(correlation = %correlation_id, "aborted backend request");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let backend = Backend::with_options(Some("http://example.test/api"), None, None).unwrap();
        assert_eq!(backend.base_url().as_str(), "http://example.test/api/");
        assert_eq!(
            backend.endpoint("models").unwrap().as_str(),
            "http://example.test/api/models"
        );
        let backend = Backend::new().unwrap();
        assert_eq!(backend.base_url().as_str(), DEFAULT_BASE_URL);
        assert_eq!(backend.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn bad_base_url_is_rejected() {
        let err = Backend::with_options(Some("not a url"), None, None).unwrap_err();
        assert!(matches!(err, Error::Url { .. }));
    }

    #[test]
    fn tokens_rebuild_the_reply() {
        let reply = "fn main() {\n    println!(\"hi\");\n}";
        let tokens: Vec<&str> = tokenize(reply).collect();
        assert!(tokens.len() > 3);
        assert_eq!(tokens.concat(), reply);
        assert_eq!(tokenize("").count(), 0);
    }

    #[test]
    fn wire_shapes() {
        let models: ModelsResponse = serde_json::from_str(
            r#"{"models": {"llama3": {"name": "Llama 3", "provider": "groq", "description": "fast"},
                           "bare": {"name": "Bare"}}}"#,
        )
        .unwrap();
        assert_eq!(models.models["llama3"].provider, "groq");
        assert_eq!(models.models["bare"].description, "");

        let ask = serde_json::to_value(AskRequest {
            prompt: "hi",
            session_id: "s1",
        })
        .unwrap();
        assert_eq!(ask, serde_json::json!({"prompt": "hi", "session_id": "s1"}));

        let result: ResultResponse = serde_json::from_str(r#"{"result": "Switched"}"#).unwrap();
        assert_eq!(result.into_text(), "Switched");
        let result: ResultResponse = serde_json::from_str(r#"{"result": true}"#).unwrap();
        assert_eq!(result.into_text(), "true");

        let health: Health =
            serde_json::from_str(r#"{"status": "healthy", "message": "running"}"#).unwrap();
        assert!(health.is_healthy());
    }

    #[tokio::test]
    async fn unreachable_backend_fails_the_stream() {
        let backend = Backend::with_options(
            Some("http://127.0.0.1:9/api/"),
            Some(Duration::from_secs(5)),
            Some(RetryPolicy::none()),
        )
        .unwrap();
        let (tx, mut rx) = crate::transport::event_channel();
        let transport = HttpTransport::new(Arc::new(backend), tx);
        let id = transport
            .open_stream("hello", &SessionId::from("s1"))
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            TransportEvent::StreamFailed { correlation_id, .. } => assert_eq!(correlation_id, id),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_unknown_stream_is_ok() {
        let (tx, _rx) = crate::transport::event_channel();
        let transport = HttpTransport::new(Arc::new(Backend::new().unwrap()), tx);
        transport.cancel(&CorrelationId::from("nope")).await.unwrap();
    }
}
