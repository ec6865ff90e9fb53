// Gemini API streaming client using reqwest-eventsource.
//
// Opens `:streamGenerateContent?alt=sse` with the Dukkho persona, the
// permissive safety settings and the conversation so far, then exposes the
// model's text fragments as a stream. The stream is only handed out once the
// upstream has accepted the request, so callers can still report a clean
// error before they start relaying anything.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use dukkho_core::config::Config;
use dukkho_core::protocol::Turn;

use crate::persona;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Upper bound on how much of an upstream error body ends up in messages.
const MAX_ERROR_BODY: usize = 300;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("API key not configured")]
    MissingApiKey,

    #[error("API returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("network error: {0}")]
    Transport(String),

    #[error("unexpected content type: {0}")]
    InvalidContentType(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("stream error: {0}")]
    Stream(String),
}

// ---------------------------------------------------------------------------
// ChatModel seam
// ---------------------------------------------------------------------------

/// Text fragments of one model response, in arrival order. An `Err` item
/// means the response was cut short; nothing follows it.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Anything that can stream a chat completion for a conversation.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start generating a reply to `message` given the earlier `history`.
    ///
    /// Resolves once the upstream has accepted the request; failures that
    /// happen before that are returned here rather than through the stream.
    async fn stream_chat(&self, history: &[Turn], message: &str) -> Result<TextStream, LlmError>;
}

// ---------------------------------------------------------------------------
// GeminiClient
// ---------------------------------------------------------------------------

/// Low-level Gemini API streaming client.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    api_base: String,
}

/// A model advertised by the API that supports `generateContent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub display_name: Option<String>,
}

impl GeminiClient {
    /// Create a new client with the given API key and model identifier.
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Point the client at a different API root (tests, proxies).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.api_base, self.model
        )
    }

    /// List models that support `generateContent`, following pagination.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{}/models", self.api_base))
                .header(API_KEY_HEADER, &self.api_key);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| LlmError::Transport(e.to_string()))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| LlmError::Transport(e.to_string()))?;
            if !status.is_success() {
                return Err(LlmError::Status {
                    status: status.as_u16(),
                    message: api_error_message(&body),
                });
            }

            let (page, next) = parse_model_page(&body)?;
            models.extend(page);
            match next {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(models)
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn stream_chat(&self, history: &[Turn], message: &str) -> Result<TextStream, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let body = request_body(history, message);
        let request = self
            .http
            .post(self.stream_url())
            .header(API_KEY_HEADER, &self.api_key)
            .header("content-type", "application/json")
            .json(&body);

        let mut es = request
            .eventsource()
            .map_err(|e| LlmError::Stream(format!("failed to create event source: {e}")))?;
        // A dropped stream is a failed stream; never reconnect.
        es.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        debug!(model = %self.model, turns = history.len(), "opening Gemini stream");

        // Wait for the connection to open so HTTP-level failures surface
        // before any byte is relayed.
        let first = match es.next().await {
            Some(Ok(Event::Open)) => {
                debug!("SSE connection opened");
                None
            }
            Some(Ok(Event::Message(msg))) => Some(msg.data),
            Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                es.close();
                return Err(LlmError::Stream(
                    "stream closed before the response started".to_string(),
                ));
            }
            Some(Err(err)) => {
                es.close();
                warn!(?err, "Gemini stream failed to open");
                return Err(describe_error(err).await);
            }
        };

        let head = match first.map(|data| parse_chunk(&data)).transpose() {
            Ok(text) => text.flatten(),
            Err(err) => {
                es.close();
                return Err(err);
            }
        };
        Ok(Box::pin(stream::iter(head.map(Ok)).chain(fragments(es))))
    }
}

/// Turn an open event source into a stream of non-empty text fragments.
/// The source is closed on end of stream or on the first error.
fn fragments(es: EventSource) -> impl Stream<Item = Result<String, LlmError>> + Send {
    stream::unfold(Some(es), |state| async move {
        let mut es = state?;
        loop {
            match es.next().await {
                Some(Ok(Event::Open)) => continue,
                Some(Ok(Event::Message(msg))) => match parse_chunk(&msg.data) {
                    Ok(Some(text)) => return Some((Ok(text), Some(es))),
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(%err, "Gemini reported an error mid-stream");
                        es.close();
                        return Some((Err(err), None));
                    }
                },
                Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                    debug!("Gemini stream complete");
                    es.close();
                    return None;
                }
                Some(Err(err)) => {
                    warn!(?err, "Gemini stream interrupted");
                    es.close();
                    return Some((Err(describe_error(err).await), None));
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// LlmClient wrapper
// ---------------------------------------------------------------------------

/// High-level wrapper that can be either an active Gemini client or disabled.
pub enum LlmClient {
    /// Gemini API is configured and ready.
    Active(GeminiClient),
    /// No API key configured; every request fails with `MissingApiKey`.
    Disabled,
}

impl LlmClient {
    /// Build an `LlmClient` from the application config.
    ///
    /// Returns `Active` if an API key is present, otherwise `Disabled`.
    pub fn from_config(config: &Config) -> Self {
        match config.credentials.api_key() {
            Some(key) => LlmClient::Active(
                GeminiClient::new(key.to_string(), config.model.name.clone())
                    .with_api_base(config.model.api_base.clone()),
            ),
            None => LlmClient::Disabled,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, LlmClient::Active(_))
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn stream_chat(&self, history: &[Turn], message: &str) -> Result<TextStream, LlmError> {
        match self {
            LlmClient::Active(client) => client.stream_chat(history, message).await,
            LlmClient::Disabled => Err(LlmError::MissingApiKey),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response JSON helpers
// ---------------------------------------------------------------------------

/// Build the `streamGenerateContent` request body: persona, safety settings,
/// the history as `{ role, parts: [{ text }] }` contents, then the new message.
pub(crate) fn request_body(history: &[Turn], message: &str) -> Value {
    let mut contents: Vec<Value> = history
        .iter()
        .map(|turn| {
            json!({
                "role": turn.role.as_str(),
                "parts": [{ "text": turn.text }]
            })
        })
        .collect();
    contents.push(json!({
        "role": "user",
        "parts": [{ "text": message }]
    }));

    json!({
        "systemInstruction": { "parts": [{ "text": persona::SYSTEM_PROMPT }] },
        "safetySettings": persona::safety_settings(),
        "contents": contents,
    })
}

/// Extract the text of one SSE `data:` payload.
///
/// Expected shape: `{ "candidates": [{ "content": { "parts": [{ "text": "..." }] } }] }`.
/// Returns `Ok(None)` for payloads without text (metadata-only chunks,
/// unparseable data) and `Err` for API errors and blocked prompts.
pub(crate) fn parse_chunk(data: &str) -> Result<Option<String>, LlmError> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "ignoring unparseable SSE payload");
            return Ok(None);
        }
    };

    if let Some(err) = v.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(LlmError::Upstream(message.to_string()));
    }

    let Some(candidate) = v.get("candidates").and_then(|c| c.get(0)) else {
        if let Some(reason) = v
            .get("promptFeedback")
            .and_then(|f| f.get("blockReason"))
            .and_then(Value::as_str)
        {
            return Err(LlmError::Upstream(format!("prompt blocked: {reason}")));
        }
        return Ok(None);
    };

    let text: String = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| !p.get("thought").and_then(Value::as_bool).unwrap_or(false))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

/// Parse one page of `GET /models`, returning the usable models and the
/// next page token.
pub(crate) fn parse_model_page(body: &str) -> Result<(Vec<ModelInfo>, Option<String>), LlmError> {
    let v: Value = serde_json::from_str(body)
        .map_err(|e| LlmError::Upstream(format!("invalid model list: {e}")))?;

    let models = v
        .get("models")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter(|m| {
                    m.get("supportedGenerationMethods")
                        .and_then(Value::as_array)
                        .is_some_and(|methods| {
                            methods.iter().any(|x| x.as_str() == Some("generateContent"))
                        })
                })
                .filter_map(|m| {
                    let name = m.get("name")?.as_str()?;
                    Some(ModelInfo {
                        name: name.trim_start_matches("models/").to_string(),
                        display_name: m
                            .get("displayName")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let next = v
        .get("nextPageToken")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    Ok((models, next))
}

/// Pull `error.message` out of an API error body, falling back to the
/// (truncated) raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY).collect())
}

/// Convert an SSE error into an `LlmError`, reading the body of error
/// responses for the API's own message.
async fn describe_error(err: reqwest_eventsource::Error) -> LlmError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            LlmError::Status {
                status: status.as_u16(),
                message: api_error_message(&body),
            }
        }
        reqwest_eventsource::Error::InvalidContentType(header, _response) => {
            LlmError::InvalidContentType(header.to_str().unwrap_or("<non-ascii>").to_string())
        }
        reqwest_eventsource::Error::Transport(e) => LlmError::Transport(e.to_string()),
        other => LlmError::Stream(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
