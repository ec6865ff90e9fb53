// HTTP relay between chat clients and the upstream model.
//
// `POST /api/chat` takes `{ message, history }`, opens a model stream and
// pipes every text fragment straight into the response body. Failures before
// the stream opens are answered with a JSON error body and status 500;
// failures after that abort the body so the client sees a truncated
// response instead of a clean end.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use dukkho_core::protocol::{ChatRequest, ErrorBody};
use dukkho_llm::{ChatModel, LlmError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures that happen before any response byte is streamed.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("API Key not configured")]
    MissingApiKey,

    #[error("invalid request body: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Upstream(LlmError),
}

impl From<LlmError> for RelayError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::MissingApiKey => RelayError::MissingApiKey,
            other => RelayError::Upstream(other),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = match &self {
            RelayError::MissingApiKey => {
                error!("chat request rejected: Gemini API key is missing");
                ErrorBody {
                    error: self.to_string(),
                    details: None,
                }
            }
            other => {
                error!(error = %other, "chat request failed before streaming");
                ErrorBody {
                    error: "Internal Server Error".to_string(),
                    details: Some(other.to_string()),
                }
            }
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct RelayState {
    model: Arc<dyn ChatModel>,
}

/// Build the relay's routes around the given model.
pub fn router(model: Arc<dyn ChatModel>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/health", get(health))
        .with_state(RelayState { model })
}

/// Serve the relay on an already-bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, model: Arc<dyn ChatModel>, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("Relay listening on http://{addr}");
    axum::serve(listener, router(model))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn chat(
    State(state): State<RelayState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, RelayError> {
    let Json(request) = payload.map_err(|e| RelayError::BadRequest(e.body_text()))?;
    info!(
        history = request.history.len(),
        message_chars = request.message.chars().count(),
        "relaying chat message"
    );

    let fragments = state
        .model
        .stream_chat(&request.history, &request.message)
        .await?;

    let fragments = fragments.inspect(|item| {
        if let Err(err) = item {
            warn!(error = %err, "upstream failed mid-stream; aborting response body");
        }
    });

    Ok(Response::new(Body::from_stream(fragments)))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
