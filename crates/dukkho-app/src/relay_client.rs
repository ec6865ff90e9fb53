// HTTP client for the relay's chat endpoint.

use dukkho_core::config::Config;
use dukkho_core::protocol::{ChatRequest, ErrorBody, Turn};
use tracing::debug;

use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    url: String,
}

impl RelayClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.client.relay_url.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST one exchange and return the streaming response.
    ///
    /// Any non-2xx status is an error; its JSON error body, when present,
    /// becomes the message.
    pub async fn open(&self, history: &[Turn], message: &str) -> Result<reqwest::Response, ClientError> {
        let body = ChatRequest {
            message: message.to_string(),
            history: history.to_vec(),
        };
        debug!(url = %self.url, history = history.len(), "opening relay stream");

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        Ok(response)
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error,
            details: Some(details),
        }) => format!("{error}: {details}"),
        Ok(ErrorBody { error, details: None }) => error,
        Err(_) => body.trim().to_string(),
    }
}
