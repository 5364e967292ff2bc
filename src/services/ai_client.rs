use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::config::Settings;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct ChatMessage {
    pub(crate) role: &'static str,
    pub(crate) content: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct CompletionRequest {
    pub(crate) model: String,
    pub(crate) messages: Vec<ChatMessage>,
    pub(crate) temperature: f64,
    pub(crate) max_tokens: u32,
}

#[derive(Debug, Error)]
pub(crate) enum RemoteError {
    #[error("request timed out")]
    Timeout,
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("remote returned status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

impl RemoteError {
    pub(crate) fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status(429))
    }

    pub(crate) fn is_unreachable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connect(_))
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_decode() {
            Self::InvalidBody(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Chat-completions transport. Returns the decoded response envelope.
#[async_trait]
pub(crate) trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        api_key: &str,
        request: &CompletionRequest,
    ) -> Result<Value, RemoteError>;
}

#[derive(Debug, Clone)]
pub(crate) struct HttpCompletionBackend {
    client: Client,
    endpoint: String,
}

impl HttpCompletionBackend {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(settings.ai().request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, endpoint: format!("{}/chat/completions", settings.ai().base_url) })
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionBackend {
    async fn complete(
        &self,
        api_key: &str,
        request: &CompletionRequest,
    ) -> Result<Value, RemoteError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(RemoteError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        let raw = response.text().await.map_err(RemoteError::from_reqwest)?;
        serde_json::from_str(&raw).map_err(|err| RemoteError::InvalidBody(err.to_string()))
    }
}
