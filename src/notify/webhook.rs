//! Webhook sink that forwards engine events to an HTTP endpoint.
//!
//! Each event is posted as JSON on the ambient tokio runtime. Delivery is
//! fire-and-forget: failures are logged and never retried.

use crate::notify::bus::{EngineEvent, EventSink, SinkError};
use std::time::Duration;
use thiserror::Error;

/// Webhook endpoint configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Endpoint receiving `POST` requests
    pub url: String,
    /// Optional bearer token
    pub token: Option<String>,
    pub timeout: Duration,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Webhook setup errors.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Event sink posting each event to a webhook.
pub struct WebhookSink {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(config: WebhookConfig) -> Result<Self, WebhookError> {
        let url = reqwest::Url::parse(&config.url)
            .map_err(|e| WebhookError::InvalidUrl(format!("{}: {e}", config.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(WebhookError::InvalidUrl(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| WebhookError::Client(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

impl EventSink for WebhookSink {
    fn deliver(&self, event: &EngineEvent) -> Result<(), SinkError> {
        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| SinkError::Unavailable)?;

        let mut request = self.client.post(&self.config.url).json(event);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let url = self.config.url.clone();

        handle.spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::debug!(%url, status = response.status().as_u16(), "webhook rejected event");
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(%url, "webhook delivery failed: {e}"),
            }
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{EngineSignal, SuggestionKind};

    #[test]
    fn test_rejects_bad_urls() {
        assert!(WebhookSink::new(WebhookConfig::new("not a url")).is_err());
        assert!(WebhookSink::new(WebhookConfig::new("ftp://example.com/hook")).is_err());
        assert!(WebhookSink::new(WebhookConfig::new("http://127.0.0.1:9/hook")).is_ok());
    }

    #[test]
    fn test_no_runtime_is_unavailable() {
        let sink = WebhookSink::new(WebhookConfig::new("http://127.0.0.1:9/hook")).unwrap();
        let event = EngineEvent::from_signal(
            "s",
            &EngineSignal::Suggestion {
                score: 80.0,
                kind: SuggestionKind::Strong,
            },
        );
        assert_eq!(sink.deliver(&event), Err(SinkError::Unavailable));
    }
}
