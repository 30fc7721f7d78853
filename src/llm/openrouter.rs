//! OpenRouter gateway implementation
//!
//! One OpenAI-compatible chat-completions endpoint covers every council
//! model, so this is the only provider protocol the service speaks.
//!
//! SECURITY: the OPENROUTER_API_KEY is only ever sent to the configured
//! OpenRouter endpoint, never to any third-party service.

use super::{ChatMessage, GatewayError, ModelGateway};
use crate::config::GatewayConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Official OpenRouter API endpoint
const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Delay between retry attempts, scaled by attempt number
const RETRY_BACKOFF_MS: u64 = 500;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Gateway speaking the OpenRouter chat-completions protocol
pub struct OpenRouterGateway {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    referer: Option<String>,
    app_name: Option<String>,
    max_attempts: u32,
}

impl OpenRouterGateway {
    /// Create a gateway using the OPENROUTER_API_KEY environment variable
    pub fn from_env(config: &GatewayConfig) -> Result<Self> {
        let api_key = env::var("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY environment variable not set")?;
        Self::new(api_key, config)
    }

    pub fn new(api_key: impl Into<String>, config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: OPENROUTER_API_URL.to_string(),
            referer: config.referer.clone(),
            app_name: config.app_name.clone(),
            max_attempts: config.max_attempts.max(1),
        })
    }

    /// Override the endpoint URL (tests point this at a local server)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn attempt(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, GatewayError> {
        let body = ChatCompletionRequest { model, messages };

        let mut request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(referer) = &self.referer {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(app_name) = &self.app_name {
            request = request.header("X-Title", app_name);
        }

        let response = request
            .send()
            .await
            .map_err(GatewayError::from_network_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_http_status(status, error_text));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(format!("invalid completion body: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GatewayError::Malformed("completion carried no content".to_string()))
    }
}

#[async_trait]
impl ModelGateway for OpenRouterGateway {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn invoke(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, GatewayError> {
        let mut attempt = 1;
        loop {
            match self.attempt(model, messages).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    tracing::warn!(
                        "Gateway call to {} failed (attempt {}/{}): {}",
                        model,
                        attempt,
                        self.max_attempts,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64))
                        .await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!("Gateway call to {} failed: {}", model, e);
                    return Err(e);
                }
            }
        }
    }
}
