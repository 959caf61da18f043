use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{CompletionRequest, LlmCapability};
use crate::config::LlmTierConfig;
use crate::error::{EngramError, Result};

/// Thin provider adapter speaking the OpenAI-compatible chat completion
/// shape. The pipeline owns everything interesting (repair, verification,
/// retries-with-reduced-context); this just moves text.
pub struct HttpLlm {
    name: String,
    client: reqwest::Client,
    config: LlmTierConfig,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpLlm {
    pub fn new(name: impl Into<String>, config: LlmTierConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).ok();
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            config,
            api_key,
        }
    }

    fn transient(&self, reason: impl std::fmt::Display) -> EngramError {
        EngramError::TransientExternal {
            dependency: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl LlmCapability for HttpLlm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let system = match &request.schema_hint {
            Some(hint) => format!(
                "Respond with JSON only, no prose, matching this shape: {}",
                hint
            ),
            None => "Respond concisely.".to_string(),
        };

        let body = json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": request.prompt},
            ],
        });

        let mut http_request = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .timeout(request.timeout);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| self.transient(e))?;

        if !response.status().is_success() {
            return Err(self.transient(format!("provider returned {}", response.status())));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| self.transient(e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| self.transient("provider returned no choices"))
    }
}
