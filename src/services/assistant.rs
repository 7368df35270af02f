//! Relay chat prompts to the Gemini `generateContent` API.

use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::config::AssistantConfig;
use crate::error::{AppError, AppResult};
use crate::models::assistant::{GenerateRequest, GenerateResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AssistantService {
    client: reqwest::Client,
    config: AssistantConfig,
}

impl AssistantService {
    pub fn new(config: AssistantConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("http client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        )
    }

    /// One prompt, one reply. No conversation memory is kept server side.
    #[instrument(skip(self, prompt), fields(model = %self.config.model, prompt_len = prompt.len()))]
    pub async fn reply(&self, prompt: &str) -> AppResult<String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Unavailable("assistant is not configured".to_string()))?;

        let res = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&GenerateRequest::user_prompt(prompt))
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("assistant request failed: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            warn!(%status, "assistant upstream error");
            return Err(AppError::Upstream(format!("assistant returned {}", status)));
        }

        let body: GenerateResponse = res
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("assistant response unreadable: {}", e)))?;

        match body.reply_text() {
            Some(text) => {
                info!(reply_len = text.len(), "assistant replied");
                Ok(text)
            }
            None => {
                let reason = body.block_reason().unwrap_or("empty reply");
                warn!(reason, "assistant gave no text");
                Err(AppError::Upstream(format!("assistant gave no reply: {}", reason)))
            }
        }
    }
}
