use crate::error::GenerationError;
use crate::openai_types::{OpenAIBatchResponse, OpenAIMessage, OpenAIPayload};

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const MAX_REPLY_TOKENS: u32 = 100;

/// Text-in/text-out conversational backend.  One call per conversational turn,
/// with no memory of earlier turns.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn reply(&self, system: &str, user: &str) -> Result<String, GenerationError>;
}

pub struct OpenAIGenerator {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAIGenerator {
    pub fn new(http_client: reqwest::Client, api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            http_client,
            api_key,
            model,
            timeout,
        }
    }
}

#[async_trait]
impl ResponseGenerator for OpenAIGenerator {
    async fn reply(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        let payload = OpenAIPayload {
            model: self.model.clone(),
            messages: vec![OpenAIMessage::system(system), OpenAIMessage::user(user)],
            max_tokens: Some(MAX_REPLY_TOKENS),
        };
        let key = self.api_key.as_str();
        let resp = self
            .http_client
            .post(OPENAI_CHAT_URL)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, "failed to send request to OpenAI");
                if e.is_timeout() {
                    GenerationError::Timeout(self.timeout.as_millis())
                } else {
                    GenerationError::Transport(e.to_string())
                }
            })?;
        if !resp.status().is_success() {
            error!(status=%resp.status(), "OpenAI returned an error status");
            return Err(GenerationError::Status(resp.status().as_u16()));
        }
        let resp = resp.json::<OpenAIBatchResponse>().await.map_err(|e| {
            error!(error=%e, "failed to deserialize OpenAI completion");
            GenerationError::Malformed(e.to_string())
        })?;
        debug!(id=%resp.id, model=%resp.model, "got OpenAI completion");
        extract_reply(resp)
    }
}

fn extract_reply(resp: OpenAIBatchResponse) -> Result<String, GenerationError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::Malformed("no choices in completion".to_string()))?;
    let text = choice.message.content.trim();
    if text.is_empty() {
        return Err(GenerationError::Malformed("blank completion".to_string()));
    }
    Ok(text.to_string())
}
