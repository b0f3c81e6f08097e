use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::ClientError;
use crate::db::enums::AiProvider;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Chat-completion client used by the in-process runner. Remote workers talk
/// to their provider themselves; this client only serves bots hosted in this
/// process.
pub struct AiClient {
    client: Client,
    openai_url: String,
    anthropic_url: String,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ChatTurn,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ChatTurn],
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: String,
}

impl Default for AiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AiClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            openai_url: "https://api.openai.com/v1/chat/completions".to_string(),
            anthropic_url: "https://api.anthropic.com/v1/messages".to_string(),
        }
    }

    /// One completion over the supplied (already bounded) history. The last
    /// turn is the pending user message.
    pub async fn complete(
        &self,
        provider: AiProvider,
        token: &str,
        model: &str,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<String, ClientError> {
        match provider {
            AiProvider::OpenAi | AiProvider::Custom => {
                self.complete_openai(token, model, system_prompt, history).await
            }
            AiProvider::Anthropic => {
                self.complete_anthropic(token, model, system_prompt, history).await
            }
        }
    }

    async fn complete_openai(
        &self,
        token: &str,
        model: &str,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<String, ClientError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatTurn {
            role: "system".to_string(),
            content: system_prompt.to_string(),
        });
        messages.extend_from_slice(history);

        let response = self
            .client
            .post(&self.openai_url)
            .bearer_auth(token)
            .json(&OpenAiRequest { model, messages })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(ClientError::ApiError { status, body });
        }

        let parsed: OpenAiResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ClientError::BadResponse("completion had no choices".to_string()))
    }

    async fn complete_anthropic(
        &self,
        token: &str,
        model: &str,
        system_prompt: &str,
        history: &[ChatTurn],
    ) -> Result<String, ClientError> {
        let response = self
            .client
            .post(&self.anthropic_url)
            .header("x-api-key", token)
            .header("anthropic-version", "2023-06-01")
            .json(&AnthropicRequest {
                model,
                max_tokens: 1024,
                system: system_prompt,
                messages: history,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(ClientError::ApiError { status, body });
        }

        let parsed: AnthropicResponse = response.json().await?;
        parsed
            .content
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| ClientError::BadResponse("completion had no content".to_string()))
    }
}
