//! OpenAI-compatible chat completions client (`POST {base}/chat/completions`).
//!
//! Works against Groq, OpenRouter and OpenAI. The persona instructions travel as the system
//! message and the utterance as the single user message.

use crate::config::{Credentials, SuperiaConfig};
use crate::error::{CoreError, CoreResult};
use crate::generator::{api_error, http_client, trim_base, Generation, TextGenerator, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

pub struct ChatClient {
    api_key: String,
    base_url: String,
    model: String,
    instructions: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(api_key: impl Into<String>, base_url: &str, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into().trim().to_string(),
            base_url: trim_base(base_url),
            model: model.into(),
            instructions: None,
            temperature: None,
            max_tokens: None,
            client: http_client(),
        }
    }

    /// Build against `chat_api_base` with `CHAT_API_KEY` / `GROQ_API_KEY`.
    pub fn from_config(
        config: &SuperiaConfig,
        credentials: &Credentials,
        model: impl Into<String>,
    ) -> CoreResult<Self> {
        let key = credentials.require_chat()?;
        Ok(Self::new(key, &config.chat_api_base, model))
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[async_trait]
impl TextGenerator for ChatClient {
    fn label(&self) -> String {
        self.model.clone()
    }

    async fn generate(&self, input: &str) -> CoreResult<Generation> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.instructions.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: input,
        });
        let body = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        debug!(model = %self.model, "Chat completion request");

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(api_error(res, "Chat completion").await);
        }

        let parsed: ChatResponse = res.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                CoreError::EmptyResponse(format!("model {} returned no choices", self.model))
            })?;

        let usage = parsed.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        info!(model = %self.model, chars = text.len(), "Chat reply received");
        Ok(Generation { text, usage })
    }
}
