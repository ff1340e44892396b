//! OpenAI Responses API client (`POST {base}/responses`).
//!
//! Used by personas backed by fine-tuned models. The reply text is the concatenation of every
//! `output_text` content part across the `output` items.

use crate::config::{Credentials, SuperiaConfig};
use crate::error::{CoreError, CoreResult};
use crate::generator::{api_error, http_client, trim_base, Generation, TextGenerator, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ResponsesBody {
    #[serde(default)]
    output: Vec<OutputItem>,
    usage: Option<ResponsesUsage>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Responses client bound to one model and one set of instructions.
pub struct ResponsesClient {
    api_key: String,
    base_url: String,
    model: String,
    instructions: Option<String>,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl ResponsesClient {
    /// Create a client with an explicit API key against `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(api_key: impl Into<String>, base_url: &str, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into().trim().to_string(),
            base_url: trim_base(base_url),
            model: model.into(),
            instructions: None,
            temperature: None,
            client: http_client(),
        }
    }

    /// Build from workspace config; fails with `MissingCredential` when no OpenAI key is set.
    pub fn from_config(
        config: &SuperiaConfig,
        credentials: &Credentials,
        model: impl Into<String>,
    ) -> CoreResult<Self> {
        let key = credentials.require_openai()?;
        Ok(Self::new(key, &config.openai_api_base, model))
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for ResponsesClient {
    fn label(&self) -> String {
        self.model.clone()
    }

    async fn generate(&self, input: &str) -> CoreResult<Generation> {
        let url = format!("{}/responses", self.base_url);
        let body = ResponsesRequest {
            model: &self.model,
            input,
            instructions: self.instructions.as_deref(),
            temperature: self.temperature,
        };
        debug!(model = %self.model, "Responses request");

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(api_error(res, "API request").await);
        }

        let parsed: ResponsesBody = res.json().await?;
        let text: String = parsed
            .output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|part| part.kind == "output_text")
            .map(|part| part.text.as_str())
            .collect();

        if text.trim().is_empty() {
            return Err(CoreError::EmptyResponse(format!(
                "model {} returned no output_text",
                self.model
            )));
        }

        let usage = parsed.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            total_tokens: u.total_tokens,
        });
        info!(model = %self.model, chars = text.len(), "Responses reply received");
        Ok(Generation { text, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn concatenates_output_text_parts() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/responses")
                .header("authorization", "Bearer sk-test")
                .json_body(json!({
                    "model": "ft:test",
                    "input": "hello",
                    "instructions": "be brief",
                    "temperature": 0.4
                }));
            then.status(200).json_body(json!({
                "output": [
                    {"type": "reasoning", "content": []},
                    {"type": "message", "content": [
                        {"type": "output_text", "text": "Hi "},
                        {"type": "refusal", "text": "ignored"},
                        {"type": "output_text", "text": "there"}
                    ]}
                ],
                "usage": {"input_tokens": 5, "output_tokens": 2, "total_tokens": 7}
            }));
        });

        let client = ResponsesClient::new("sk-test", &server.base_url(), "ft:test")
            .with_instructions("be brief")
            .with_temperature(0.4);
        let out = client.generate("hello").await.unwrap();
        mock.assert();
        assert_eq!(out.text, "Hi there");
        assert_eq!(out.usage.unwrap().total_tokens, 7);
    }

    #[tokio::test]
    async fn non_success_uses_vendor_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/responses");
            then.status(404)
                .json_body(json!({"error": {"message": "The model does not exist"}}));
        });

        let client = ResponsesClient::new("sk-test", &server.base_url(), "ft:gone");
        match client.generate("hello").await {
            Err(CoreError::Http { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "The model does not exist");
            }
            other => panic!("expected Http error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_output_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/responses");
            then.status(200).json_body(json!({"output": []}));
        });

        let client = ResponsesClient::new("sk-test", &server.base_url(), "ft:test");
        assert!(matches!(
            client.generate("hello").await,
            Err(CoreError::EmptyResponse(_))
        ));
    }
}
