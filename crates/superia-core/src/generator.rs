//! Text generation seam shared by every persona backend.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token accounting reported by the vendor, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// One completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// Produces a reply for one user utterance. Implementations carry their own model,
/// instructions and credentials; the voice loop only hands over the input text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short label used in logs and side-by-side comparison output.
    fn label(&self) -> String;

    async fn generate(&self, input: &str) -> CoreResult<Generation>;
}

/// Error envelope shared by OpenAI-compatible APIs: `{"error": {"message": ...}}`.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Turn a non-2xx response into `CoreError::Http`, preferring the vendor's `error.message`.
pub(crate) async fn api_error(res: reqwest::Response, operation: &str) -> CoreError {
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    CoreError::Http {
        status,
        message: error_message(&body, operation, status),
    }
}

pub(crate) fn error_message(body: &str, operation: &str, status: u16) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error)
        .and_then(|e| e.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("{} failed with status {}", operation, status))
}

/// Shared HTTP client. No request timeout: a stalled call waits until the caller cancels it.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub(crate) fn trim_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_message_wins() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(
            error_message(body, "API request", 401),
            "Incorrect API key provided"
        );
    }

    #[test]
    fn fallback_message_names_status() {
        assert_eq!(
            error_message("<html>bad gateway</html>", "API request", 502),
            "API request failed with status 502"
        );
        assert_eq!(
            error_message(r#"{"error":{}}"#, "Run creation", 500),
            "Run creation failed with status 500"
        );
    }
}
