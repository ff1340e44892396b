//! OpenAI Assistants (v2) thread client.
//!
//! One exchange is: ensure thread, add the user message, create a run, poll it until it leaves
//! `queued`/`in_progress`, then read the assistant message produced by that run.
//! Polling backs off exponentially (see [`PollPolicy`]) and gives up after the policy deadline.

use crate::config::{Credentials, PollPolicy, SuperiaConfig};
use crate::error::{CoreError, CoreResult};
use crate::generator::{api_error, http_client, trim_base, Generation, TextGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");
pub const DEFAULT_ASSISTANT_TEMPERATURE: f32 = 0.7;

#[derive(Deserialize)]
struct ThreadObject {
    id: String,
}

#[derive(Serialize)]
struct NewMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct NewRun<'a> {
    assistant_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    temperature: f32,
}

/// Run object as returned by create/retrieve.
#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub last_error: Option<RunError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub message: Option<String>,
}

impl Run {
    pub fn is_pending(&self) -> bool {
        matches!(self.status.as_str(), "queued" | "in_progress")
    }
}

#[derive(Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<ThreadMessage>,
}

#[derive(Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<MessageText>,
}

#[derive(Deserialize)]
struct MessageText {
    value: String,
}

/// Low-level Assistants API client.
pub struct AssistantClient {
    api_key: String,
    base_url: String,
    poll: PollPolicy,
    client: reqwest::Client,
}

impl AssistantClient {
    pub fn new(api_key: impl Into<String>, base_url: &str) -> Self {
        Self {
            api_key: api_key.into().trim().to_string(),
            base_url: trim_base(base_url),
            poll: PollPolicy::default(),
            client: http_client(),
        }
    }

    pub fn from_config(config: &SuperiaConfig, credentials: &Credentials) -> CoreResult<Self> {
        let key = credentials.require_openai()?;
        Ok(Self::new(key, &config.openai_api_base).with_poll_policy(config.poll_policy()))
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header(BETA_HEADER.0, BETA_HEADER.1)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header(BETA_HEADER.0, BETA_HEADER.1)
    }

    pub async fn create_thread(&self) -> CoreResult<String> {
        let res = self.post("/threads").json(&serde_json::json!({})).send().await?;
        if !res.status().is_success() {
            return Err(api_error(res, "Thread creation").await);
        }
        let thread: ThreadObject = res.json().await?;
        debug!(thread = %thread.id, "Assistant thread created");
        Ok(thread.id)
    }

    pub async fn add_message(&self, thread_id: &str, content: &str) -> CoreResult<()> {
        let res = self
            .post(&format!("/threads/{}/messages", thread_id))
            .json(&NewMessage {
                role: "user",
                content,
            })
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(api_error(res, "Adding message").await);
        }
        Ok(())
    }

    pub async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: Option<&str>,
        temperature: f32,
    ) -> CoreResult<Run> {
        let res = self
            .post(&format!("/threads/{}/runs", thread_id))
            .json(&NewRun {
                assistant_id,
                instructions,
                temperature,
            })
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(api_error(res, "Run creation").await);
        }
        Ok(res.json().await?)
    }

    pub async fn get_run(&self, thread_id: &str, run_id: &str) -> CoreResult<Run> {
        let res = self
            .get(&format!("/threads/{}/runs/{}", thread_id, run_id))
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(api_error(res, "Run status check").await);
        }
        Ok(res.json().await?)
    }

    /// Poll until the run leaves `queued`/`in_progress`; anything but `completed` is an error.
    pub async fn wait_for_run(&self, thread_id: &str, mut run: Run) -> CoreResult<Run> {
        let started = Instant::now();
        let mut attempt = 0u32;
        while run.is_pending() {
            let elapsed = started.elapsed();
            if elapsed >= self.poll.deadline {
                warn!(run = %run.id, ?elapsed, "Assistant run poll deadline reached");
                return Err(CoreError::PollTimeout { elapsed });
            }
            let delay = self.poll.delay(attempt).min(self.poll.deadline - elapsed);
            tokio::time::sleep(delay).await;
            attempt += 1;
            run = self.get_run(thread_id, &run.id).await?;
            debug!(run = %run.id, status = %run.status, attempt, "Assistant run polled");
        }

        if run.status != "completed" {
            let message = run
                .last_error
                .as_ref()
                .and_then(|e| e.message.clone())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(CoreError::RunFailed {
                status: run.status,
                message,
            });
        }
        Ok(run)
    }

    /// Text of the assistant message produced by `run_id`, text parts joined with `\n`.
    pub async fn run_reply(&self, thread_id: &str, run_id: &str) -> CoreResult<String> {
        let res = self
            .get(&format!("/threads/{}/messages", thread_id))
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(api_error(res, "Fetching messages").await);
        }
        let list: MessageList = res.json().await?;
        let message = list
            .data
            .into_iter()
            .find(|m| m.role == "assistant" && m.run_id.as_deref() == Some(run_id))
            .ok_or_else(|| {
                CoreError::EmptyResponse("No assistant response found for this run".to_string())
            })?;

        Ok(message
            .content
            .into_iter()
            .filter(|c| c.kind == "text")
            .filter_map(|c| c.text.map(|t| t.value))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// One conversation: the thread id is created lazily and kept between calls.
/// Calls on the same thread are serialized; the API allows a single active run per thread.
#[derive(Default)]
pub struct AssistantThread {
    id: Mutex<Option<String>>,
}

impl AssistantThread {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume an existing thread.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Mutex::new(Some(id.into())),
        }
    }

    pub async fn id(&self) -> Option<String> {
        self.id.lock().await.clone()
    }

    /// Forget the thread; the next exchange starts a new conversation.
    pub async fn reset(&self) {
        *self.id.lock().await = None;
    }

    pub async fn exchange(
        &self,
        client: &AssistantClient,
        assistant_id: &str,
        instructions: Option<&str>,
        temperature: f32,
        input: &str,
    ) -> CoreResult<String> {
        let mut guard = self.id.lock().await;
        let thread_id = match guard.as_ref() {
            Some(id) => id.clone(),
            None => {
                let id = client.create_thread().await?;
                *guard = Some(id.clone());
                id
            }
        };

        client.add_message(&thread_id, input).await?;
        let run = client
            .create_run(&thread_id, assistant_id, instructions, temperature)
            .await?;
        let run = client.wait_for_run(&thread_id, run).await?;
        let reply = client.run_reply(&thread_id, &run.id).await?;
        info!(assistant = %assistant_id, thread = %thread_id, "Assistant reply received");
        Ok(reply)
    }
}

/// Assistant + thread as a [`TextGenerator`].
pub struct AssistantGenerator {
    client: AssistantClient,
    assistant_id: String,
    instructions: Option<String>,
    temperature: f32,
    thread: AssistantThread,
}

impl AssistantGenerator {
    pub fn new(client: AssistantClient, assistant_id: impl Into<String>) -> Self {
        Self {
            client,
            assistant_id: assistant_id.into(),
            instructions: None,
            temperature: DEFAULT_ASSISTANT_TEMPERATURE,
            thread: AssistantThread::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_thread(mut self, thread: AssistantThread) -> Self {
        self.thread = thread;
        self
    }

    pub fn thread(&self) -> &AssistantThread {
        &self.thread
    }
}

#[async_trait]
impl TextGenerator for AssistantGenerator {
    fn label(&self) -> String {
        self.assistant_id.clone()
    }

    async fn generate(&self, input: &str) -> CoreResult<Generation> {
        let text = self
            .thread
            .exchange(
                &self.client,
                &self.assistant_id,
                self.instructions.as_deref(),
                self.temperature,
                input,
            )
            .await?;
        Ok(Generation::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn fast_poll() -> PollPolicy {
        PollPolicy {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
            deadline: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn full_exchange_reuses_thread() {
        let server = MockServer::start();
        let create_thread = server.mock(|when, then| {
            when.method(POST)
                .path("/threads")
                .header("OpenAI-Beta", "assistants=v2");
            then.status(200).json_body(json!({"id": "thread_1"}));
        });
        let add_message = server.mock(|when, then| {
            when.method(POST)
                .path("/threads/thread_1/messages")
                .json_body(json!({"role": "user", "content": "hola"}));
            then.status(200).json_body(json!({"id": "msg_u"}));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/threads/thread_1/runs")
                .json_body(json!({"assistant_id": "asst_x", "temperature": 0.7}));
            then.status(200)
                .json_body(json!({"id": "run_1", "status": "queued"}));
        });
        let poll = server.mock(|when, then| {
            when.method(GET).path("/threads/thread_1/runs/run_1");
            then.status(200)
                .json_body(json!({"id": "run_1", "status": "completed"}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/threads/thread_1/messages");
            then.status(200).json_body(json!({"data": [
                {"role": "assistant", "run_id": "run_0", "content": [
                    {"type": "text", "text": {"value": "old"}}
                ]},
                {"role": "assistant", "run_id": "run_1", "content": [
                    {"type": "text", "text": {"value": "Hola,"}},
                    {"type": "image_file"},
                    {"type": "text", "text": {"value": "¿qué tal?"}}
                ]},
                {"role": "user", "run_id": null, "content": []}
            ]}));
        });

        let client = AssistantClient::new("sk-test", &server.base_url()).with_poll_policy(fast_poll());
        let generator = AssistantGenerator::new(client, "asst_x");
        let first = generator.generate("hola").await.unwrap();
        assert_eq!(first.text, "Hola,\n¿qué tal?");
        assert_eq!(generator.thread().id().await.as_deref(), Some("thread_1"));

        generator.generate("hola").await.unwrap();
        create_thread.assert_hits(1);
        add_message.assert_hits(2);
        poll.assert_hits(2);
    }

    #[tokio::test]
    async fn failed_run_reports_last_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/threads/t/messages");
            then.status(200).json_body(json!({}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/t/runs");
            then.status(200).json_body(json!({
                "id": "run_9",
                "status": "failed",
                "last_error": {"code": "rate_limit_exceeded", "message": "Rate limit reached"}
            }));
        });

        let client = AssistantClient::new("sk", &server.base_url()).with_poll_policy(fast_poll());
        let thread = AssistantThread::with_id("t");
        let err = thread
            .exchange(&client, "asst_x", None, 0.7, "hi")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Run failed with status: failed. Error: Rate limit reached"
        );
    }

    #[tokio::test]
    async fn stuck_run_times_out() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/threads/t/runs/run_s");
            then.status(200)
                .json_body(json!({"id": "run_s", "status": "in_progress"}));
        });

        let client = AssistantClient::new("sk", &server.base_url()).with_poll_policy(fast_poll());
        let run = Run {
            id: "run_s".to_string(),
            status: "queued".to_string(),
            last_error: None,
        };
        let err = client.wait_for_run("t", run).await.unwrap_err();
        assert!(matches!(err, CoreError::PollTimeout { .. }));
    }

    #[tokio::test]
    async fn missing_reply_for_run_is_empty_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/threads/t/messages");
            then.status(200).json_body(json!({"data": []}));
        });
        let client = AssistantClient::new("sk", &server.base_url());
        assert!(matches!(
            client.run_reply("t", "run_1").await,
            Err(CoreError::EmptyResponse(_))
        ));
    }
}
