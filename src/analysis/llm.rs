//! Chat-completion client for the analysis stages.
//!
//! Speaks the OpenAI-compatible `/chat/completions` surface so the base URL
//! can point at any compatible gateway. Requests are pinned to a fixed seed
//! so repeated runs over the same contract stay comparable.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Fixed sampling seed for reproducible stage output.
const CHAT_SEED: u64 = 63;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited")]
    RateLimited,
    #[error("http transport error: {0}")]
    Http(String),
    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One stage call. `store` forwards the conversation-retention flag; when
/// set, the request carries `store: true` and a metadata envelope naming
/// the stage.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub stage: &'a str,
    pub model: &'a str,
    pub system: &'a str,
    pub user: &'a str,
    pub store: bool,
}

pub trait ChatClient: Send + Sync {
    fn chat(&self, request: &ChatRequest<'_>) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    seed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<ApiMetadata<'a>>,
}

#[derive(Serialize)]
struct ApiMetadata<'a> {
    stage: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
}

/// Blocking client against an OpenAI-compatible endpoint.
pub struct OpenAiChatClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiChatClient {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

impl ChatClient for OpenAiChatClient {
    fn chat(&self, request: &ChatRequest<'_>) -> Result<String, LlmError> {
        let body = ApiRequest {
            model: request.model,
            messages: vec![
                ApiMessage { role: "system", content: request.system },
                ApiMessage { role: "user", content: request.user },
            ],
            seed: CHAT_SEED,
            store: request.store.then_some(true),
            metadata: request.store.then_some(ApiMetadata { stage: request.stage }),
        };

        debug!(stage = request.stage, model = request.model, "sending chat request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Api { status: status.as_u16(), body });
        }

        let parsed: ApiResponse = response
            .json()
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Malformed("response carried no message content".into()))
    }
}

/// Scripted behaviour for one stage of the mock client.
enum MockScript {
    /// Same reply for every call.
    Reply(String),
    /// Every call fails with an API error.
    Fail,
    /// First `remaining` calls are rate limited, then `reply` succeeds.
    RateLimitedThen { remaining: u32, reply: String },
    /// Replies consumed in call order; the last one repeats.
    Sequence(std::collections::VecDeque<String>),
}

/// In-memory [`ChatClient`] scripted per stage; records every call.
pub struct MockChatClient {
    scripts: Mutex<std::collections::HashMap<String, MockScript>>,
    /// (stage, system, user) per call, in call order.
    calls: Mutex<Vec<(String, String, String)>>,
}

impl MockChatClient {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(std::collections::HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call to `stage` answers `reply`.
    pub fn with_reply(self, stage: &str, reply: &str) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(stage.to_string(), MockScript::Reply(reply.to_string()));
        self
    }

    /// Every call to `stage` fails with an API error.
    pub fn failing_stage(self, stage: &str) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(stage.to_string(), MockScript::Fail);
        self
    }

    /// Calls to `stage` consume `replies` in order; the last reply repeats
    /// once the list is exhausted.
    pub fn with_replies(self, stage: &str, replies: &[&str]) -> Self {
        self.scripts.lock().unwrap().insert(
            stage.to_string(),
            MockScript::Sequence(replies.iter().map(|r| r.to_string()).collect()),
        );
        self
    }

    /// The first `times` calls to `stage` are rate limited, after which
    /// `reply` is returned.
    pub fn rate_limited_times(self, stage: &str, times: u32, reply: &str) -> Self {
        self.scripts.lock().unwrap().insert(
            stage.to_string(),
            MockScript::RateLimitedThen { remaining: times, reply: reply.to_string() },
        );
        self
    }

    /// Number of calls recorded against `stage`.
    pub fn call_count(&self, stage: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _, _)| s == stage)
            .count()
    }

    /// User payloads recorded against `stage`, in call order.
    pub fn user_payloads(&self, stage: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _, _)| s == stage)
            .map(|(_, _, user)| user.clone())
            .collect()
    }

    /// System prompts recorded against `stage`, in call order.
    pub fn system_payloads(&self, stage: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _, _)| s == stage)
            .map(|(_, system, _)| system.clone())
            .collect()
    }
}

impl Default for MockChatClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatClient for MockChatClient {
    fn chat(&self, request: &ChatRequest<'_>) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push((
            request.stage.to_string(),
            request.system.to_string(),
            request.user.to_string(),
        ));
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(request.stage) {
            Some(MockScript::Reply(reply)) => Ok(reply.clone()),
            Some(MockScript::Fail) => Err(LlmError::Api {
                status: 500,
                body: "scripted failure".into(),
            }),
            Some(MockScript::RateLimitedThen { remaining, reply }) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    Err(LlmError::RateLimited)
                } else {
                    Ok(reply.clone())
                }
            }
            Some(MockScript::Sequence(replies)) => {
                let reply = if replies.len() > 1 {
                    replies.pop_front().unwrap_or_default()
                } else {
                    replies.front().cloned().unwrap_or_default()
                };
                Ok(reply)
            }
            None => Ok(String::new()),
        }
    }
}
