//! The LLM capability consumed by the analyzer and the chat service: a
//! single operation turning a prompt into a text response. Adapters exist
//! for an OpenAI-compatible API and a local Ollama server; the pipeline is
//! generic over [`LlmClient`] and works identically under either.
//!
//! Calls are cancellable by dropping the future; no partial state survives
//! a cancelled call.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use crate::error::LlmError;

#[derive(Debug, Clone, Copy)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub json_mode: bool,
    /// Independent deadline for each attempt.
    pub timeout: Duration,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 800,
            json_mode: true,
            timeout: Duration::from_secs(60),
        }
    }
}

pub trait LlmClient: Send + Sync {
    fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        options: &CompletionOptions,
    ) -> impl Future<Output = Result<String, LlmError>> + Send;
}

/// Retry policy for transient transport failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Backoff doubles per retry and is capped here.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

/// Issue a completion with the per-attempt deadline and the retry policy
/// applied. Non-transient failures surface immediately.
pub async fn complete_with_retry<L: LlmClient>(
    client: &L,
    prompt: &str,
    system: Option<&str>,
    options: &CompletionOptions,
    retry: &RetryConfig,
) -> Result<String, LlmError> {
    let mut delay = retry.base_delay;
    let mut attempt = 0u32;

    loop {
        let outcome = match tokio::time::timeout(
            options.timeout,
            client.complete(prompt, system, options),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(options.timeout)),
        };

        match outcome {
            Ok(text) => return Ok(text),
            Err(error) if error.is_transient() && attempt < retry.max_retries => {
                attempt += 1;
                warn!(attempt, error = %error, "transient LLM failure, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(retry.max_delay);
            }
            Err(error) => return Err(error),
        }
    }
}

/// Adapter for OpenAI-compatible chat-completions endpoints.
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_endpoint(
            "https://api.openai.com/v1/chat/completions",
            api_key,
            model,
        )
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });
        if options.json_mode {
            payload["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Transport(format!("HTTP {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".into()))
    }
}

/// Adapter for a local Ollama server.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
            model: model.into(),
        }
    }
}

impl LlmClient for OllamaClient {
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let full_prompt = match system {
            Some(system) => format!("{system}\n\n{prompt}"),
            None => prompt.to_string(),
        };

        let mut payload = json!({
            "model": self.model,
            "prompt": full_prompt,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            },
        });
        if options.json_mode {
            payload["format"] = json!("json");
        }

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Transport(format!("HTTP {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        body["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::InvalidResponse("missing response field".into()))
    }
}

/// Runtime-selected transport; which adapter backs a run is transparent to
/// the pipeline.
pub enum LlmTransport {
    External(OpenAiClient),
    Local(OllamaClient),
}

impl LlmClient for LlmTransport {
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        match self {
            Self::External(client) => client.complete(prompt, system, options).await,
            Self::Local(client) => client.complete(prompt, system, options).await,
        }
    }
}

#[derive(Debug, Clone)]
enum ScriptedOutcome {
    Reply(String),
    TransportFailure(String),
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: Option<String>,
    pub prompt: String,
}

/// Deterministic in-process client: replays canned outcomes in FIFO order
/// and records every call. Used by the test suite and offline dry runs.
#[derive(Default)]
pub struct ScriptedLlm {
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outcomes: Mutex::new(
                replies
                    .into_iter()
                    .map(|reply| ScriptedOutcome::Reply(reply.into()))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a canned reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(ScriptedOutcome::Reply(reply.into()));
    }

    /// Queue a transient transport failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(ScriptedOutcome::TransportFailure(message.into()));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        _options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall {
            system: system.map(str::to_string),
            prompt: prompt.to_string(),
        });

        match self.outcomes.lock().unwrap().pop_front() {
            Some(ScriptedOutcome::Reply(reply)) => Ok(reply),
            Some(ScriptedOutcome::TransportFailure(message)) => {
                Err(LlmError::Transport(message))
            }
            None => Err(LlmError::Transport("script exhausted".into())),
        }
    }
}
