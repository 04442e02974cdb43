use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::profile::DecodingProfile;
use crate::schema::GuidedSchema;
use crate::CompletionClient;

const THINK_CLOSE: &str = "</think>";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("completion service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("completion reply is missing the assistant message")]
    MalformedResponse,

    #[error("reply does not satisfy the requested schema: {reason}")]
    SchemaViolation { reason: String, raw: String },

    #[error("unknown decoding profile `{0}`")]
    UnknownProfile(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    #[serde(rename = "ollama")]
    Ollama,
    /// Any server speaking the OpenAI chat-completions protocol (vLLM etc).
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: Backend,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "qwen3:8b".to_string(),
            api_key: None,
            profile: "qwen3".to_string(),
            timeout_secs: 120,
        }
    }
}

/// A single completion call.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub user_prompt: String,
    pub system_prompt: String,
    pub temperature: Option<f32>,
    pub schema: Option<GuidedSchema>,
    /// Keep the model's reasoning block instead of stripping it.
    pub verbose: bool,
}

impl QueryRequest {
    pub fn new(user_prompt: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            system_prompt: system_prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_schema(mut self, schema: GuidedSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Keep only what follows the last closing reasoning marker.
pub fn strip_think(text: &str) -> &str {
    match text.rfind(THINK_CLOSE) {
        Some(pos) => &text[pos + THINK_CLOSE.len()..],
        None => text,
    }
}

#[derive(Clone)]
pub struct LlmClient {
    backend: Backend,
    base_url: String,
    model: String,
    api_key: Option<String>,
    profile: DecodingProfile,
    timeout: Duration,
    client: reqwest::Client,
    blocking: OnceLock<reqwest::blocking::Client>,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let profile = DecodingProfile::by_name(&config.profile)
            .ok_or_else(|| LlmError::UnknownProfile(config.profile.clone()))?;
        let timeout = Duration::from_secs(config.timeout_secs);

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            backend: config.backend,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model,
            api_key: config.api_key,
            profile,
            timeout,
            client,
            blocking: OnceLock::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        match self.backend {
            Backend::Ollama => format!("{}/api/chat", self.base_url),
            Backend::OpenAi => format!("{}/chat/completions", self.base_url),
        }
    }

    fn build_body(&self, request: &QueryRequest) -> Value {
        let messages = json!([
            { "role": "system", "content": request.system_prompt },
            { "role": "user", "content": request.user_prompt },
        ]);
        let mut options = self.profile.with_temperature(request.temperature).to_fields();

        match self.backend {
            Backend::Ollama => {
                let mut body = json!({
                    "model": self.model,
                    "messages": messages,
                    "options": options,
                    "stream": false,
                });
                if let Some(schema) = &request.schema {
                    body["format"] = schema.to_json();
                }
                body
            }
            Backend::OpenAi => {
                options.remove("mirostat");
                options.insert("model".to_string(), json!(self.model));
                options.insert("messages".to_string(), messages);
                if let Some(schema) = &request.schema {
                    options.insert("guided_json".to_string(), schema.to_json());
                }
                Value::Object(options)
            }
        }
    }

    fn read_reply(&self, reply: &Value, request: &QueryRequest) -> Result<String, LlmError> {
        let content = match self.backend {
            Backend::Ollama => reply.pointer("/message/content"),
            Backend::OpenAi => reply.pointer("/choices/0/message/content"),
        }
        .and_then(Value::as_str)
        .ok_or(LlmError::MalformedResponse)?;

        let text = if request.verbose {
            content.trim()
        } else {
            strip_think(content).trim()
        };

        if request.schema.is_some() {
            check_object(text)?;
        }

        Ok(text.to_string())
    }

    fn blocking_client(&self) -> Result<&reqwest::blocking::Client, LlmError> {
        if let Some(client) = self.blocking.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()?;
        Ok(self.blocking.get_or_init(|| client))
    }
}

/// The service is trusted to honor guided decoding, but not assumed to.
fn check_object(text: &str) -> Result<(), LlmError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(_)) => Ok(()),
        Ok(other) => Err(LlmError::SchemaViolation {
            reason: format!("expected a JSON object, got {}", kind_of(&other)),
            raw: text.to_string(),
        }),
        Err(e) => Err(LlmError::SchemaViolation {
            reason: e.to_string(),
            raw: text.to_string(),
        }),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn log_transport(e: &reqwest::Error) {
    if e.is_timeout() {
        warn!(error = %e, "Completion request timed out");
    } else {
        warn!(error = %e, "Completion request failed");
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    async fn query(&self, request: &QueryRequest) -> Result<String, LlmError> {
        let url = self.endpoint();
        debug!(model = %self.model, url = %url, guided = request.schema.is_some(), "Sending completion request");

        let mut call = self.client.post(&url).json(&self.build_body(request));
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().await.inspect_err(log_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: Value = response.json().await.inspect_err(log_transport)?;
        self.read_reply(&reply, request)
    }

    fn query_blocking(&self, request: &QueryRequest) -> Result<String, LlmError> {
        let url = self.endpoint();
        debug!(model = %self.model, url = %url, guided = request.schema.is_some(), "Sending blocking completion request");

        let mut call = self.blocking_client()?.post(&url).json(&self.build_body(request));
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call.send().inspect_err(log_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: Value = response.json().inspect_err(log_transport)?;
        self.read_reply(&reply, request)
    }
}
