use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{ChatRole, ChatTurn, TokenUsage};

/// One call to the hosted model.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    /// Step name; doubles as the response-schema name.
    pub task: String,
    pub system: String,
    pub messages: Vec<ChatTurn>,
    /// JSON shape the reply must follow. `None` asks for free text.
    pub response_schema: Option<Value>,
    pub temperature: f32,
}

impl InferenceRequest {
    pub fn structured(task: &str, system: String, prompt: String, schema: Value) -> Self {
        Self {
            task: task.to_string(),
            system,
            messages: vec![ChatTurn {
                role: ChatRole::User,
                content: prompt,
            }],
            response_schema: Some(schema),
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// Failure at the model-call boundary, classified by HTTP status.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelCallError {
    RateLimited,
    Overloaded,
    InvalidCredentials,
    EmptyResponse,
    Transport(String),
    /// 2xx whose body is not a completion envelope.
    InvalidEnvelope(String),
    Upstream { status: u16, body: String },
}

impl fmt::Display for ModelCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelCallError::RateLimited => write!(f, "rate limited"),
            ModelCallError::Overloaded => write!(f, "service overloaded"),
            ModelCallError::InvalidCredentials => write!(f, "invalid credentials"),
            ModelCallError::EmptyResponse => write!(f, "empty response"),
            ModelCallError::Transport(msg) => write!(f, "transport error: {}", msg),
            ModelCallError::InvalidEnvelope(msg) => write!(f, "invalid response envelope: {}", msg),
            ModelCallError::Upstream { status, body } => write!(f, "status {}: {}", status, body),
        }
    }
}

impl ModelCallError {
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            429 => ModelCallError::RateLimited,
            401 | 403 => ModelCallError::InvalidCredentials,
            // 529 is what some providers send for "overloaded"
            502 | 503 | 504 | 529 => ModelCallError::Overloaded,
            code => ModelCallError::Upstream { status: code, body },
        }
    }
}

/// The hosted inference service, behind a seam so it can be swapped or mocked.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(&self, request: &InferenceRequest)
        -> Result<InferenceResponse, ModelCallError>;
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionEnvelope {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct HttpModelClient {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl HttpModelClient {
    /// Creates a new `HttpModelClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base of the inference API (e.g. `https://host/v1`).
    /// * `api_key` - Bearer token.
    /// * `model` - Model identifier sent with every request.
    /// * `timeout` - Optional request timeout; `None` keeps the client default.
    pub fn new(
        base_url: &str,
        api_key: String,
        model: String,
        timeout: Option<Duration>,
    ) -> Result<Self, AppError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            AppError::ExternalApiError(format!("Failed to create model client: {}", e))
        })?;

        Ok(Self {
            client,
            endpoint: Self::resolve_endpoint(base_url)?,
            api_key,
            model,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            &config.model_base_url,
            config.model_api_key.clone(),
            config.model_name.clone(),
            config.model_timeout_secs.map(Duration::from_secs),
        )
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn resolve_endpoint(base_url: &str) -> Result<Url, AppError> {
        let base = base_url.trim_end_matches('/');
        let full = if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{}/chat/completions", base)
        };
        Url::parse(&full)
            .map_err(|e| AppError::BadRequest(format!("Invalid model base URL '{}': {}", base, e)))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn build_body(&self, request: &InferenceRequest) -> Value {
        let mut messages = vec![WireMessage {
            role: "system",
            content: &request.system,
        }];
        messages.extend(request.messages.iter().map(|turn| WireMessage {
            role: match turn.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: &turn.content,
        }));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
        });

        if let Some(schema) = &request.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": request.task,
                    "schema": schema,
                }
            });
        }

        body
    }
}

#[async_trait]
impl ModelBackend for HttpModelClient {
    async fn generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, ModelCallError> {
        tracing::info!("Model call '{}' -> {}", request.task, self.endpoint);

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(|e| ModelCallError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!(
                "Model call '{}' returned {}: {}",
                request.task,
                status,
                error_text
            );
            return Err(ModelCallError::from_status(status, error_text));
        }

        let envelope: CompletionEnvelope = response
            .json()
            .await
            .map_err(|e| ModelCallError::InvalidEnvelope(e.to_string()))?;

        let content = envelope
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ModelCallError::EmptyResponse)?;

        let usage = envelope.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        if let Some(ref u) = usage {
            tracing::debug!(
                "Model call '{}' used {} tokens ({} prompt, {} completion)",
                request.task,
                u.total_tokens,
                u.prompt_tokens,
                u.completion_tokens
            );
        }

        Ok(InferenceResponse { content, usage })
    }
}
