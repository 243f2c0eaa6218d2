//! Generation engine traits and supporting types.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or talking to a generation engine.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Engine not available: {0}")]
    Unavailable(String),
}

/// Result type for engine operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Request for a streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Optional system prompt to set context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Conversation messages.
    pub messages: Vec<Message>,

    /// Sampling temperature (0.0 to 2.0, lower is more deterministic).
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            system_prompt: None,
            messages: Vec::new(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// A single user turn.
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::user(prompt)])
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Reason why a completion finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of generation.
    Stop,

    /// Hit the max_tokens limit.
    Length,

    /// Content was filtered for safety.
    ContentFilter,

    /// Unknown or runtime-specific reason.
    #[serde(other)]
    Other,
}

impl FinishReason {
    pub(crate) fn parse(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") => Self::Stop,
            Some("length") => Self::Length,
            Some("content_filter") => Self::ContentFilter,
            _ => Self::Other,
        }
    }
}

/// A streaming chunk of completion output.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    /// Text content of this chunk. May be empty.
    pub text: String,

    /// If this is the final chunk, contains the finish reason.
    pub finish_reason: Option<FinishReason>,
}

impl StreamChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: None,
        }
    }
}

/// Type alias for the streaming response.
pub type CompletionStream = Pin<Box<dyn Stream<Item = LlmResult<StreamChunk>> + Send>>;

/// Receives human-readable load progress ("pulling manifest", "downloading 42%").
pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A loaded model that can stream completions.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    /// Returns the model identifier being served.
    fn model(&self) -> &str;

    /// Starts a streaming completion.
    async fn stream_complete(&self, request: &CompletionRequest) -> LlmResult<CompletionStream>;

    /// Releases the model. The engine must not be used afterwards.
    async fn dispose(&self) -> LlmResult<()>;
}

/// Brings a model up (downloading and warming it if necessary).
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Loads `model`, reporting progress as it goes.
    async fn load(
        &self,
        model: &str,
        progress: ProgressCallback,
    ) -> LlmResult<Arc<dyn GenerationEngine>>;
}
