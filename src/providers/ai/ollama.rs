//! Ollama engine implementation.
//!
//! Models are pulled through Ollama's native API so download progress can be
//! reported, then served through its OpenAI-compatible `/v1` surface. The
//! engine is a thin wrapper around [`OpenAiCompatibleEngine`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::lines::LineBuffer;
use super::openai::{error_from_response, OpenAiCompatibleEngine};
use super::traits::{
    CompletionRequest, CompletionStream, EngineLoader, GenerationEngine, LlmError, LlmResult,
    ProgressCallback,
};

/// Default Ollama API URL.
pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

/// One NDJSON line from `/api/pull`.
#[derive(Debug, Default, Deserialize)]
struct PullProgress {
    #[serde(default)]
    status: String,
    total: Option<u64>,
    completed: Option<u64>,
    error: Option<String>,
}

impl PullProgress {
    /// Renders the line as status text, e.g. "pulling 6a0746a1ec1a 42%".
    fn describe(&self) -> Option<String> {
        if self.status.is_empty() {
            return None;
        }

        match (self.completed, self.total) {
            (Some(completed), Some(total)) if total > 0 => {
                let percent = completed.saturating_mul(100) / total;
                Some(format!("{} {}%", self.status, percent.min(100)))
            }
            _ => Some(self.status.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    models: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

/// Client for Ollama's native API.
#[derive(Debug, Clone)]
struct OllamaApi {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaApi {
    fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/');
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.strip_suffix("/v1").unwrap_or(base_url).to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn pull(&self, model: &str, progress: &ProgressCallback) -> LlmResult<()> {
        let response = self
            .client
            .post(self.url("/api/pull"))
            .json(&PullRequest { model, stream: true })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();

        loop {
            let next = body.next().await;
            if let Some(chunk) = &next {
                match chunk {
                    Ok(bytes) => lines.push(bytes),
                    Err(e) => return Err(LlmError::StreamError(e.to_string())),
                }
            }

            let mut pending = Vec::new();
            while let Some(line) = lines.next_line() {
                pending.push(line);
            }
            if next.is_none() {
                pending.extend(lines.finish());
            }

            for line in pending.iter().filter(|l| !l.is_empty()) {
                let update: PullProgress = serde_json::from_str(line).map_err(|e| {
                    LlmError::InvalidResponse(format!("Failed to parse pull progress: {}", e))
                })?;

                if let Some(error) = update.error {
                    return Err(LlmError::ModelLoad(error));
                }
                if let Some(text) = update.describe() {
                    progress(&text);
                }
            }

            if next.is_none() {
                return Ok(());
            }
        }
    }

    async fn show(&self, model: &str) -> LlmResult<()> {
        let response = self
            .client
            .post(self.url("/api/show"))
            .json(&json!({ "model": model }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelLoad(format!("model {model} not found after pull")));
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }

    async fn list_models(&self) -> LlmResult<Vec<String>> {
        let response = self.client.get(self.url("/api/tags")).send().await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let tags: TagList = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse model tags: {}", e)))?;

        Ok(tags.models.into_iter().map(|t| t.name).collect())
    }

    async fn unload(&self, model: &str) -> LlmResult<()> {
        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(&json!({ "model": model, "keep_alive": 0 }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }
}

/// Loads models into a local Ollama daemon.
#[derive(Debug, Clone)]
pub struct OllamaLoader {
    api: OllamaApi,
}

impl OllamaLoader {
    /// Creates a loader for the default localhost daemon.
    pub fn new() -> Self {
        Self::with_url(OLLAMA_DEFAULT_URL)
    }

    /// Creates a loader for a daemon at `base_url`. A trailing `/v1` is ignored.
    pub fn with_url(base_url: impl Into<String>) -> Self {
        Self {
            api: OllamaApi::new(base_url),
        }
    }

    /// Models already present in the daemon.
    pub async fn list_models(&self) -> LlmResult<Vec<String>> {
        self.api.list_models().await
    }
}

impl Default for OllamaLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineLoader for OllamaLoader {
    async fn load(
        &self,
        model: &str,
        progress: ProgressCallback,
    ) -> LlmResult<Arc<dyn GenerationEngine>> {
        tracing::info!(model, base_url = %self.api.base_url, "Pulling model");
        self.api.pull(model, &progress).await?;
        self.api.show(model).await?;

        let inner = OpenAiCompatibleEngine::new(format!("{}/v1", self.api.base_url), None, model)
            .with_client(self.api.client.clone());

        Ok(Arc::new(OllamaEngine {
            api: self.api.clone(),
            inner,
        }))
    }
}

/// A model loaded into Ollama.
#[derive(Debug, Clone)]
pub struct OllamaEngine {
    api: OllamaApi,
    inner: OpenAiCompatibleEngine,
}

#[async_trait]
impl GenerationEngine for OllamaEngine {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn stream_complete(&self, request: &CompletionRequest) -> LlmResult<CompletionStream> {
        self.inner.stream_complete(request).await
    }

    /// Evicts the model from Ollama's memory.
    async fn dispose(&self) -> LlmResult<()> {
        tracing::info!(model = %self.inner.model(), "Unloading model");
        self.api.unload(self.inner.model()).await
    }
}
