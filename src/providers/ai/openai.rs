//! OpenAI-compatible engine implementation.
//!
//! Works with any local runtime that serves `/v1/chat/completions` with SSE
//! streaming: llama.cpp server, vLLM, LM Studio, and Ollama's `/v1` surface.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::lines::LineBuffer;
use super::traits::{
    CompletionRequest, CompletionStream, EngineLoader, FinishReason, GenerationEngine, LlmError,
    LlmResult, Message, ProgressCallback, Role, StreamChunk,
};

/// Default base URL for a llama.cpp or LM Studio server.
pub const OPENAI_COMPATIBLE_DEFAULT_URL: &str = "http://localhost:8080/v1";

/// Chat completion request format.
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

impl From<&Message> for OpenAiMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: msg.content.clone(),
        }
    }
}

/// Streaming response format.
#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

/// `GET /models` response.
#[derive(Debug, Deserialize)]
struct OpenAiModelList {
    data: Vec<OpenAiModel>,
}

#[derive(Debug, Deserialize)]
struct OpenAiModel {
    id: String,
}

/// API error response.
#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    code: Option<String>,
}

/// HTTP connection details shared by the engine and its loader.
#[derive(Debug, Clone)]
struct Endpoint {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl Endpoint {
    fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(ref api_key) = self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", api_key)) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers
    }

    async fn list_models(&self) -> LlmResult<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .headers(self.headers())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let list: OpenAiModelList = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse model list: {}", e)))?;

        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

/// Maps a non-success response to an [`LlmError`].
pub(super) async fn error_from_response(response: reqwest::Response) -> LlmError {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        return LlmError::RateLimited {
            retry_after_secs: retry_after,
        };
    }

    if let Ok(error) = response.json::<OpenAiError>().await {
        if status == 401 || error.error.code.as_deref() == Some("invalid_api_key") {
            return LlmError::AuthenticationError(error.error.message);
        }
        return LlmError::ApiError {
            status,
            message: error.error.message,
        };
    }

    LlmError::ApiError {
        status,
        message: format!("HTTP {}", status),
    }
}

/// Engine for an OpenAI-compatible server.
///
/// The server owns the model weights; this engine only holds a client.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleEngine {
    endpoint: Endpoint,
    model: String,
}

impl OpenAiCompatibleEngine {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::new(base_url, api_key),
            model: model.into(),
        }
    }

    /// Overrides the HTTP client (useful for custom timeouts or proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.endpoint.client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.endpoint.base_url
    }

    /// Models the server reports as available.
    pub async fn list_models(&self) -> LlmResult<Vec<String>> {
        self.endpoint.list_models().await
    }

    fn build_request(&self, request: &CompletionRequest) -> OpenAiRequest {
        let mut messages: Vec<OpenAiMessage> = Vec::new();

        if let Some(ref system) = request.system_prompt {
            messages.push(OpenAiMessage {
                role: "system",
                content: system.clone(),
            });
        }

        messages.extend(request.messages.iter().map(OpenAiMessage::from));

        OpenAiRequest {
            model: self.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        }
    }
}

#[async_trait]
impl GenerationEngine for OpenAiCompatibleEngine {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_complete(&self, request: &CompletionRequest) -> LlmResult<CompletionStream> {
        let url = format!("{}/chat/completions", self.endpoint.base_url);
        let body = self.build_request(request);

        let response = self
            .endpoint
            .client
            .post(&url)
            .headers(self.endpoint.headers())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(Box::pin(OpenAiStream::new(response.bytes_stream())))
    }

    async fn dispose(&self) -> LlmResult<()> {
        tracing::debug!(model = %self.model, "Releasing OpenAI-compatible engine");
        Ok(())
    }
}

/// Connects to an already running OpenAI-compatible server.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleLoader {
    endpoint: Endpoint,
}

impl OpenAiCompatibleLoader {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: Endpoint::new(base_url, api_key),
        }
    }
}

#[async_trait]
impl EngineLoader for OpenAiCompatibleLoader {
    async fn load(
        &self,
        model: &str,
        progress: ProgressCallback,
    ) -> LlmResult<Arc<dyn GenerationEngine>> {
        progress(&format!("connecting to {}", self.endpoint.base_url));

        let models = self.endpoint.list_models().await?;
        // Single-model servers (llama.cpp) may report a file name instead.
        if !models.is_empty() && !models.iter().any(|m| m == model) {
            return Err(LlmError::Unavailable(format!(
                "model {model} is not served at {} (available: {})",
                self.endpoint.base_url,
                models.join(", ")
            )));
        }

        Ok(Arc::new(OpenAiCompatibleEngine {
            endpoint: self.endpoint.clone(),
            model: model.to_string(),
        }))
    }
}

/// Stream wrapper for SSE chat completion responses.
pub(super) struct OpenAiStream<S> {
    inner: S,
    lines: LineBuffer,
    done: bool,
}

impl<S> OpenAiStream<S> {
    pub(super) fn new(inner: S) -> Self {
        Self {
            inner,
            lines: LineBuffer::default(),
            done: false,
        }
    }

    fn parse_line(&mut self, line: &str) -> Option<LlmResult<StreamChunk>> {
        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        let data = line.strip_prefix("data:")?.trim_start();

        if data == "[DONE]" {
            self.done = true;
            return None;
        }

        match serde_json::from_str::<OpenAiStreamChunk>(data) {
            Ok(chunk) => {
                let choice = chunk.choices.into_iter().next()?;
                Some(Ok(StreamChunk {
                    text: choice.delta.content.unwrap_or_default(),
                    finish_reason: choice
                        .finish_reason
                        .as_deref()
                        .map(|r| FinishReason::parse(Some(r))),
                }))
            }
            Err(e) => Some(Err(LlmError::InvalidResponse(format!(
                "Failed to parse stream chunk: {}",
                e
            )))),
        }
    }
}

impl<S, E> Stream for OpenAiStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error,
{
    type Item = LlmResult<StreamChunk>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.done {
                return Poll::Ready(None);
            }

            if let Some(line) = self.lines.next_line() {
                if let Some(result) = self.parse_line(&line) {
                    return Poll::Ready(Some(result));
                }
                continue;
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.lines.push(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(LlmError::StreamError(e.to_string()))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    let result = self
                        .lines
                        .finish()
                        .and_then(|line| self.parse_line(&line));
                    return Poll::Ready(result);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn sse_stream(chunks: Vec<&'static [u8]>) -> OpenAiStream<impl Stream<Item = Result<bytes::Bytes, std::io::Error>> + Unpin> {
        OpenAiStream::new(futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(bytes::Bytes::from_static(c))),
        ))
    }

    #[test]
    fn test_request_serialization() {
        let request = CompletionRequest::prompt("Hello")
            .with_system_prompt("Be helpful")
            .with_max_tokens(100);

        let engine = OpenAiCompatibleEngine::new("http://localhost:8080/v1", None, "llama3");
        let json = serde_json::to_string(&engine.build_request(&request)).unwrap();

        assert!(json.contains("\"model\":\"llama3\""));
        assert!(json.contains("\"role\":\"system\""));
        assert!(json.contains("Hello"));
        assert!(json.contains("\"max_tokens\":100"));
        assert!(json.contains("\"stream\":true"));
        assert!(json.find("\"role\":\"system\"") < json.find("\"role\":\"user\""));
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let json = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let chunk: OpenAiStreamChunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.choices[0].delta.content, Some("Hello".to_string()));
        assert!(chunk.choices[0].finish_reason.is_none());
    }

    #[test]
    fn test_model_list_parsing() {
        let json = r#"{"object":"list","data":[{"id":"llama3","object":"model"}]}"#;
        let list: OpenAiModelList = serde_json::from_str(json).unwrap();
        assert_eq!(list.data[0].id, "llama3");
    }

    #[test]
    fn test_trailing_slash_removal() {
        let engine = OpenAiCompatibleEngine::new("http://localhost:11434/v1/", None, "llama3");
        assert_eq!(engine.base_url(), "http://localhost:11434/v1");
        assert_eq!(engine.model(), "llama3");
    }

    #[test]
    fn test_bearer_header() {
        let endpoint = Endpoint::new("http://localhost", Some("secret".to_string()));
        let headers = endpoint.headers();
        assert_eq!(
            headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer secret"
        );

        let anonymous = Endpoint::new("http://localhost", None);
        assert!(anonymous.headers().get(AUTHORIZATION).is_none());
    }

    #[tokio::test]
    async fn test_sse_stream_yields_deltas_in_order() {
        let stream = sse_stream(vec![
            b": keep-alive\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n",
            b"\ndata: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            b"data: [DONE]\n\n",
        ]);

        let chunks: Vec<StreamChunk> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "Hel");
        assert_eq!(chunks[1].text, "lo");
        assert_eq!(chunks[2].text, "");
        assert_eq!(chunks[2].finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn test_sse_event_split_across_chunks() {
        let stream = sse_stream(vec![
            b"data: {\"choices\":[{\"delta\":{\"con",
            b"tent\":\"caf\xc3",
            b"\xa9\"},\"finish_reason\":null}]}\n\n",
        ]);

        let chunks: Vec<StreamChunk> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec![StreamChunk::text("café")]);
    }

    #[tokio::test]
    async fn test_sse_malformed_chunk_is_an_error() {
        let mut stream = sse_stream(vec![b"data: {not json}\n\n"]);
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(LlmError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_nothing_after_done() {
        let stream = sse_stream(vec![
            b"data: [DONE]\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"},\"finish_reason\":null}]}\n\n",
        ]);

        let chunks: Vec<_> = stream.collect().await;
        assert!(chunks.is_empty());
    }
}
