//! OpenAI-compatible adapter.
//!
//! Works with: OpenAI, OpenRouter, Ollama, LM Studio, vLLM, Together AI and
//! any endpoint exposing `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Usage reporting on streams via `stream_options.include_usage`
//! - Embeddings (`/embeddings`), used by [`crate::embedder::ApiEmbedder`]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use writingway_core::error::ProviderError;
use writingway_core::message::ChatMessage;
use writingway_core::provider::*;

use crate::http;
use crate::sse::{self, SseEvent, StreamParser};

/// An OpenAI-compatible adapter.
///
/// This handles the vast majority of providers since most expose
/// an OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatAdapter {
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new() -> Self {
        Self::with_client(http::build_client())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Convert our message types to OpenAI API format.
    fn to_api_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().into(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn build_body(request: &GenerationRequest, config: &ProviderConfig, stream: bool) -> ChatRequest {
        let params = request.effective_params(config);
        ChatRequest {
            model: config.model.clone(),
            messages: Self::to_api_messages(&request.messages),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    fn post(&self, config: &ProviderConfig, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{path}", config.endpoint);
        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = &config.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    /// OpenAI-specific classification on top of the generic mapping.
    pub(crate) fn classify(failure: VendorFailure, provider: &str) -> ProviderError {
        match &failure {
            VendorFailure::Status { status: 404 | 400, body, .. }
                if http::mentions_missing_model(body) =>
            {
                ProviderError::UnsupportedModel {
                    provider: provider.to_string(),
                    model: api_error_message(body).unwrap_or_else(|| "unknown".into()),
                }
            }
            _ => failure.classify(provider),
        }
    }

    fn to_completion(resp: ChatResponse, provider: &str, raw: &str) -> Result<Completion, VendorFailure> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| VendorFailure::Malformed {
                message: "no choices in response".into(),
                raw: raw.to_string(),
            })?;
        let text = choice.message.content.ok_or_else(|| VendorFailure::Malformed {
            message: "choice carried no content".into(),
            raw: raw.to_string(),
        })?;

        Ok(Completion {
            text,
            usage: resp.usage.map(ApiUsage::into_usage),
            model: resp.model,
            provider: provider.to_string(),
        })
    }

    /// Compute embeddings for `inputs` with the provider's embedding endpoint.
    pub async fn embed(
        &self,
        config: &ProviderConfig,
        inputs: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let body = EmbeddingRequest {
            model: config.model.clone(),
            input: inputs.to_vec(),
            encoding_format: "float",
        };

        debug!(
            provider = %config.id,
            model = %config.model,
            count = inputs.len(),
            "Sending embedding request"
        );

        let response = http::send(self.post(config, "embeddings").json(&body), config.timeout)
            .await
            .map_err(|f| Self::classify(f, &config.id))?;
        let raw = http::read_body(response, config.timeout)
            .await
            .map_err(|f| Self::classify(f, &config.id))?;
        let mut parsed: EmbeddingResponse = http::parse_json(&raw, "embedding response")
            .map_err(|f| Self::classify(f, &config.id))?;

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

impl Default for OpenAiCompatAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(String::from)
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn vendor(&self) -> Vendor {
        Vendor::OpenAi
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        config: &ProviderConfig,
    ) -> std::result::Result<Completion, ProviderError> {
        check_request(request, config)?;
        let body = Self::build_body(request, config, false);

        debug!(provider = %config.id, model = %config.model, "Sending completion request");

        let response = http::send(self.post(config, "chat/completions").json(&body), config.timeout)
            .await
            .map_err(|f| self.map_error(f, config))?;
        let raw = http::read_body(response, config.timeout)
            .await
            .map_err(|f| self.map_error(f, config))?;
        let parsed: ChatResponse =
            http::parse_json(&raw, "chat completion").map_err(|f| self.map_error(f, config))?;

        Self::to_completion(parsed, &config.id, &raw).map_err(|f| {
            let err = self.map_error(f, config);
            warn!(provider = %config.id, error = %err, "Provider response rejected");
            err
        })
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        config: &ProviderConfig,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        check_request(request, config)?;
        let body = Self::build_body(request, config, true);

        debug!(provider = %config.id, model = %config.model, "Sending streaming request");

        let builder = self
            .post(config, "chat/completions")
            .header("Accept", "text/event-stream")
            .json(&body);
        let response = http::send(builder, config.timeout)
            .await
            .map_err(|f| self.map_error(f, config))?;

        Ok(sse::spawn_stream(
            response,
            config.id.clone(),
            config.timeout,
            OpenAiStream::default(),
            Self::classify,
        ))
    }

    fn map_error(&self, failure: VendorFailure, config: &ProviderConfig) -> ProviderError {
        Self::classify(failure, &config.id)
    }
}

/// Holds the usage block, which arrives in its own chunk before `[DONE]`.
#[derive(Debug, Default)]
struct OpenAiStream {
    usage: Option<Usage>,
}

impl StreamParser for OpenAiStream {
    fn on_event(&mut self, event: &SseEvent) -> Result<Vec<StreamChunk>, VendorFailure> {
        let data = event.data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        // "[DONE]" signals end of stream
        if data == "[DONE]" {
            return Ok(vec![StreamChunk::finished(self.usage)]);
        }

        let parsed: StreamResponse = match serde_json::from_str(data) {
            Ok(p) => p,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable SSE chunk");
                return Ok(Vec::new());
            }
        };

        // Error objects arrive as data lines on some gateways.
        if let Some(error) = parsed.error {
            let detail = error["message"].as_str().unwrap_or("unknown error");
            return Err(VendorFailure::Malformed {
                message: format!("error object in stream: {detail}"),
                raw: data.to_string(),
            });
        }

        if let Some(usage) = parsed.usage {
            self.usage = Some(usage.into_usage());
        }

        Ok(parsed
            .choices
            .into_iter()
            .filter_map(|c| c.delta.content)
            .filter(|text| !text.is_empty())
            .map(StreamChunk::text)
            .collect())
    }

    /// Only reached when the body closed before `[DONE]`.
    fn on_end(&mut self) -> Result<StreamChunk, VendorFailure> {
        Err(VendorFailure::Transport {
            message: "stream closed before [DONE]".into(),
            timed_out: false,
        })
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl ApiUsage {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

// --- Embedding API types ---

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
