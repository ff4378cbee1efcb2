//! Google Gemini adapter.
//!
//! Talks to the Generative Language API (`v1beta`):
//! `models/{model}:generateContent` for whole responses and
//! `models/{model}:streamGenerateContent?alt=sse` for streams. The API key
//! travels as the `key` query parameter. System messages become
//! `systemInstruction`; the assistant role is called `model`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use writingway_core::error::ProviderError;
use writingway_core::message::{ChatMessage, Role};
use writingway_core::provider::*;

use crate::http;
use crate::sse::{self, SseEvent, StreamParser};

pub struct GeminiAdapter {
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self::with_client(http::build_client())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn url(config: &ProviderConfig, stream: bool) -> String {
        let method = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let mut url = format!("{}/v1beta/models/{}:{method}", config.endpoint, config.model);
        if stream {
            url.push_str("?alt=sse");
        }
        url
    }

    fn build_body(request: &GenerationRequest, config: &ProviderConfig) -> GenerateContentRequest {
        let params = request.effective_params(config);
        let mut system = Vec::new();
        let mut contents = Vec::new();

        for msg in &request.messages {
            match msg.role {
                Role::System => system.push(Part {
                    text: Some(msg.content.clone()),
                }),
                Role::User | Role::Assistant => contents.push(Content {
                    role: Some(gemini_role(msg).into()),
                    parts: vec![Part {
                        text: Some(msg.content.clone()),
                    }],
                }),
            }
        }

        GenerateContentRequest {
            contents,
            system_instruction: (!system.is_empty()).then_some(Content {
                role: None,
                parts: system,
            }),
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
                top_p: params.top_p,
            },
        }
    }

    fn post(&self, config: &ProviderConfig, stream: bool, body: &GenerateContentRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(Self::url(config, stream))
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &config.api_key {
            builder = builder.query(&[("key", key)]);
        }
        builder
    }

    /// Gemini reports a bad key as 400 `API_KEY_INVALID` and an unknown
    /// model as 404.
    fn classify(failure: VendorFailure, provider: &str) -> ProviderError {
        match &failure {
            VendorFailure::Status { status: 400, body, .. }
                if body.contains("API_KEY_INVALID") || body.contains("API key not valid") =>
            {
                ProviderError::Auth {
                    provider: provider.to_string(),
                    message: "API key not valid".into(),
                }
            }
            VendorFailure::Status { status: 404, body, .. } if http::mentions_missing_model(body) => {
                ProviderError::UnsupportedModel {
                    provider: provider.to_string(),
                    model: body.chars().take(200).collect(),
                }
            }
            _ => failure.classify(provider),
        }
    }

    fn to_completion(resp: GenerateContentResponse, config: &ProviderConfig, raw: &str) -> Result<Completion, VendorFailure> {
        let text = extract_text(&resp).ok_or_else(|| VendorFailure::Malformed {
            message: "no text in first candidate".into(),
            raw: raw.to_string(),
        })?;
        Ok(Completion {
            text,
            usage: resp.usage_metadata.map(UsageMetadata::into_usage),
            model: resp.model_version.unwrap_or_else(|| config.model.clone()),
            provider: config.id.clone(),
        })
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn gemini_role(msg: &ChatMessage) -> &'static str {
    match msg.role {
        Role::Assistant => "model",
        _ => "user",
    }
}

/// Concatenate all text parts of the first candidate.
fn extract_text(r: &GenerateContentResponse) -> Option<String> {
    let cand = r.candidates.first()?;
    let content = cand.content.as_ref()?;
    let mut out = String::new();
    for p in &content.parts {
        if let Some(t) = &p.text {
            out.push_str(t);
        }
    }
    if out.is_empty() { None } else { Some(out) }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    fn vendor(&self) -> Vendor {
        Vendor::Gemini
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        config: &ProviderConfig,
    ) -> std::result::Result<Completion, ProviderError> {
        check_request(request, config)?;
        let body = Self::build_body(request, config);

        debug!(provider = %config.id, model = %config.model, "Sending generateContent request");

        let response = http::send(self.post(config, false, &body), config.timeout)
            .await
            .map_err(|f| self.map_error(f, config))?;
        let raw = http::read_body(response, config.timeout)
            .await
            .map_err(|f| self.map_error(f, config))?;
        let parsed: GenerateContentResponse =
            http::parse_json(&raw, "Gemini response").map_err(|f| self.map_error(f, config))?;

        Self::to_completion(parsed, config, &raw).map_err(|f| {
            let err = self.map_error(f, config);
            warn!(provider = %config.id, error = %err, "Gemini response rejected");
            err
        })
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        config: &ProviderConfig,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        check_request(request, config)?;
        let body = Self::build_body(request, config);

        debug!(provider = %config.id, model = %config.model, "Sending streamGenerateContent request");

        let response = http::send(self.post(config, true, &body), config.timeout)
            .await
            .map_err(|f| self.map_error(f, config))?;

        Ok(sse::spawn_stream(
            response,
            config.id.clone(),
            config.timeout,
            GeminiStream::default(),
            Self::classify,
        ))
    }

    fn map_error(&self, failure: VendorFailure, config: &ProviderConfig) -> ProviderError {
        Self::classify(failure, &config.id)
    }
}

/// Gemini streams have no terminal marker; the body simply ends.
#[derive(Debug, Default)]
struct GeminiStream {
    usage: Option<Usage>,
}

impl StreamParser for GeminiStream {
    fn on_event(&mut self, event: &SseEvent) -> Result<Vec<StreamChunk>, VendorFailure> {
        let data = event.data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let mut parsed: GenerateContentResponse =
            serde_json::from_str(data).map_err(|e| VendorFailure::Malformed {
                message: format!("failed to parse SSE JSON: {e}"),
                raw: data.to_string(),
            })?;

        if let Some(usage) = parsed.usage_metadata.take() {
            self.usage = Some(usage.into_usage());
        }

        Ok(extract_text(&parsed)
            .map(StreamChunk::text)
            .into_iter()
            .collect())
    }

    fn on_end(&mut self) -> Result<StreamChunk, VendorFailure> {
        Ok(StreamChunk::finished(self.usage))
    }
}

// --- Gemini API types ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl UsageMetadata {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_token_count,
            completion_tokens: self.candidates_token_count,
            total_tokens: self.total_token_count,
        }
    }
}
