//! Anthropic native adapter.
//!
//! Uses Anthropic's Messages API directly (not OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Streaming via SSE with `content_block_delta` events
//! - Overload (529) treated as a rate limit; in-stream `error` events classified

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use writingway_core::error::ProviderError;
use writingway_core::message::{ChatMessage, Role};
use writingway_core::provider::*;

use crate::http;
use crate::sse::{self, SseEvent, StreamParser};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API adapter.
pub struct AnthropicAdapter {
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new() -> Self {
        Self::with_client(http::build_client())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Extract system messages from the message list.
    /// Anthropic puts system prompt as a top-level field, not in messages.
    fn extract_system(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut rest: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                Role::User | Role::Assistant => rest.push(AnthropicMessage {
                    role: msg.role.as_str().into(),
                    content: msg.content.clone(),
                }),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, rest)
    }

    fn build_body(request: &GenerationRequest, config: &ProviderConfig, stream: bool) -> MessagesRequest {
        let params = request.effective_params(config);
        let (system, messages) = Self::extract_system(&request.messages);
        MessagesRequest {
            model: config.model.clone(),
            messages,
            system,
            max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: params.temperature,
            top_p: params.top_p,
            stream,
        }
    }

    fn post(&self, config: &ProviderConfig, body: &MessagesRequest) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/messages", config.endpoint);
        let mut builder = self
            .client
            .post(&url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &config.api_key {
            builder = builder.header("x-api-key", key);
        }
        if body.stream {
            builder = builder.header("Accept", "text/event-stream");
        }
        builder
    }

    /// Anthropic-specific classification on top of the generic mapping.
    fn classify(failure: VendorFailure, provider: &str) -> ProviderError {
        match &failure {
            VendorFailure::Status {
                status: 529,
                retry_after,
                ..
            } => ProviderError::RateLimited {
                provider: provider.to_string(),
                retry_after: *retry_after,
            },
            VendorFailure::Status { status: 404, body, .. }
                if http::mentions_missing_model(body) || body.contains("not_found_error") =>
            {
                ProviderError::UnsupportedModel {
                    provider: provider.to_string(),
                    model: extract_error_message(body).unwrap_or_else(|| "unknown".into()),
                }
            }
            _ => failure.classify(provider),
        }
    }

    /// Convert Anthropic API response to a [`Completion`].
    fn to_completion(resp: MessagesResponse, provider: &str, raw: &str) -> Result<Completion, VendorFailure> {
        let mut text = String::new();
        let mut saw_text = false;
        for block in &resp.content {
            if let ResponseContentBlock::Text { text: t } = block {
                if saw_text {
                    text.push('\n');
                }
                text.push_str(t);
                saw_text = true;
            }
        }
        if !saw_text {
            return Err(VendorFailure::Malformed {
                message: "response carried no text content block".into(),
                raw: raw.to_string(),
            });
        }

        Ok(Completion {
            text,
            usage: Some(Usage {
                prompt_tokens: resp.usage.input_tokens,
                completion_tokens: resp.usage.output_tokens,
                total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
            }),
            model: resp.model,
            provider: provider.to_string(),
        })
    }
}

impl Default for AnthropicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(String::from)
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn vendor(&self) -> Vendor {
        Vendor::Anthropic
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        config: &ProviderConfig,
    ) -> std::result::Result<Completion, ProviderError> {
        check_request(request, config)?;
        let body = Self::build_body(request, config, false);

        debug!(provider = %config.id, model = %config.model, "Sending completion request");

        let response = http::send(self.post(config, &body), config.timeout)
            .await
            .map_err(|f| self.map_error(f, config))?;
        let raw = http::read_body(response, config.timeout)
            .await
            .map_err(|f| self.map_error(f, config))?;

        let parsed: MessagesResponse =
            http::parse_json(&raw, "Anthropic response").map_err(|f| self.map_error(f, config))?;
        Self::to_completion(parsed, &config.id, &raw).map_err(|f| {
            let err = self.map_error(f, config);
            warn!(provider = %config.id, error = %err, "Anthropic response rejected");
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

        let response = http::send(self.post(config, &body), config.timeout)
            .await
            .map_err(|f| self.map_error(f, config))?;

        Ok(sse::spawn_stream(
            response,
            config.id.clone(),
            config.timeout,
            AnthropicStream::default(),
            Self::classify,
        ))
    }

    fn map_error(&self, failure: VendorFailure, config: &ProviderConfig) -> ProviderError {
        Self::classify(failure, &config.id)
    }
}

/// Accumulates Anthropic's typed stream events.
#[derive(Debug, Default)]
struct AnthropicStream {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicStream {
    fn usage(&self) -> Option<Usage> {
        if self.input_tokens == 0 && self.output_tokens == 0 {
            return None;
        }
        Some(Usage {
            prompt_tokens: self.input_tokens,
            completion_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
        })
    }
}

impl StreamParser for AnthropicStream {
    fn on_event(&mut self, event: &SseEvent) -> Result<Vec<StreamChunk>, VendorFailure> {
        let data = event.data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                return Ok(Vec::new());
            }
        };

        let event_type = value["type"]
            .as_str()
            .or(event.event.as_deref())
            .unwrap_or("");

        match event_type {
            "message_start" => {
                if let Some(n) = value["message"]["usage"]["input_tokens"].as_u64() {
                    self.input_tokens = n as u32;
                }
                Ok(Vec::new())
            }
            "content_block_delta" => {
                let delta = &value["delta"];
                match (delta["type"].as_str(), delta["text"].as_str()) {
                    (Some("text_delta"), Some(text)) => Ok(vec![StreamChunk::text(text)]),
                    _ => Ok(Vec::new()),
                }
            }
            "message_delta" => {
                if let Some(n) = value["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = n as u32;
                }
                Ok(Vec::new())
            }
            "message_stop" => Ok(vec![StreamChunk::finished(self.usage())]),
            "error" => {
                let kind = value["error"]["type"].as_str().unwrap_or("");
                let status = match kind {
                    "overloaded_error" => 529,
                    "rate_limit_error" => 429,
                    "api_error" => 500,
                    "authentication_error" => 401,
                    _ => {
                        return Err(VendorFailure::Malformed {
                            message: format!("stream error event: {kind}"),
                            raw: data.to_string(),
                        });
                    }
                };
                Err(VendorFailure::Status {
                    status,
                    retry_after: None,
                    body: data.to_string(),
                })
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Only reached when the body closed before `message_stop`.
    fn on_end(&mut self) -> Result<StreamChunk, VendorFailure> {
        Err(VendorFailure::Transport {
            message: "stream closed before message_stop".into(),
            timed_out: false,
        })
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> ProviderConfig {
        ProviderConfig {
            id: "anthropic".into(),
            vendor: Vendor::Anthropic,
            endpoint: "https://api.anthropic.com".into(),
            api_key: Some("sk-ant-test".into()),
            model: "claude-sonnet-4-20250514".into(),
            models: vec![],
            defaults: GenerationParams {
                temperature: Some(0.7),
                max_tokens: Some(1024),
                top_p: None,
            },
            context_window: 200_000,
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn system_extraction() {
        let messages = vec![
            ChatMessage::system("You are a writing partner"),
            ChatMessage::system("Passages: ..."),
            ChatMessage::user("Hello"),
            ChatMessage::assistant("Hi!"),
        ];

        let (system, rest) = AnthropicAdapter::extract_system(&messages);
        assert_eq!(
            system.as_deref(),
            Some("You are a writing partner\n\nPassages: ...")
        );
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].role, "user");
        assert_eq!(rest[1].role, "assistant");
    }

    #[test]
    fn system_extraction_no_system() {
        let messages = vec![ChatMessage::user("Hello")];
        let (system, rest) = AnthropicAdapter::extract_system(&messages);
        assert!(system.is_none());
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn request_body_uses_config_defaults() {
        let request = GenerationRequest::new(vec![ChatMessage::user("Hi")]).with_params(
            GenerationParams {
                temperature: Some(0.1),
                ..Default::default()
            },
        );
        let body = AnthropicAdapter::build_body(&request, &config(), true);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "claude-sonnet-4-20250514");
        assert_eq!(json["max_tokens"], 1024);
        assert!((json["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
        assert_eq!(json["stream"], true);
        assert!(json.get("system").is_none());
    }

    #[test]
    fn parse_text_response() {
        let raw = r#"{
            "id": "msg_01",
            "model": "claude-sonnet-4-20250514",
            "content": [{"type": "text", "text": "Hello!"}],
            "usage": {"input_tokens": 10, "output_tokens": 5},
            "stop_reason": "end_turn"
        }"#;
        let resp: MessagesResponse = http::parse_json(raw, "test").unwrap();
        let c = AnthropicAdapter::to_completion(resp, "anthropic", raw).unwrap();
        assert_eq!(c.text, "Hello!");
        assert_eq!(c.usage.unwrap().total_tokens, 15);
        assert_eq!(c.provider, "anthropic");
    }

    #[test]
    fn response_without_text_is_malformed() {
        let raw = r#"{
            "model": "claude-sonnet-4-20250514",
            "content": [{"type": "thinking", "thinking": "hmm"}],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }"#;
        let resp: MessagesResponse = http::parse_json(raw, "test").unwrap();
        let err = AnthropicAdapter::to_completion(resp, "anthropic", raw).unwrap_err();
        let mapped = AnthropicAdapter::classify(err, "anthropic");
        match mapped {
            ProviderError::Protocol { raw: kept, .. } => assert!(kept.contains("thinking")),
            other => panic!("Expected Protocol, got: {other:?}"),
        }
    }

    #[test]
    fn overload_is_rate_limited() {
        let err = AnthropicAdapter::classify(
            VendorFailure::Status {
                status: 529,
                retry_after: None,
                body: r#"{"type":"error","error":{"type":"overloaded_error"}}"#.into(),
            },
            "anthropic",
        );
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }

    #[test]
    fn missing_model_is_unsupported() {
        let err = AnthropicAdapter::classify(
            VendorFailure::Status {
                status: 404,
                retry_after: None,
                body: r#"{"type":"error","error":{"type":"not_found_error","message":"model: claude-9"}}"#.into(),
            },
            "anthropic",
        );
        assert!(matches!(err, ProviderError::UnsupportedModel { .. }));
    }

    fn event(name: &str, data: &str) -> SseEvent {
        SseEvent {
            event: Some(name.into()),
            data: data.into(),
        }
    }

    #[test]
    fn stream_events_produce_text_and_usage() {
        let mut parser = AnthropicStream::default();
        assert!(parser
            .on_event(&event(
                "message_start",
                r#"{"type":"message_start","message":{"usage":{"input_tokens":12,"output_tokens":1}}}"#
            ))
            .unwrap()
            .is_empty());

        let chunks = parser
            .on_event(&event(
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Alice"}}"#,
            ))
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content.as_deref(), Some("Alice"));

        parser
            .on_event(&event(
                "message_delta",
                r#"{"type":"message_delta","usage":{"output_tokens":7}}"#,
            ))
            .unwrap();

        let done = parser
            .on_event(&event("message_stop", r#"{"type":"message_stop"}"#))
            .unwrap();
        assert!(done[0].done);
        assert_eq!(done[0].usage.unwrap().total_tokens, 19);
    }

    #[test]
    fn stream_cut_before_message_stop_is_retryable() {
        let mut parser = AnthropicStream::default();
        parser
            .on_event(&event(
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Ali"}}"#,
            ))
            .unwrap();
        let failure = parser.on_end().unwrap_err();
        assert!(matches!(failure, VendorFailure::Transport { .. }));
        assert!(AnthropicAdapter::classify(failure, "anthropic").is_retryable());
    }

    #[test]
    fn stream_error_event_is_classified() {
        let mut parser = AnthropicStream::default();
        let failure = parser
            .on_event(&event(
                "error",
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            ))
            .unwrap_err();
        assert!(AnthropicAdapter::classify(failure, "anthropic").is_retryable());
    }

    #[test]
    fn blank_request_never_reaches_network() {
        let adapter = AnthropicAdapter::new();
        let request = GenerationRequest::new(vec![ChatMessage::user("  ")]);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let err = rt.block_on(adapter.generate(&request, &config())).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }
}
