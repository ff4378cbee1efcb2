//! Provider adapter trait — the abstraction over LLM vendors.
//!
//! An adapter knows how to send a generic [`GenerationRequest`] to one
//! vendor's API and turn the answer back into a [`Completion`] or a stream of
//! [`StreamChunk`]s. Adapters hold no per-call state; everything a call needs
//! (endpoint, credential, model, default parameters, timeout) comes from the
//! immutable [`ProviderConfig`] passed alongside the request.
//!
//! Implementations: Anthropic Messages API, OpenAI-compatible chat
//! completions, Google Gemini.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::ChatMessage;

/// Wire protocol family a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Anthropic,
    /// OpenAI and every OpenAI-compatible endpoint (OpenRouter, Ollama, LM Studio, …)
    OpenAi,
    Gemini,
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Vendor::Anthropic => "anthropic",
            Vendor::OpenAi => "openai",
            Vendor::Gemini => "gemini",
        };
        f.write_str(s)
    }
}

/// Sampling parameters. `None` means "leave it to the next layer down".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl GenerationParams {
    /// Layer `overrides` on top of `self`; set fields in `overrides` win.
    pub fn merged(&self, overrides: &GenerationParams) -> GenerationParams {
        GenerationParams {
            temperature: overrides.temperature.or(self.temperature),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            top_p: overrides.top_p.or(self.top_p),
        }
    }
}

/// Resolved, immutable settings for one provider + model pair.
///
/// Built once from the configuration catalogue and shared as
/// `Arc<ProviderConfig>`. Switching model or provider builds a new value.
#[derive(Clone, PartialEq)]
pub struct ProviderConfig {
    /// Catalogue key (e.g. "openrouter", "local-ollama").
    pub id: String,

    pub vendor: Vendor,

    /// Base URL without trailing slash.
    pub endpoint: String,

    /// Resolved credential. `None` for local endpoints.
    pub api_key: Option<String>,

    /// The model requests are sent to.
    pub model: String,

    /// Models this provider accepts. Empty means "don't check".
    pub models: Vec<String>,

    /// Default sampling parameters, overridden per request.
    pub defaults: GenerationParams,

    /// Maximum prompt + completion tokens the model accepts.
    pub context_window: usize,

    /// Bounded wait for a single attempt.
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Whether `model` is acceptable for this provider.
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }

    /// A copy of this config pointed at a different model.
    pub fn with_model(&self, model: impl Into<String>) -> ProviderConfig {
        ProviderConfig {
            model: model.into(),
            ..self.clone()
        }
    }

    /// Tokens left for the prompt once `max_output` is reserved for the answer.
    pub fn prompt_budget(&self, max_output: u32) -> usize {
        self.context_window.saturating_sub(max_output as usize)
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("vendor", &self.vendor)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("models", &self.models)
            .field("defaults", &self.defaults)
            .field("context_window", &self.context_window)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A generic generation request. Built per call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The conversation to continue, system messages first.
    pub messages: Vec<ChatMessage>,

    /// Per-request overrides of the provider defaults.
    pub params: GenerationParams,

    /// Signalled when the caller no longer wants the answer.
    pub cancel: CancellationToken,
}

impl GenerationRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            params: GenerationParams::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// True when no message carries any non-whitespace text.
    pub fn is_blank(&self) -> bool {
        self.messages.iter().all(|m| m.content.trim().is_empty())
    }

    /// Effective parameters once the config defaults are applied.
    pub fn effective_params(&self, config: &ProviderConfig) -> GenerationParams {
        config.defaults.merged(&self.params)
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete (non-streaming) generation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Catalogue id of the provider that answered.
    pub provider: String,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            done: false,
            usage: None,
        }
    }

    pub fn finished(usage: Option<Usage>) -> Self {
        Self {
            content: None,
            done: true,
            usage,
        }
    }
}

/// Receiving side of an adapter stream.
pub type ChunkReceiver = mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// A vendor failure before it has been classified.
///
/// Adapters describe what went wrong in transport terms; [`ProviderAdapter::map_error`]
/// turns that into the generic taxonomy.
#[derive(Debug, Clone)]
pub enum VendorFailure {
    /// The request never produced an HTTP response (or the body stream broke).
    Transport { message: String, timed_out: bool },

    /// A non-success HTTP status.
    Status {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },

    /// A success status whose body could not be understood.
    Malformed { message: String, raw: String },
}

impl VendorFailure {
    /// Generic status-code classification shared by all adapters.
    pub fn classify(self, provider: &str) -> ProviderError {
        let provider = provider.to_string();
        match self {
            VendorFailure::Transport { message, timed_out } => ProviderError::Transient {
                provider,
                message: if timed_out {
                    format!("request timed out: {message}")
                } else {
                    message
                },
            },
            VendorFailure::Status {
                status,
                retry_after,
                body,
            } => match status {
                401 | 403 => ProviderError::Auth {
                    provider,
                    message: summarize_body(&body, status),
                },
                408 => ProviderError::Transient {
                    provider,
                    message: summarize_body(&body, status),
                },
                429 => ProviderError::RateLimited {
                    provider,
                    retry_after,
                },
                s if s >= 500 => ProviderError::Transient {
                    provider,
                    message: summarize_body(&body, status),
                },
                _ => ProviderError::Protocol {
                    provider,
                    message: format!("unexpected HTTP status {status}"),
                    raw: body,
                },
            },
            VendorFailure::Malformed { message, raw } => ProviderError::Protocol {
                provider,
                message,
                raw,
            },
        }
    }
}

fn summarize_body(body: &str, status: u16) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        let preview: String = trimmed.chars().take(300).collect();
        format!("HTTP {status}: {preview}")
    }
}

/// Parse an HTTP `Retry-After` header given in whole or fractional seconds.
///
/// Values that do not fit a [`Duration`] (negative, NaN, absurdly large)
/// are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Checks every adapter performs before touching the network.
pub fn check_request(
    request: &GenerationRequest,
    config: &ProviderConfig,
) -> std::result::Result<(), ProviderError> {
    if request.is_blank() {
        return Err(ProviderError::InvalidRequest(
            "request text must not be empty".into(),
        ));
    }
    if !config.supports_model(&config.model) {
        return Err(ProviderError::UnsupportedModel {
            provider: config.id.clone(),
            model: config.model.clone(),
        });
    }
    Ok(())
}

/// The core adapter trait.
///
/// Every vendor implements this trait. The aggregator calls `generate()` or
/// `generate_streaming()` through `Arc<dyn ProviderAdapter>` without knowing
/// which vendor is behind it.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// A human-readable name for this adapter (e.g. "anthropic").
    fn name(&self) -> &str;

    /// The wire protocol this adapter speaks.
    fn vendor(&self) -> Vendor;

    /// Send a request and get a complete response.
    async fn generate(
        &self,
        request: &GenerationRequest,
        config: &ProviderConfig,
    ) -> std::result::Result<Completion, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `generate()` and wraps the result as a
    /// single content chunk followed by the final chunk.
    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        config: &ProviderConfig,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let completion = self.generate(request, config).await?;
        let (tx, rx) = mpsc::channel(2);
        let _ = tx.send(Ok(StreamChunk::text(completion.text))).await;
        let _ = tx.send(Ok(StreamChunk::finished(completion.usage))).await;
        Ok(rx)
    }

    /// Map a vendor failure into the generic taxonomy.
    ///
    /// Adapters override this for vendor-specific status codes and error
    /// bodies, falling back to [`VendorFailure::classify`].
    fn map_error(&self, failure: VendorFailure, config: &ProviderConfig) -> ProviderError {
        failure.classify(&config.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig {
            id: "openrouter".into(),
            vendor: Vendor::OpenAi,
            endpoint: "https://openrouter.ai/api/v1".into(),
            api_key: Some("sk-secret".into()),
            model: "gpt-4o".into(),
            models: vec!["gpt-4o".into(), "gpt-4o-mini".into()],
            defaults: GenerationParams {
                temperature: Some(0.7),
                max_tokens: Some(1024),
                top_p: None,
            },
            context_window: 8192,
            timeout: Duration::from_secs(60),
        }
    }

    #[test]
    fn overrides_win_over_defaults() {
        let defaults = GenerationParams {
            temperature: Some(0.7),
            max_tokens: Some(1024),
            top_p: Some(0.9),
        };
        let overrides = GenerationParams {
            temperature: Some(0.2),
            ..Default::default()
        };
        let merged = defaults.merged(&overrides);
        assert_eq!(merged.temperature, Some(0.2));
        assert_eq!(merged.max_tokens, Some(1024));
        assert_eq!(merged.top_p, Some(0.9));
    }

    #[test]
    fn debug_redacts_api_key() {
        let dbg = format!("{:?}", config());
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn blank_request_is_rejected() {
        let req = GenerationRequest::new(vec![ChatMessage::user("   ")]);
        let err = check_request(&req, &config()).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[test]
    fn unknown_model_is_rejected() {
        let req = GenerationRequest::new(vec![ChatMessage::user("hello")]);
        let cfg = config().with_model("claude-opus");
        let err = check_request(&req, &cfg).unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedModel { .. }));
    }

    #[test]
    fn empty_model_list_accepts_anything() {
        let cfg = ProviderConfig {
            models: vec![],
            ..config()
        };
        assert!(cfg.supports_model("llama3.1:8b"));
    }

    #[test]
    fn prompt_budget_reserves_output() {
        assert_eq!(config().prompt_budget(1024), 7168);
        assert_eq!(config().prompt_budget(10_000), 0);
    }

    #[test]
    fn status_classification() {
        let p = "openai";
        assert!(matches!(
            VendorFailure::Status { status: 401, retry_after: None, body: String::new() }.classify(p),
            ProviderError::Auth { .. }
        ));
        assert!(matches!(
            VendorFailure::Status { status: 503, retry_after: None, body: String::new() }.classify(p),
            ProviderError::Transient { .. }
        ));
        assert!(matches!(
            VendorFailure::Status { status: 400, retry_after: None, body: "bad".into() }.classify(p),
            ProviderError::Protocol { .. }
        ));
        match (VendorFailure::Status {
            status: 429,
            retry_after: Some(Duration::from_secs(3)),
            body: String::new(),
        })
        .classify(p)
        {
            ProviderError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(3)))
            }
            other => panic!("Expected RateLimited, got: {other:?}"),
        }
    }

    #[test]
    fn transport_timeout_is_transient() {
        let err = VendorFailure::Transport {
            message: "deadline elapsed".into(),
            timed_out: true,
        }
        .classify("gemini");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn retry_after_parsing() {
        assert_eq!(parse_retry_after("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after("0.5"), Some(Duration::from_millis(500)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn retry_after_out_of_range_is_ignored() {
        assert_eq!(parse_retry_after("1e30"), None);
        assert_eq!(parse_retry_after("-3"), None);
        assert_eq!(parse_retry_after("NaN"), None);
        assert_eq!(parse_retry_after("inf"), None);
    }
}
