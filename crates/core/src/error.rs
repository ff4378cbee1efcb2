//! Error types for the Writingway domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! wraps them for callers that don't care which layer failed.

use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all Writingway operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Generation (aggregator boundary) ---
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    // --- Index errors ---
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    // --- Embedding errors ---
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors raised by a single provider adapter call.
///
/// These never leave the provider layer: the aggregator maps them into
/// [`GenerationError`] after applying its retry policy.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network failure, timeout or vendor-side 5xx. Retryable.
    #[error("Transient failure from provider '{provider}': {message}")]
    Transient { provider: String, message: String },

    /// Vendor-declared rate limit. Retryable after `retry_after` when given.
    #[error("Rate limited by provider '{provider}'")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication failed for provider '{provider}': {message}")]
    Auth { provider: String, message: String },

    /// The vendor answered, but not in a shape we understand. `raw` keeps the
    /// payload for diagnosis.
    #[error("Malformed response from provider '{provider}': {message}")]
    Protocol {
        provider: String,
        message: String,
        raw: String,
    },

    #[error("Model '{model}' is not supported by provider '{provider}'")]
    UnsupportedModel { provider: String, model: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Whether the aggregator may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::RateLimited { .. })
    }

    /// Vendor-suggested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// The provider that raised this error, when known.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Transient { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Auth { provider, .. }
            | Self::Protocol { provider, .. }
            | Self::UnsupportedModel { provider, .. } => Some(provider),
            Self::InvalidRequest(_) => None,
        }
    }

    /// Short machine-friendly label used in diagnostics events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::RateLimited { .. } => "rate_limited",
            Self::Auth { .. } => "auth",
            Self::Protocol { .. } => "protocol",
            Self::UnsupportedModel { .. } => "unsupported_model",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Errors surfaced by the aggregator to the rest of the system.
///
/// A cancelled generation is an outcome, not an error, so it has no variant here.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed for provider '{provider}': {message}")]
    Auth { provider: String, message: String },

    #[error("Model '{model}' is not supported by provider '{provider}'")]
    UnsupportedModel { provider: String, model: String },

    #[error("Provider '{provider}' returned a response that could not be parsed: {message}")]
    Protocol {
        provider: String,
        message: String,
        raw: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Generation failed after {attempts} attempt(s): {last}")]
    Failed { attempts: u32, last: ProviderError },

    /// The generation task stopped without reaching a terminal outcome.
    #[error("Generation aborted: {0}")]
    Aborted(String),
}

impl GenerationError {
    /// Map a provider error into the aggregator taxonomy.
    ///
    /// Non-retryable errors keep their identity; retryable ones only reach
    /// this point once the retry budget is spent and become [`Self::Failed`].
    pub fn from_provider(error: ProviderError, attempts: u32) -> Self {
        match error {
            ProviderError::Auth { provider, message } => Self::Auth { provider, message },
            ProviderError::UnsupportedModel { provider, model } => {
                Self::UnsupportedModel { provider, model }
            }
            ProviderError::Protocol {
                provider,
                message,
                raw,
            } => Self::Protocol {
                provider,
                message,
                raw,
            },
            ProviderError::InvalidRequest(message) => Self::InvalidRequest(message),
            last @ (ProviderError::Transient { .. } | ProviderError::RateLimited { .. }) => {
                Self::Failed { attempts, last }
            }
        }
    }
}

/// Errors from computing embeddings.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    #[error("Embedding backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },

    #[error("Embedding backend returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Errors from the document index and retrieval engine.
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    /// A vector of the wrong width was offered to the index.
    #[error("Embedding dimension mismatch: index expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// The query embedder is not the one the index was built with.
    #[error(
        "Index was built with '{index_model}' ({index_dimensions} dims) but the query embedder is '{query_model}' ({query_dimensions} dims); re-index the project"
    )]
    IndexMismatch {
        index_model: String,
        index_dimensions: usize,
        query_model: String,
        query_dimensions: usize,
    },

    #[error("Invalid source unit id: {0:?}")]
    InvalidSource(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::Auth {
            provider: "anthropic".into(),
            message: "invalid x-api-key".into(),
        });
        assert!(err.to_string().contains("anthropic"));
        assert!(err.to_string().contains("Authentication failed"));
    }

    #[test]
    fn retryable_classification() {
        let transient = ProviderError::Transient {
            provider: "openai".into(),
            message: "connection reset".into(),
        };
        let limited = ProviderError::RateLimited {
            provider: "openai".into(),
            retry_after: Some(Duration::from_secs(7)),
        };
        let auth = ProviderError::Auth {
            provider: "openai".into(),
            message: "bad key".into(),
        };
        assert!(transient.is_retryable());
        assert!(limited.is_retryable());
        assert!(!auth.is_retryable());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(auth.provider(), Some("openai"));
    }

    #[test]
    fn exhausted_transient_becomes_failed() {
        let err = GenerationError::from_provider(
            ProviderError::Transient {
                provider: "gemini".into(),
                message: "503".into(),
            },
            3,
        );
        match err {
            GenerationError::Failed { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.kind(), "transient");
            }
            other => panic!("Expected Failed, got: {other:?}"),
        }
    }

    #[test]
    fn protocol_error_keeps_raw_payload() {
        let err = GenerationError::from_provider(
            ProviderError::Protocol {
                provider: "anthropic".into(),
                message: "missing content".into(),
                raw: "{\"weird\":true}".into(),
            },
            1,
        );
        match err {
            GenerationError::Protocol { raw, .. } => assert!(raw.contains("weird")),
            other => panic!("Expected Protocol, got: {other:?}"),
        }
    }

    #[test]
    fn index_mismatch_is_actionable() {
        let err = IndexError::IndexMismatch {
            index_model: "hashing-v1".into(),
            index_dimensions: 512,
            query_model: "text-embedding-3-small".into(),
            query_dimensions: 1536,
        };
        assert!(err.to_string().contains("re-index"));
    }
}
