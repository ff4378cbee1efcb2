//! Vendor adapters and the generation aggregator for Writingway.
//!
//! All adapters implement the `writingway_core::ProviderAdapter` trait.
//! The [`Aggregator`] selects one by vendor and applies retry, backoff and
//! fallback policy on top.

pub mod aggregator;
pub mod anthropic;
pub mod embedder;
pub mod gemini;
mod http;
pub mod openai_compat;
pub mod retry;
pub mod sse;

pub use aggregator::{Aggregator, GenerationEvent, GenerationHandle, GenerationOutcome};
pub use anthropic::AnthropicAdapter;
pub use embedder::ApiEmbedder;
pub use gemini::GeminiAdapter;
pub use openai_compat::OpenAiCompatAdapter;
pub use retry::RetryPolicy;
