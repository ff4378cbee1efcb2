//! Embeddings served by an OpenAI-compatible `/embeddings` endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use writingway_config::{AppConfig, ConfigError};
use writingway_core::embedding::Embedder;
use writingway_core::error::EmbeddingError;
use writingway_core::provider::ProviderConfig;

use crate::openai_compat::OpenAiCompatAdapter;

/// Inputs per request; large projects are embedded in batches.
const BATCH_SIZE: usize = 64;

pub struct ApiEmbedder {
    adapter: OpenAiCompatAdapter,
    config: Arc<ProviderConfig>,
    dimensions: usize,
}

impl ApiEmbedder {
    /// `config.model` names the embedding model.
    pub fn new(config: Arc<ProviderConfig>, dimensions: usize) -> Self {
        Self {
            adapter: OpenAiCompatAdapter::new(),
            config,
            dimensions,
        }
    }

    /// Build from the `[indexing]` section: the embedding provider (or the
    /// default provider) pointed at `embedding_model`.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let provider = config
            .indexing
            .embedding_provider
            .as_deref()
            .unwrap_or(&config.default_provider);
        let resolved = config.resolve_provider(provider, None)?;
        // The chat model list does not apply to embedding models.
        let resolved = ProviderConfig {
            models: Vec::new(),
            ..resolved.with_model(config.indexing.embedding_model.clone())
        };
        Ok(Self::new(
            Arc::new(resolved),
            config.indexing.embedding_dimensions,
        ))
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    fn model(&self) -> &str {
        &self.config.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(BATCH_SIZE) {
            debug!(
                provider = %self.config.id,
                model = %self.config.model,
                count = batch.len(),
                "Embedding batch"
            );
            let vectors = self.adapter.embed(&self.config, batch).await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    got: vectors.len(),
                });
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
                return Err(EmbeddingError::Backend {
                    backend: self.config.model.clone(),
                    message: format!(
                        "expected {}-dimensional vectors, got {}",
                        self.dimensions,
                        bad.len()
                    ),
                });
            }
            out.extend(vectors);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_uses_embedding_model() {
        let mut config = AppConfig::default();
        config.indexing.embedder = "api".into();
        config.indexing.embedding_provider = Some("openai".into());
        config.indexing.embedding_model = "text-embedding-3-large".into();
        config.indexing.embedding_dimensions = 3072;

        let embedder = ApiEmbedder::from_config(&config).unwrap();
        assert_eq!(embedder.model(), "text-embedding-3-large");
        assert_eq!(embedder.dimensions(), 3072);
        assert!(embedder.config.endpoint.contains("api.openai.com"));
    }

    #[test]
    fn unknown_embedding_provider_is_config_error() {
        let mut config = AppConfig::default();
        config.indexing.embedding_provider = Some("nowhere".into());
        assert!(matches!(
            ApiEmbedder::from_config(&config),
            Err(ConfigError::UnknownProvider(_))
        ));
    }

    #[tokio::test]
    async fn empty_input_makes_no_request() {
        let mut config = AppConfig::default();
        config.indexing.embedding_provider = Some("openai".into());
        let embedder = ApiEmbedder::from_config(&config).unwrap();
        let vectors = embedder.embed(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }
}
