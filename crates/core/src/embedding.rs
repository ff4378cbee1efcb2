//! Embedder trait — turns text into fixed-width vectors.
//!
//! The same embedder must be used to index the project and to embed queries;
//! the index records [`Embedder::model`] and [`Embedder::dimensions`] and
//! refuses queries from a different one.

use async_trait::async_trait;

use crate::error::EmbeddingError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier of the embedding model (e.g. "hashing-v1").
    fn model(&self) -> &str;

    /// Width of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                got: vectors.len(),
            });
        }
        Ok(vectors.remove(0))
    }
}
