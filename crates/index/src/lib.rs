//! Content-addressed document index and retrieval for Writingway.
//!
//! Project text (scenes, compendium entries, notes) is split into
//! overlapping spans, embedded, and kept in an immutable snapshot that
//! readers load without locking. The [`RetrievalEngine`] ranks spans
//! against a query by cosine similarity.

pub mod chunker;
pub mod hashing;
pub mod indexer;
pub mod retrieval;
pub mod vector;

pub use chunker::{ChunkId, ChunkerConfig};
pub use hashing::HashingEmbedder;
pub use indexer::{DocumentChunk, DocumentIndexer, IndexSnapshot};
pub use retrieval::{RetrievalEngine, RetrievalResult, ScoredChunk};
pub use vector::cosine_similarity;
