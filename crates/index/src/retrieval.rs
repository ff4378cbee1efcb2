//! Similarity search over the current index snapshot.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use writingway_core::error::IndexError;
use writingway_core::event::{DiagnosticEvent, EventBus};

use crate::chunker::ChunkId;
use crate::indexer::{DocumentChunk, DocumentIndexer};
use crate::vector::cosine_similarity;

/// Default cosine above which two chunks count as the same passage.
pub const DEFAULT_REDUNDANCY_THRESHOLD: f32 = 0.97;

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Arc<DocumentChunk>,
    pub score: f32,
}

/// Ranked, deduplicated chunks. Score descending, ties by ascending id.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub chunks: Vec<ScoredChunk>,
    /// Snapshot generation the query ran against.
    pub generation: u64,
    /// Chunks at or above the similarity floor, before diversity and `k`.
    pub candidates: usize,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn ids(&self) -> Vec<ChunkId> {
        self.chunks.iter().map(|c| c.chunk.id.clone()).collect()
    }
}

pub struct RetrievalEngine {
    indexer: Arc<DocumentIndexer>,
    redundancy_threshold: f32,
    events: Option<Arc<EventBus>>,
}

impl RetrievalEngine {
    pub fn new(indexer: Arc<DocumentIndexer>) -> Self {
        Self {
            indexer,
            redundancy_threshold: DEFAULT_REDUNDANCY_THRESHOLD,
            events: None,
        }
    }

    pub fn with_redundancy_threshold(mut self, threshold: f32) -> Self {
        self.redundancy_threshold = threshold;
        self
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn indexer(&self) -> &Arc<DocumentIndexer> {
        &self.indexer
    }

    /// Return at most `k` chunks scoring at least `floor` against `text`.
    ///
    /// A blank query, `k == 0`, an empty index or nothing above the floor
    /// yields an empty result.
    pub async fn query(&self, text: &str, k: usize, floor: f32) -> Result<RetrievalResult, IndexError> {
        let snapshot = self.indexer.snapshot();
        let empty = RetrievalResult {
            generation: snapshot.generation(),
            ..Default::default()
        };
        if text.trim().is_empty() || k == 0 || snapshot.is_empty() {
            return Ok(empty);
        }

        let embedder = self.indexer.embedder();
        if embedder.model() != snapshot.model() || embedder.dimensions() != snapshot.dimensions() {
            return Err(IndexError::IndexMismatch {
                index_model: snapshot.model().to_string(),
                index_dimensions: snapshot.dimensions(),
                query_model: embedder.model().to_string(),
                query_dimensions: embedder.dimensions(),
            });
        }

        let query = embedder.embed_one(text).await?;
        if query.len() != snapshot.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: snapshot.dimensions(),
                got: query.len(),
            });
        }

        let mut scored: Vec<ScoredChunk> = snapshot
            .chunks()
            .map(|chunk| ScoredChunk {
                score: cosine_similarity(&query, &chunk.embedding),
                chunk: Arc::clone(chunk),
            })
            .filter(|c| c.score >= floor)
            .collect();
        let candidates = scored.len();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });

        let mut selected: Vec<ScoredChunk> = Vec::with_capacity(k.min(candidates));
        for candidate in scored {
            if selected.len() >= k {
                break;
            }
            let redundant = selected.iter().any(|kept| {
                kept.chunk.overlaps(&candidate.chunk)
                    || cosine_similarity(&kept.chunk.embedding, &candidate.chunk.embedding)
                        >= self.redundancy_threshold
            });
            if redundant {
                debug!(chunk = candidate.chunk.id.short(), "Skipping redundant chunk");
                continue;
            }
            selected.push(candidate);
        }

        debug!(
            candidates,
            returned = selected.len(),
            generation = snapshot.generation(),
            "Retrieval finished"
        );
        if let Some(bus) = &self.events {
            bus.publish(DiagnosticEvent::RetrievalPerformed {
                candidates,
                returned: selected.len(),
                generation: snapshot.generation(),
                timestamp: Utc::now(),
            });
        }

        Ok(RetrievalResult {
            chunks: selected,
            generation: snapshot.generation(),
            candidates,
        })
    }

    /// Query with the latest turn, folding in a conversation summary if any.
    pub async fn query_conversation(
        &self,
        latest_turn: &str,
        summary: Option<&str>,
        k: usize,
        floor: f32,
    ) -> Result<RetrievalResult, IndexError> {
        match summary.map(str::trim).filter(|s| !s.is_empty()) {
            Some(summary) => self.query(&format!("{summary}\n{latest_turn}"), k, floor).await,
            None => self.query(latest_turn, k, floor).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkerConfig;
    use crate::hashing::HashingEmbedder;
    use async_trait::async_trait;
    use writingway_core::embedding::Embedder;
    use writingway_core::error::EmbeddingError;

    fn engine() -> RetrievalEngine {
        let indexer = DocumentIndexer::new(Arc::new(HashingEmbedder::default()), ChunkerConfig::default());
        RetrievalEngine::new(Arc::new(indexer))
    }

    #[tokio::test]
    async fn betrayal_query_ranks_castle_first() {
        let engine = engine();
        engine.indexer().upsert("forest", "Alice meets Bob in the forest.").await.unwrap();
        engine.indexer().upsert("castle", "Bob betrays Alice at the castle.").await.unwrap();

        let result = engine.query("Where did Bob betray someone?", 5, 0.0).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.chunks[0].chunk.source, "castle");
        assert_eq!(result.chunks[1].chunk.source, "forest");
        assert!(result.chunks[0].score > result.chunks[1].score);
    }

    #[tokio::test]
    async fn repeated_queries_are_identical() {
        let engine = engine();
        for (i, line) in ["The tower fell.", "The tower burned.", "A quiet harbour."].iter().enumerate() {
            engine.indexer().upsert(&format!("s{i}"), line).await.unwrap();
        }
        let a = engine.query("tower", 3, 0.0).await.unwrap();
        let b = engine.query("tower", 3, 0.0).await.unwrap();
        assert_eq!(a.ids(), b.ids());
        assert_eq!(a.generation, b.generation);
    }

    #[tokio::test]
    async fn ties_break_by_chunk_id() {
        let engine = engine().with_redundancy_threshold(1.1);
        engine.indexer().upsert("one", "Same words here.").await.unwrap();
        engine.indexer().upsert("two", "Same words here.").await.unwrap();

        let result = engine.query("same words", 5, 0.0).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.chunks[0].score, result.chunks[1].score);
        assert!(result.chunks[0].chunk.id < result.chunks[1].chunk.id);
    }

    #[tokio::test]
    async fn near_duplicates_keep_one_representative() {
        let engine = engine();
        engine.indexer().upsert("one", "Same words here.").await.unwrap();
        engine.indexer().upsert("two", "Same words here.").await.unwrap();

        let result = engine.query("same words", 5, 0.0).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.candidates, 2);
    }

    #[tokio::test]
    async fn overlapping_spans_of_one_source_are_deduplicated() {
        let indexer = DocumentIndexer::new(
            Arc::new(HashingEmbedder::default()),
            ChunkerConfig {
                target_chars: 40,
                overlap: 0.5,
            },
        );
        let engine = RetrievalEngine::new(Arc::new(indexer)).with_redundancy_threshold(1.1);
        let text = "dragon ".repeat(30);
        engine.indexer().upsert("lair", &text).await.unwrap();
        assert!(engine.indexer().snapshot().len() > 1);

        let result = engine.query("dragon", 10, 0.0).await.unwrap();
        for (i, a) in result.chunks.iter().enumerate() {
            for b in &result.chunks[i + 1..] {
                assert!(!a.chunk.overlaps(&b.chunk));
            }
        }
    }

    #[tokio::test]
    async fn respects_k_and_floor() {
        let engine = engine().with_redundancy_threshold(1.1);
        for i in 0..5 {
            engine
                .indexer()
                .upsert(&format!("s{i}"), &format!("The lighthouse keeper, chapter {i}."))
                .await
                .unwrap();
        }
        engine.indexer().upsert("x", "Completely unrelated cooking notes.").await.unwrap();

        assert_eq!(engine.query("lighthouse keeper", 2, 0.0).await.unwrap().len(), 2);
        let floored = engine.query("lighthouse keeper", 10, 0.3).await.unwrap();
        assert!(floored.chunks.iter().all(|c| c.score >= 0.3));
        assert!(floored.chunks.iter().all(|c| c.chunk.source != "x"));
    }

    #[tokio::test]
    async fn degenerate_queries_return_empty() {
        let engine = engine();
        assert!(engine.query("anything", 5, 0.0).await.unwrap().is_empty());

        engine.indexer().upsert("a", "Some scene text.").await.unwrap();
        assert!(engine.query("   ", 5, 0.0).await.unwrap().is_empty());
        assert!(engine.query("scene", 0, 0.0).await.unwrap().is_empty());
        assert!(engine.query("scene", 5, 1.01).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removed_scene_never_returned() {
        let engine = engine();
        engine.indexer().upsert("gone", "Bob betrays Alice at the castle.").await.unwrap();
        engine.indexer().upsert("kept", "Alice meets Bob in the forest.").await.unwrap();
        engine.indexer().remove("gone").await;

        let result = engine.query("Bob betrays Alice at the castle", 10, 0.0).await.unwrap();
        assert!(result.chunks.iter().all(|c| c.chunk.source != "gone"));
        assert_eq!(result.len(), 1);
    }

    struct OtherModel;

    #[async_trait]
    impl Embedder for OtherModel {
        fn model(&self) -> &str {
            "other"
        }
        fn dimensions(&self) -> usize {
            512
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0; 512]).collect())
        }
    }

    #[tokio::test]
    async fn query_with_foreign_embedder_is_index_mismatch() {
        let built = DocumentIndexer::new(Arc::new(HashingEmbedder::default()), ChunkerConfig::default());
        built.upsert("a", "Some scene text.").await.unwrap();

        let foreign = DocumentIndexer::new(Arc::new(OtherModel), ChunkerConfig::default());
        foreign.restore(built.snapshot()).await;
        let engine = RetrievalEngine::new(Arc::new(foreign));

        let err = engine.query("scene", 5, 0.0).await.unwrap_err();
        assert!(matches!(err, IndexError::IndexMismatch { .. }));
        assert!(err.to_string().contains("re-index"));
    }

    #[tokio::test]
    async fn summary_is_folded_into_the_query() {
        let engine = engine();
        engine.indexer().upsert("castle", "Bob betrays Alice at the castle.").await.unwrap();
        engine.indexer().upsert("harbour", "The ship leaves the harbour.").await.unwrap();

        let plain = engine.query_conversation("What happens next?", None, 1, 0.0).await.unwrap();
        let guided = engine
            .query_conversation("What happens next?", Some("The ship and the harbour"), 1, 0.0)
            .await
            .unwrap();
        assert_eq!(guided.chunks[0].chunk.source, "harbour");
        assert!(plain.len() <= 1);
    }

    #[tokio::test]
    async fn publishes_retrieval_performed() {
        let bus = Arc::new(EventBus::default());
        let engine = engine().with_events(bus.clone());
        engine.indexer().upsert("a", "Alice meets Bob.").await.unwrap();
        let mut rx = bus.subscribe();

        engine.query("Alice", 3, 0.0).await.unwrap();
        match rx.recv().await.unwrap().as_ref() {
            DiagnosticEvent::RetrievalPerformed {
                candidates,
                returned,
                generation,
                ..
            } => {
                assert_eq!(*candidates, 1);
                assert_eq!(*returned, 1);
                assert_eq!(*generation, 1);
            }
            other => panic!("Expected RetrievalPerformed, got: {other:?}"),
        }
    }
}
