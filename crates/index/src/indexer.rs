//! Document indexer — content-addressed chunks behind snapshot isolation.
//!
//! Writers serialize on an async mutex and publish a fresh
//! [`IndexSnapshot`] through `ArcSwap`; readers load the current snapshot
//! without locking and keep a consistent view for as long as they hold it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use writingway_core::embedding::Embedder;
use writingway_core::error::{EmbeddingError, IndexError};
use writingway_core::event::{DiagnosticEvent, EventBus};

use crate::chunker::{self, ChunkId, ChunkerConfig};

/// One embedded span of a source unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: ChunkId,
    /// Source unit id (scene, compendium entry, file path).
    pub source: String,
    /// Character offsets into the source text, `end` exclusive.
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub embedding: Vec<f32>,
    pub modified: DateTime<Utc>,
}

impl DocumentChunk {
    /// Whether two chunks cover intersecting text of the same source unit.
    pub fn overlaps(&self, other: &DocumentChunk) -> bool {
        self.source == other.source && self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Default)]
struct SourceEntry {
    content_hash: String,
    chunk_ids: Vec<ChunkId>,
}

/// An immutable, generation-tagged view of the whole index.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    generation: u64,
    model: String,
    dimensions: usize,
    chunks: BTreeMap<ChunkId, Arc<DocumentChunk>>,
    sources: BTreeMap<String, SourceEntry>,
}

impl IndexSnapshot {
    fn empty(model: &str, dimensions: usize) -> Self {
        Self {
            generation: 0,
            model: model.to_string(),
            dimensions,
            chunks: BTreeMap::new(),
            sources: BTreeMap::new(),
        }
    }

    /// Incremented by every committed mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Embedding model the vectors were produced with.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, id: &ChunkId) -> Option<&Arc<DocumentChunk>> {
        self.chunks.get(id)
    }

    /// All chunks in ascending id order.
    pub fn chunks(&self) -> impl Iterator<Item = &Arc<DocumentChunk>> {
        self.chunks.values()
    }

    /// Chunk ids of one source unit, in text order.
    pub fn chunk_ids_for(&self, source: &str) -> Vec<ChunkId> {
        self.sources
            .get(source)
            .map(|s| s.chunk_ids.clone())
            .unwrap_or_default()
    }

    /// Ids of every indexed source unit.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn content_hash(&self, source: &str) -> Option<&str> {
        self.sources.get(source).map(|s| s.content_hash.as_str())
    }
}

/// Owns the index and every chunk in it.
pub struct DocumentIndexer {
    embedder: Arc<dyn Embedder>,
    chunker: ChunkerConfig,
    snapshot: ArcSwap<IndexSnapshot>,
    writer: Mutex<()>,
    events: Option<Arc<EventBus>>,
}

impl DocumentIndexer {
    pub fn new(embedder: Arc<dyn Embedder>, chunker: ChunkerConfig) -> Self {
        let empty = IndexSnapshot::empty(embedder.model(), embedder.dimensions());
        Self {
            embedder,
            chunker,
            snapshot: ArcSwap::from_pointee(empty),
            writer: Mutex::new(()),
            events: None,
        }
    }

    /// Publish `IndexUpdated` events on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// The current snapshot. Never blocks.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.load_full()
    }

    /// Replace the whole index with a previously taken snapshot.
    ///
    /// The snapshot keeps its own model tag; queries through a different
    /// embedder then fail with `IndexMismatch` until the project is
    /// re-indexed.
    pub async fn restore(&self, snapshot: Arc<IndexSnapshot>) {
        let _guard = self.writer.lock().await;
        info!(
            model = snapshot.model(),
            chunks = snapshot.len(),
            generation = snapshot.generation(),
            "Restored index snapshot"
        );
        self.snapshot.store(snapshot);
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn chunker(&self) -> &ChunkerConfig {
        &self.chunker
    }

    /// Index (or re-index) a source unit.
    ///
    /// Returns the ids that entered or left the index. Unchanged text is a
    /// no-op; chunks whose id survives keep their stored embedding, so only
    /// new spans are embedded. On error the index is left untouched.
    pub async fn upsert(&self, source: &str, text: &str) -> Result<BTreeSet<ChunkId>, IndexError> {
        if source.trim().is_empty() {
            return Err(IndexError::InvalidSource(source.to_string()));
        }

        let _guard = self.writer.lock().await;
        let current = self.snapshot.load_full();
        let hash = chunker::content_hash(text);

        if current.content_hash(source) == Some(hash.as_str()) {
            debug!(source, "Source unchanged, skipping re-index");
            return Ok(BTreeSet::new());
        }

        let spans = chunker::split(text, &self.chunker);
        let new_ids: Vec<ChunkId> = spans
            .iter()
            .map(|s| ChunkId::derive(source, s.start, &s.text))
            .collect();

        let to_embed: Vec<usize> = new_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| !current.chunks.contains_key(*id))
            .map(|(i, _)| i)
            .collect();
        let texts: Vec<String> = to_embed.iter().map(|&i| spans[i].text.clone()).collect();

        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&texts).await?
        };
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            }
            .into());
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != current.dimensions) {
            return Err(IndexError::DimensionMismatch {
                expected: current.dimensions,
                got: bad.len(),
            });
        }

        let now = Utc::now();
        let mut next = IndexSnapshot::clone(&current);
        let old_ids: BTreeSet<ChunkId> = current.chunk_ids_for(source).into_iter().collect();
        let new_set: BTreeSet<ChunkId> = new_ids.iter().cloned().collect();

        for id in old_ids.difference(&new_set) {
            next.chunks.remove(id);
        }
        for (&i, embedding) in to_embed.iter().zip(vectors) {
            let span = &spans[i];
            next.chunks.insert(
                new_ids[i].clone(),
                Arc::new(DocumentChunk {
                    id: new_ids[i].clone(),
                    source: source.to_string(),
                    start: span.start,
                    end: span.end,
                    text: span.text.clone(),
                    embedding,
                    modified: now,
                }),
            );
        }
        next.sources.insert(
            source.to_string(),
            SourceEntry {
                content_hash: hash,
                chunk_ids: new_ids,
            },
        );
        next.generation = current.generation + 1;

        let added: BTreeSet<ChunkId> = new_set.difference(&old_ids).cloned().collect();
        let removed: BTreeSet<ChunkId> = old_ids.difference(&new_set).cloned().collect();
        let generation = next.generation;
        self.snapshot.store(Arc::new(next));

        info!(
            source,
            added = added.len(),
            removed = removed.len(),
            embedded = texts.len(),
            generation,
            "Indexed source unit"
        );
        self.publish(source, added.len(), removed.len(), texts.len(), generation);

        Ok(added.into_iter().chain(removed).collect())
    }

    /// Remove every chunk of a source unit. Returns how many were removed.
    pub async fn remove(&self, source: &str) -> usize {
        let _guard = self.writer.lock().await;
        let current = self.snapshot.load_full();
        let Some(entry) = current.sources.get(source) else {
            return 0;
        };

        let mut next = IndexSnapshot::clone(&current);
        let mut removed = 0;
        for id in &entry.chunk_ids {
            if next.chunks.remove(id).is_some() {
                removed += 1;
            }
        }
        next.sources.remove(source);
        next.generation = current.generation + 1;
        let generation = next.generation;
        self.snapshot.store(Arc::new(next));

        info!(source, removed, generation, "Removed source unit");
        self.publish(source, 0, removed, 0, generation);
        removed
    }

    fn publish(&self, source: &str, added: usize, removed: usize, embedded: usize, generation: u64) {
        if let Some(bus) = &self.events {
            bus.publish(DiagnosticEvent::IndexUpdated {
                source_unit: source.to_string(),
                chunks_added: added,
                chunks_removed: removed,
                embeddings_computed: embedded,
                generation,
                timestamp: Utc::now(),
            });
        }
    }
}
