//! Local feature-hashing embedder.
//!
//! Maps word unigrams and character trigrams into a fixed number of buckets
//! with FNV-1a and a sign bit, then L2-normalizes. Lexically similar texts
//! ("betray" / "betrays") share most trigrams and land close together, which
//! is enough for grounding a conversation in project text without a network
//! round-trip. Fully deterministic.

use async_trait::async_trait;
use writingway_core::embedding::Embedder;
use writingway_core::error::EmbeddingError;

pub const HASHING_MODEL: &str = "hashing-v1";

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Embed one text synchronously.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];

        for word in words(text) {
            self.add(&mut v, b'w', word.as_bytes(), WORD_WEIGHT);

            let marked: Vec<char> = std::iter::once('^')
                .chain(word.chars())
                .chain(std::iter::once('$'))
                .collect();
            for tri in marked.windows(3) {
                let s: String = tri.iter().collect();
                self.add(&mut v, b't', s.as_bytes(), TRIGRAM_WEIGHT);
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    fn add(&self, v: &mut [f32], kind: u8, feature: &[u8], weight: f32) {
        let h = fnv1a(kind, feature);
        let bucket = (h % self.dimensions as u64) as usize;
        let sign = if (h >> 40) & 1 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(512)
    }
}

/// Lowercased alphanumeric runs.
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(kind: u8, bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h = OFFSET;
    for b in std::iter::once(&kind).chain(bytes) {
        h ^= *b as u64;
        h = h.wrapping_mul(PRIME);
    }
    h
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        HASHING_MODEL
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}
