//! Overlapping, whitespace-aware text chunker.
//!
//! Splits a source unit's text into spans of roughly `target_chars`
//! characters. Consecutive spans share about `overlap` of their length so a
//! sentence cut at a boundary still appears whole in one of them. Offsets are
//! character (not byte) positions into the original text.
//!
//! Every span gets a content-addressed [`ChunkId`]: the SHA-256 of its source
//! unit, offset and text. Re-chunking unchanged text yields the same ids.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content-addressed chunk identifier (lowercase hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(String);

impl ChunkId {
    /// Derive the id of `text` found at character offset `start` of `source`.
    pub fn derive(source: &str, start: usize, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update([0u8]);
        hasher.update(start.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for logs and terminal output.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 of a whole source text, used to skip unchanged upserts.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkerConfig {
    /// Target span length in characters.
    pub target_chars: usize,
    /// Fraction of `target_chars` repeated at the start of the next span.
    pub overlap: f32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_chars: 800,
            overlap: 0.15,
        }
    }
}

/// A span of source text, offsets in characters, `end` exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Split `text` into overlapping spans.
///
/// Whitespace-only text yields no spans. Span edges fall on whitespace when
/// any exists in the back half of the window; otherwise the cut is hard.
pub fn split(text: &str, config: &ChunkerConfig) -> Vec<Span> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let target = config.target_chars.max(1);
    let overlap = ((target as f32) * config.overlap.clamp(0.0, 0.9)) as usize;

    let mut spans = Vec::new();
    let mut start = skip_whitespace(&chars, 0);

    while start < n {
        let window_end = (start + target).min(n);
        let mut end = if window_end < n {
            // Back off to the last whitespace in the back half of the window.
            let floor = start + target / 2;
            (floor..window_end)
                .rev()
                .find(|&i| chars[i].is_whitespace())
                .unwrap_or(window_end)
        } else {
            window_end
        };
        while end > start && chars[end - 1].is_whitespace() {
            end -= 1;
        }
        if end == start {
            end = window_end;
        }

        spans.push(Span {
            start,
            end,
            text: chars[start..end].iter().collect(),
        });

        if window_end >= n {
            break;
        }

        // Step back by the overlap, then forward to the next word start.
        let mut next = end.saturating_sub(overlap).max(start + 1);
        while next < end && !chars[next - 1].is_whitespace() {
            next += 1;
        }
        next = skip_whitespace(&chars, next);
        if next <= start {
            next = skip_whitespace(&chars, end);
        }
        start = next;
    }

    spans
}

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(target: usize, overlap: f32) -> ChunkerConfig {
        ChunkerConfig {
            target_chars: target,
            overlap,
        }
    }

    #[test]
    fn short_text_single_span() {
        let spans = split("Alice meets Bob in the forest.", &ChunkerConfig::default());
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[0].text, "Alice meets Bob in the forest.");
    }

    #[test]
    fn blank_text_has_no_spans() {
        assert!(split("", &ChunkerConfig::default()).is_empty());
        assert!(split("  \n\t ", &ChunkerConfig::default()).is_empty());
    }

    #[test]
    fn long_text_spans_overlap_and_respect_words() {
        let text = "word ".repeat(100);
        let spans = split(&text, &cfg(50, 0.2));
        assert!(spans.len() > 1);
        for pair in spans.windows(2) {
            assert!(pair[1].start < pair[0].end, "spans should overlap");
            assert!(pair[1].start > pair[0].start, "spans should advance");
        }
        for span in &spans {
            assert!(span.text.chars().count() <= 50);
            assert!(!span.text.starts_with(' '));
            assert!(!span.text.ends_with(' '));
            assert!(span.text.split(' ').all(|w| w == "word"));
        }
    }

    #[test]
    fn offsets_are_characters() {
        let text = "é".repeat(30) + " " + &"ü".repeat(30);
        let spans = split(&text, &cfg(40, 0.0));
        assert_eq!(spans[0].text, "é".repeat(30));
        assert_eq!(spans[0].end, 30);
        assert_eq!(spans[1].start, 31);
        let original: Vec<char> = text.chars().collect();
        for span in &spans {
            let slice: String = original[span.start..span.end].iter().collect();
            assert_eq!(slice, span.text);
        }
    }

    #[test]
    fn text_without_whitespace_is_hard_split() {
        let text = "x".repeat(95);
        let spans = split(&text, &cfg(40, 0.0));
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[2].end, 95);
    }

    #[test]
    fn covers_whole_text() {
        let text = "The castle gate creaked. ".repeat(80);
        let spans = split(&text, &ChunkerConfig::default());
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans.last().unwrap().end, text.trim_end().chars().count());
    }

    #[test]
    fn chunk_ids_are_content_addressed() {
        let a = ChunkId::derive("act1/scene1", 0, "Bob betrays Alice.");
        let b = ChunkId::derive("act1/scene1", 0, "Bob betrays Alice.");
        let c = ChunkId::derive("act1/scene1", 5, "Bob betrays Alice.");
        let d = ChunkId::derive("act1/scene2", 0, "Bob betrays Alice.");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn content_hash_changes_with_text() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }
}
