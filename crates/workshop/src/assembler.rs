//! Context assembly — packs instructions, history and retrieved passages
//! into one token-bounded prompt.
//!
//! Priority, highest first:
//!
//! | Part | Rule |
//! |------|------|
//! | Template | Never truncated; alone over budget is an error |
//! | Newest turn | Included when it fits, even past the history share |
//! | Older turns | Newest first, whole turns, until the history share is used |
//!
//! History stops at the first turn that does not fit, so an oversized newest
//! turn leaves a prompt with no conversation at all.
//! | Passages | Score order; a passage that does not fit is dropped whole |
//!
//! Assembly is deterministic: identical inputs give identical prompts.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use writingway_core::message::{ChatMessage, ConversationTurn, PromptRecord};
use writingway_index::{ChunkId, RetrievalResult};

use crate::token::{HeuristicCounter, TokenCounter};

/// Heading placed between the template and the retrieved passages.
pub const PASSAGES_HEADER: &str = "\n\n## Relevant passages from the project\n";

/// Default share of the budget conversation history may claim.
pub const DEFAULT_HISTORY_FRACTION: f32 = 0.5;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AssemblyError {
    #[error("{part} needs {needed} tokens but only {available} of the {budget}-token budget remain")]
    BudgetExceeded {
        part: &'static str,
        needed: usize,
        available: usize,
        budget: usize,
    },
}

/// A prompt ready to send, with the decisions that shaped it.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledPrompt {
    pub messages: Vec<ChatMessage>,
    /// Tokens used, never more than `token_budget`.
    pub token_count: usize,
    pub token_budget: usize,
    pub turns_included: usize,
    pub turns_available: usize,
    /// Passages in the prompt, in prompt order.
    pub chunks_included: Vec<ChunkId>,
    /// Retrieved passages left out for lack of room.
    pub chunks_dropped: Vec<ChunkId>,
}

impl AssembledPrompt {
    /// The replay record stored on the assistant turn.
    pub fn record(&self, provider: &str, model: &str) -> PromptRecord {
        PromptRecord {
            provider: provider.to_string(),
            model: model.to_string(),
            prompt_tokens: self.token_count,
            token_budget: self.token_budget,
            chunk_ids: self.chunks_included.iter().map(|id| id.to_string()).collect(),
            turns_included: self.turns_included,
            messages: self.messages.clone(),
        }
    }
}

/// Stateless; create one and reuse it.
#[derive(Clone)]
pub struct ContextAssembler {
    counter: Arc<dyn TokenCounter>,
    history_fraction: f32,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(Arc::new(HeuristicCounter))
    }
}

impl ContextAssembler {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            counter,
            history_fraction: DEFAULT_HISTORY_FRACTION,
        }
    }

    pub fn with_history_fraction(mut self, fraction: f32) -> Self {
        self.history_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// Assemble a prompt from `turns` (oldest first, the last being the
    /// message to answer), retrieved passages and the instruction template.
    pub fn assemble(
        &self,
        turns: &[ConversationTurn],
        retrieval: &RetrievalResult,
        template: &str,
        token_budget: usize,
    ) -> Result<AssembledPrompt, AssemblyError> {
        let template_tokens = self.counter.count(template);
        if template_tokens > token_budget {
            return Err(AssemblyError::BudgetExceeded {
                part: "Prompt template",
                needed: template_tokens,
                available: token_budget,
                budget: token_budget,
            });
        }
        let available = token_budget - template_tokens;

        // History, newest first.
        let history_share = (token_budget as f64 * self.history_fraction as f64) as usize;
        let mut history_used = 0usize;
        let mut included_turns: Vec<&ConversationTurn> = Vec::new();

        for (i, turn) in turns.iter().rev().enumerate() {
            let cost = self.counter.count(&turn.text);
            if history_used + cost > available || (i > 0 && history_used >= history_share) {
                break;
            }
            history_used += cost;
            included_turns.push(turn);
        }
        included_turns.reverse();

        // Passages fill what is left.
        let header_tokens = self.counter.count(PASSAGES_HEADER);
        let mut remaining = available - history_used;
        let mut passages = String::new();
        let mut chunks_included = Vec::new();
        let mut chunks_dropped = Vec::new();

        for scored in &retrieval.chunks {
            let entry = render_passage(&scored.chunk.source, &scored.chunk.text);
            let mut cost = self.counter.count(&entry);
            if chunks_included.is_empty() {
                cost += header_tokens;
            }
            if cost <= remaining {
                remaining -= cost;
                passages.push_str(&entry);
                chunks_included.push(scored.chunk.id.clone());
            } else {
                chunks_dropped.push(scored.chunk.id.clone());
            }
        }

        let system = if chunks_included.is_empty() {
            template.to_string()
        } else if template.is_empty() {
            format!("{}{passages}", PASSAGES_HEADER.trim_start())
        } else {
            format!("{template}{PASSAGES_HEADER}{passages}")
        };

        let mut messages = Vec::with_capacity(included_turns.len() + 1);
        if !system.trim().is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.extend(included_turns.iter().map(|t| t.to_message()));

        Ok(AssembledPrompt {
            messages,
            token_count: token_budget - remaining,
            token_budget,
            turns_included: included_turns.len(),
            turns_available: turns.len(),
            chunks_included,
            chunks_dropped,
        })
    }
}

fn render_passage(source: &str, text: &str) -> String {
    format!("[{source}]\n{text}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use writingway_core::message::Role;
    use writingway_index::{DocumentChunk, ScoredChunk};

    /// One token per whitespace-separated word.
    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    fn turns(sizes: &[usize]) -> Vec<ConversationTurn> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                ConversationTurn::new(i as u64 + 1, role, words(n))
            })
            .collect()
    }

    fn chunk(source: &str, text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Arc::new(DocumentChunk {
                id: ChunkId::derive(source, 0, text),
                source: source.into(),
                start: 0,
                end: text.chars().count(),
                text: text.into(),
                embedding: vec![],
                modified: Utc::now(),
            }),
            score,
        }
    }

    fn retrieval(chunks: Vec<ScoredChunk>) -> RetrievalResult {
        RetrievalResult {
            candidates: chunks.len(),
            chunks,
            generation: 1,
        }
    }

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(Arc::new(WordCounter))
    }

    #[test]
    fn template_two_turns_and_no_room_for_the_chunk() {
        // Budget 50: template 10, three 20-token turns, one 15-token passage.
        let passage = chunk("notes", &words(13), 0.9); // "[notes]" + 13 words + header
        let result = assembler()
            .assemble(&turns(&[20, 20, 20]), &retrieval(vec![passage.clone()]), &words(10), 50)
            .unwrap();

        assert_eq!(result.turns_included, 2);
        assert_eq!(result.turns_available, 3);
        assert!(result.chunks_included.is_empty());
        assert_eq!(result.chunks_dropped, vec![passage.chunk.id.clone()]);
        assert!(result.token_count <= 50);
        assert_eq!(result.messages.len(), 3);
        assert_eq!(result.messages[0].content, words(10));
        assert_eq!(result.messages[1].role, Role::Assistant);
        assert_eq!(result.messages[2].role, Role::User);
    }

    #[test]
    fn template_alone_over_budget_fails() {
        let err = assembler()
            .assemble(&[], &RetrievalResult::default(), &words(60), 50)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::BudgetExceeded { part: "Prompt template", needed: 60, .. }));
    }

    #[test]
    fn oversized_newest_turn_leaves_template_only() {
        let template = words(10);
        let result = assembler()
            .assemble(&turns(&[5, 45]), &RetrievalResult::default(), &template, 50)
            .unwrap();
        assert_eq!(result.turns_included, 0);
        assert_eq!(result.turns_available, 2);
        assert_eq!(result.token_count, 10);
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].role, Role::System);
        assert_eq!(result.messages[0].content, template);
    }

    #[test]
    fn newest_turn_may_exceed_the_history_share() {
        let result = assembler()
            .assemble(&turns(&[5, 35]), &RetrievalResult::default(), &words(10), 50)
            .unwrap();
        assert_eq!(result.turns_included, 1);
        assert_eq!(result.token_count, 45);
    }

    #[test]
    fn template_is_verbatim() {
        let template = "You are a writing partner.\nKeep the author's voice.";
        let result = ContextAssembler::default()
            .assemble(&turns(&[3]), &RetrievalResult::default(), template, 1000)
            .unwrap();
        assert_eq!(result.messages[0].role, Role::System);
        assert_eq!(result.messages[0].content, template);
    }

    #[test]
    fn passages_fill_in_score_order_and_skip_what_does_not_fit() {
        let big = chunk("a", &words(30), 0.9);
        let small = chunk("b", &words(5), 0.8);
        let result = assembler()
            .assemble(&turns(&[5]), &retrieval(vec![big.clone(), small.clone()]), &words(5), 40)
            .unwrap();

        assert_eq!(result.chunks_dropped, vec![big.chunk.id.clone()]);
        assert_eq!(result.chunks_included, vec![small.chunk.id.clone()]);
        let system = &result.messages[0].content;
        assert!(system.contains("## Relevant passages from the project"));
        assert!(system.contains("[b]"));
        assert!(!system.contains("[a]"));
        assert!(result.token_count <= 40);
    }

    #[test]
    fn header_only_charged_with_a_passage() {
        let result = assembler()
            .assemble(&turns(&[5]), &RetrievalResult::default(), &words(5), 40)
            .unwrap();
        assert_eq!(result.token_count, 10);
        assert_eq!(result.messages.len(), 2);
        assert!(!result.messages[0].content.contains("Relevant passages"));
    }

    #[test]
    fn budget_law_holds_across_sizes() {
        let chunks = retrieval(vec![
            chunk("a", &words(7), 0.9),
            chunk("b", &words(3), 0.7),
            chunk("c", &words(11), 0.5),
        ]);
        let history = turns(&[4, 9, 2, 6, 3]);
        for budget in 10..80 {
            if let Ok(prompt) = assembler().assemble(&history, &chunks, &words(4), budget) {
                assert!(prompt.token_count <= budget, "budget {budget}: {}", prompt.token_count);
                assert_eq!(
                    prompt.chunks_included.len() + prompt.chunks_dropped.len(),
                    3
                );
            }
        }
    }

    #[test]
    fn history_stays_chronological() {
        let history = turns(&[1, 2, 3, 4]);
        let result = assembler()
            .assemble(&history, &RetrievalResult::default(), "", 100)
            .unwrap();
        let texts: Vec<&str> = result.messages.iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (1..=4).map(words).collect();
        assert_eq!(texts, expected);
    }

    #[test]
    fn deterministic() {
        let chunks = retrieval(vec![chunk("a", &words(3), 0.9), chunk("b", &words(3), 0.8)]);
        let history = turns(&[4, 4, 4]);
        let a = assembler().assemble(&history, &chunks, "T", 30).unwrap();
        let b = assembler().assemble(&history, &chunks, "T", 30).unwrap();
        assert_eq!(a.messages, b.messages);
        assert_eq!(a.chunks_included, b.chunks_included);
    }

    #[test]
    fn record_lists_included_chunks() {
        let c = chunk("a", &words(3), 0.9);
        let prompt = assembler()
            .assemble(&turns(&[2]), &retrieval(vec![c.clone()]), "T", 100)
            .unwrap();
        let record = prompt.record("openrouter", "some-model");
        assert_eq!(record.chunk_ids, vec![c.chunk.id.to_string()]);
        assert_eq!(record.turns_included, 1);
        assert_eq!(record.prompt_tokens, prompt.token_count);
        assert_eq!(record.messages, prompt.messages);
    }
}
