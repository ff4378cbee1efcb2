//! Message and conversation turn domain types.
//!
//! A [`ChatMessage`] is what goes over the wire to a provider. A
//! [`ConversationTurn`] is what a workshop session keeps in its history:
//! the same text plus ordering and timing. Assistant turns also carry a
//! record of the exact prompt that produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a workshop session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The author
    User,
    /// The AI assistant
    Assistant,
    /// System instructions (prompt template, retrieved context)
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A single message in a provider request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// What was actually sent to produce an assistant turn.
///
/// Stored alongside the turn so a conversation can be replayed exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRecord {
    /// Provider catalogue id that answered (may be a fallback).
    pub provider: String,
    /// Model that answered.
    pub model: String,
    /// Estimated prompt tokens.
    pub prompt_tokens: usize,
    /// Budget the prompt was assembled against.
    pub token_budget: usize,
    /// Chunks that made it into the prompt, in prompt order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_ids: Vec<String>,
    /// How many history turns were included.
    pub turns_included: usize,
    /// The full message list sent to the provider.
    pub messages: Vec<ChatMessage>,
}

/// A single turn in a session's history. Never edited once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Strictly increasing within a session, starting at 1.
    pub sequence: u64,

    pub role: Role,

    pub text: String,

    pub timestamp: DateTime<Utc>,

    /// Prompt metadata; present on assistant turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptRecord>,
}

impl ConversationTurn {
    pub fn new(sequence: u64, role: Role, text: impl Into<String>) -> Self {
        Self {
            sequence,
            role,
            text: text.into(),
            timestamp: Utc::now(),
            prompt: None,
        }
    }

    /// The wire form of this turn.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.text.clone(),
        }
    }
}
