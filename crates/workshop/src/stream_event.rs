//! What a caller of `send_message` receives.
//!
//! Wraps the aggregator's generation events into session-level events a
//! host can render directly or forward as JSON.

use serde::{Deserialize, Serialize};
use writingway_core::provider::Usage;

/// Events of one request, in order: any number of `Fragment` and
/// `Retrying`, then exactly one of `Done`, `Cancelled` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial reply text.
    Fragment { text: String },

    /// The text streamed so far is void; a new attempt starts.
    Retrying { attempt: u32, provider: String },

    /// The reply is complete and recorded in the session history.
    Done {
        text: String,
        provider: String,
        model: String,
        usage: Option<Usage>,
        prompt_tokens: usize,
        chunks_used: usize,
    },

    /// The request was cancelled; history is unchanged.
    Cancelled,

    Error { message: String },
}

impl StreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Fragment { .. } => "fragment",
            Self::Retrying { .. } => "retrying",
            Self::Done { .. } => "done",
            Self::Cancelled => "cancelled",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Cancelled | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_serializes_with_type_tag() {
        let json = serde_json::to_string(&StreamEvent::Fragment {
            text: "The gate".into(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"fragment""#));
        assert!(json.contains(r#""text":"The gate""#));
    }

    #[test]
    fn done_round_trips() {
        let event = StreamEvent::Done {
            text: "Bob waits.".into(),
            provider: "anthropic".into(),
            model: "claude-sonnet-4".into(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 3,
                total_tokens: 13,
            }),
            prompt_tokens: 12,
            chunks_used: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: StreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn terminal_events() {
        assert!(StreamEvent::Cancelled.is_terminal());
        assert!(StreamEvent::Error { message: "x".into() }.is_terminal());
        assert!(!StreamEvent::Fragment { text: "x".into() }.is_terminal());
        assert_eq!(
            StreamEvent::Retrying {
                attempt: 2,
                provider: "openai".into()
            }
            .event_type(),
            "retrying"
        );
    }
}
