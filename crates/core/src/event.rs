//! Diagnostics events — structured records of what the core decided.
//!
//! The core never decides how these are shown. Assembly, provider calls and
//! index updates publish a [`DiagnosticEvent`]; the host application
//! subscribes and logs or displays them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::provider::Usage;

/// All diagnostics events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    /// A prompt was assembled for a session.
    PromptAssembled {
        session_id: String,
        token_count: usize,
        token_budget: usize,
        turns_included: usize,
        turns_available: usize,
        chunks_included: Vec<String>,
        chunks_dropped: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// One adapter call finished (successfully or not).
    ProviderAttempt {
        provider: String,
        model: String,
        attempt: u32,
        /// "ok", "cancelled", or the error kind ("transient", "auth", …)
        outcome: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The aggregator reached a terminal outcome for a request.
    GenerationFinished {
        provider: String,
        model: String,
        attempts: u32,
        retries: u32,
        fallback_used: bool,
        /// "completed", "cancelled", or "failed"
        outcome: String,
        usage: Option<Usage>,
        timestamp: DateTime<Utc>,
    },

    /// A source unit was (re)indexed or removed.
    IndexUpdated {
        source_unit: String,
        chunks_added: usize,
        chunks_removed: usize,
        embeddings_computed: usize,
        generation: u64,
        timestamp: DateTime<Utc>,
    },

    /// A retrieval query ran.
    RetrievalPerformed {
        candidates: usize,
        returned: usize,
        generation: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for diagnostics events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DiagnosticEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DiagnosticEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DiagnosticEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
