//! One conversation with the assistant.
//!
//! State machine:
//!
//! ```text
//! Idle ──send──▶ AwaitingResponse ──complete──▶ Idle
//!   ▲                 │   │
//!   └────cancel───────┘   └──fail──▶ Failed ──send──▶ AwaitingResponse
//! ```
//!
//! Every request gets a number. A completion or failure that arrives for a
//! request other than the one in flight (because it was cancelled) is
//! ignored, so a cancelled generation never touches the history.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use writingway_core::message::{ConversationTurn, PromptRecord, Role, SessionId};
use writingway_core::provider::{GenerationParams, ProviderConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingResponse,
    /// The last request failed; the session accepts a new message.
    Failed,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("Session {0} is still waiting for a response")]
    SessionBusy(SessionId),

    #[error("Message text is empty")]
    EmptyMessage,
}

/// Per-session generation and retrieval settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub provider: Arc<ProviderConfig>,
    /// Overrides on top of the provider's defaults.
    pub params: GenerationParams,
    /// Hard prompt budget; the provider's context window minus the output
    /// reservation when unset.
    pub token_budget: Option<usize>,
    pub top_k: usize,
    pub similarity_floor: f32,
    pub system_prompt: String,
    /// Folded into the retrieval query when set.
    pub summary: Option<String>,
}

impl SessionSettings {
    /// Tokens the assembled prompt may use.
    pub fn prompt_budget(&self) -> usize {
        let max_output = self
            .params
            .max_tokens
            .or(self.provider.defaults.max_tokens)
            .unwrap_or(1024);
        let provider_budget = self.provider.prompt_budget(max_output);
        match self.token_budget {
            Some(budget) => budget.min(provider_budget),
            None => provider_budget,
        }
    }
}

struct InFlight {
    request: u64,
    cancel: CancellationToken,
}

pub struct ConversationSession {
    id: SessionId,
    settings: SessionSettings,
    turns: Vec<ConversationTurn>,
    state: SessionState,
    requests: u64,
    in_flight: Option<InFlight>,
    last_error: Option<String>,
}

impl ConversationSession {
    pub fn new(id: SessionId, settings: SessionSettings) -> Self {
        Self {
            id,
            settings,
            turns: Vec::new(),
            state: SessionState::Idle,
            requests: 0,
            in_flight: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Takes effect from the next request; an in-flight one keeps its config.
    pub fn set_provider(&mut self, provider: Arc<ProviderConfig>) {
        self.settings.provider = provider;
    }

    pub fn set_summary(&mut self, summary: Option<String>) {
        self.settings.summary = summary;
    }

    /// The history plus a provisional turn for `text`, as the assembler
    /// sees it. The provisional turn is not recorded.
    pub fn pending_turns(&self, text: &str) -> Vec<ConversationTurn> {
        let mut turns = self.turns.clone();
        turns.push(ConversationTurn::new(self.next_sequence(), Role::User, text));
        turns
    }

    /// Start a request. Returns its number and cancellation token.
    pub fn begin(&mut self, text: &str) -> Result<(u64, CancellationToken), SessionError> {
        if self.state == SessionState::AwaitingResponse {
            return Err(SessionError::SessionBusy(self.id.clone()));
        }
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        self.requests += 1;
        let cancel = CancellationToken::new();
        self.in_flight = Some(InFlight {
            request: self.requests,
            cancel: cancel.clone(),
        });
        self.state = SessionState::AwaitingResponse;
        self.last_error = None;
        debug!(session = %self.id, request = self.requests, "Request started");
        Ok((self.requests, cancel))
    }

    /// Record a finished exchange. Both turns are appended together, or
    /// nothing happens if `request` is no longer in flight.
    pub fn complete(&mut self, request: u64, user_text: &str, reply: &str, prompt: PromptRecord) -> bool {
        if !self.is_current(request) {
            debug!(session = %self.id, request, "Ignoring completion of stale request");
            return false;
        }
        let user = ConversationTurn::new(self.next_sequence(), Role::User, user_text);
        let mut assistant = ConversationTurn::new(self.next_sequence() + 1, Role::Assistant, reply);
        assistant.prompt = Some(prompt);
        self.turns.push(user);
        self.turns.push(assistant);
        self.in_flight = None;
        self.state = SessionState::Idle;
        true
    }

    /// Mark the in-flight request failed. Stale requests are ignored.
    pub fn fail(&mut self, request: u64, error: impl Into<String>) -> bool {
        if !self.is_current(request) {
            debug!(session = %self.id, request, "Ignoring failure of stale request");
            return false;
        }
        self.in_flight = None;
        self.state = SessionState::Failed;
        self.last_error = Some(error.into());
        true
    }

    /// Signal the in-flight request to stop and return to `Idle`.
    /// Returns false when nothing was in flight.
    pub fn cancel(&mut self) -> bool {
        match self.in_flight.take() {
            Some(in_flight) => {
                in_flight.cancel.cancel();
                self.state = SessionState::Idle;
                debug!(session = %self.id, request = in_flight.request, "Request cancelled");
                true
            }
            None => false,
        }
    }

    /// A request that ended `Cancelled` on its own (token signalled by
    /// someone else) returns the session to `Idle`.
    pub fn cancelled(&mut self, request: u64) -> bool {
        if !self.is_current(request) {
            return false;
        }
        self.in_flight = None;
        self.state = SessionState::Idle;
        true
    }

    fn is_current(&self, request: u64) -> bool {
        self.state == SessionState::AwaitingResponse
            && self.in_flight.as_ref().is_some_and(|f| f.request == request)
    }

    fn next_sequence(&self) -> u64 {
        self.turns.last().map_or(1, |t| t.sequence + 1)
    }
}
