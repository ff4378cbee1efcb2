//! The workshop facade — everything a host application calls.
//!
//! Owns the sessions, the shared document index, the aggregator and the
//! diagnostics bus. A message goes through retrieval, assembly and the
//! aggregator; its fragments reach the caller through a [`StreamHandle`]
//! while the session records the exchange once it completes.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use writingway_config::{AppConfig, ConfigError};
use writingway_core::embedding::Embedder;
use writingway_core::event::{DiagnosticEvent, EventBus};
use writingway_core::message::{ConversationTurn, SessionId};
use writingway_core::provider::{GenerationParams, GenerationRequest, ProviderConfig};
use writingway_index::{ChunkId, ChunkerConfig, DocumentIndexer, HashingEmbedder, RetrievalEngine};
use writingway_providers::{Aggregator, ApiEmbedder, GenerationEvent, GenerationHandle};

use crate::assembler::{AssembledPrompt, ContextAssembler};
use crate::error::WorkshopError;
use crate::session::{ConversationSession, SessionSettings, SessionState};
use crate::stream_event::StreamEvent;
use crate::token::TokenCounter;

/// Settings for a new session. Unset fields fall back to configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub token_budget: Option<usize>,
    pub top_k: Option<usize>,
    pub similarity_floor: Option<f32>,
    pub system_prompt: Option<String>,
}

/// The caller's end of one request.
#[derive(Debug)]
pub struct StreamHandle {
    pub session: SessionId,
    /// Request number within the session.
    pub request: u64,
    pub events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Stop this request. Same effect as `Workshop::cancel` while it is the
    /// session's in-flight request.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain events until the terminal one, returning it (or `None` if the
    /// channel closed first).
    pub async fn finish(mut self) -> Option<StreamEvent> {
        while let Some(event) = self.events.recv().await {
            if event.is_terminal() {
                return Some(event);
            }
        }
        None
    }
}

type SessionRef = Arc<Mutex<ConversationSession>>;

pub struct Workshop {
    config: Arc<AppConfig>,
    aggregator: Arc<Aggregator>,
    indexer: Arc<DocumentIndexer>,
    retrieval: RetrievalEngine,
    assembler: ContextAssembler,
    sessions: RwLock<HashMap<SessionId, SessionRef>>,
    events: Arc<EventBus>,
}

impl Workshop {
    /// Assemble a workshop from parts. Diagnostics go to the aggregator's bus.
    pub fn new(config: AppConfig, aggregator: Arc<Aggregator>, embedder: Arc<dyn Embedder>) -> Self {
        let events = Arc::clone(aggregator.events());
        let chunker = ChunkerConfig {
            target_chars: config.indexing.chunk_size,
            overlap: config.indexing.chunk_overlap,
        };
        let indexer = Arc::new(DocumentIndexer::new(embedder, chunker).with_events(Arc::clone(&events)));
        let retrieval = RetrievalEngine::new(Arc::clone(&indexer))
            .with_redundancy_threshold(config.retrieval.redundancy_threshold)
            .with_events(Arc::clone(&events));
        let assembler = ContextAssembler::default().with_history_fraction(config.assembly.history_fraction);

        Self {
            config: Arc::new(config),
            aggregator,
            indexer,
            retrieval,
            assembler,
            sessions: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Build everything from configuration: vendor adapters, retry and
    /// fallback policy, and the configured embedder.
    pub fn from_config(config: AppConfig) -> Result<Self, WorkshopError> {
        config.validate()?;
        let events = Arc::new(EventBus::default());
        let aggregator = Arc::new(Aggregator::from_config(&config, events)?);
        let embedder = build_embedder(&config)?;
        Ok(Self::new(config, aggregator, embedder))
    }

    /// Replace the token counter used for assembly.
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.assembler =
            ContextAssembler::new(counter).with_history_fraction(self.config.assembly.history_fraction);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn indexer(&self) -> &Arc<DocumentIndexer> {
        &self.indexer
    }

    pub fn retrieval(&self) -> &RetrievalEngine {
        &self.retrieval
    }

    // ── Ingestion ─────────────────────────────────────────────────────────

    /// A source unit's text changed (or appeared).
    pub async fn notify_text_changed(
        &self,
        source_unit: &str,
        text: &str,
    ) -> Result<BTreeSet<ChunkId>, WorkshopError> {
        Ok(self.indexer.upsert(source_unit, text).await?)
    }

    /// A source unit was deleted.
    pub async fn notify_text_removed(&self, source_unit: &str) -> usize {
        self.indexer.remove(source_unit).await
    }

    // ── Sessions ──────────────────────────────────────────────────────────

    pub async fn start_session(&self, options: SessionOptions) -> Result<SessionId, WorkshopError> {
        let provider_id = options
            .provider
            .as_deref()
            .unwrap_or(&self.config.default_provider);
        let provider = self.config.resolve_provider(provider_id, options.model.as_deref())?;

        let settings = SessionSettings {
            provider: Arc::new(provider),
            params: GenerationParams {
                temperature: options.temperature,
                max_tokens: options.max_tokens,
                top_p: None,
            },
            token_budget: options.token_budget.or(self.config.assembly.token_budget),
            top_k: options.top_k.unwrap_or(self.config.retrieval.top_k),
            similarity_floor: options
                .similarity_floor
                .unwrap_or(self.config.retrieval.similarity_floor),
            system_prompt: options
                .system_prompt
                .unwrap_or_else(|| self.config.workshop.system_prompt.clone()),
            summary: None,
        };

        let id = SessionId::new();
        info!(
            session = %id,
            provider = %settings.provider.id,
            model = %settings.provider.model,
            "Session started"
        );
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(ConversationSession::new(id.clone(), settings))));
        Ok(id)
    }

    /// Cancel any in-flight request and forget the session.
    pub async fn close_session(&self, id: &SessionId) -> Result<(), WorkshopError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| WorkshopError::UnknownSession(id.clone()))?;
        session.lock().await.cancel();
        info!(session = %id, "Session closed");
        Ok(())
    }

    pub async fn history(&self, id: &SessionId) -> Result<Vec<ConversationTurn>, WorkshopError> {
        Ok(self.session(id).await?.lock().await.turns().to_vec())
    }

    pub async fn state(&self, id: &SessionId) -> Result<SessionState, WorkshopError> {
        Ok(self.session(id).await?.lock().await.state())
    }

    /// Point the session at another provider or model from the next request on.
    pub async fn set_provider(
        &self,
        id: &SessionId,
        provider: &str,
        model: Option<&str>,
    ) -> Result<Arc<ProviderConfig>, WorkshopError> {
        let session = self.session(id).await?;
        let resolved = Arc::new(self.config.resolve_provider(provider, model)?);
        session.lock().await.set_provider(Arc::clone(&resolved));
        info!(session = %id, provider, model = %resolved.model, "Session provider changed");
        Ok(resolved)
    }

    /// Set or clear the summary folded into retrieval queries.
    pub async fn set_summary(&self, id: &SessionId, summary: Option<String>) -> Result<(), WorkshopError> {
        self.session(id).await?.lock().await.set_summary(summary);
        Ok(())
    }

    /// Cancel the session's in-flight request. Returns false when idle.
    pub async fn cancel(&self, id: &SessionId) -> Result<bool, WorkshopError> {
        Ok(self.session(id).await?.lock().await.cancel())
    }

    /// Send the author's message and stream the reply.
    ///
    /// Retrieval and assembly run before this returns, so their errors are
    /// reported here and leave the session `Failed`. Generation errors
    /// arrive as the stream's terminal `Error` event.
    pub async fn send_message(&self, id: &SessionId, text: &str) -> Result<StreamHandle, WorkshopError> {
        let session = self.session(id).await?;

        let (request, cancel, turns, settings) = {
            let mut guard = session.lock().await;
            let (request, cancel) = guard.begin(text)?;
            (request, cancel, guard.pending_turns(text), guard.settings().clone())
        };

        let prompt = match self.prepare(id, text, &turns, &settings).await {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(session = %id, request, error = %e, "Could not prepare prompt");
                session.lock().await.fail(request, e.to_string());
                return Err(e);
            }
        };

        let generation = GenerationRequest::new(prompt.messages.clone())
            .with_params(settings.params.clone())
            .with_cancel(cancel.clone());
        let handle = self
            .aggregator
            .submit(generation, Arc::clone(&settings.provider));

        let (tx, rx) = mpsc::channel(self.config.workshop.stream_buffer.max(1));
        tokio::spawn(forward(
            handle,
            tx,
            Arc::clone(&session),
            request,
            text.to_string(),
            prompt,
        ));

        Ok(StreamHandle {
            session: id.clone(),
            request,
            events: rx,
            cancel,
        })
    }

    async fn prepare(
        &self,
        id: &SessionId,
        text: &str,
        turns: &[ConversationTurn],
        settings: &SessionSettings,
    ) -> Result<AssembledPrompt, WorkshopError> {
        let retrieval = self
            .retrieval
            .query_conversation(
                text,
                settings.summary.as_deref(),
                settings.top_k,
                settings.similarity_floor,
            )
            .await?;

        let budget = settings.prompt_budget();
        let prompt = self
            .assembler
            .assemble(turns, &retrieval, &settings.system_prompt, budget)?;

        debug!(
            session = %id,
            tokens = prompt.token_count,
            budget,
            turns = prompt.turns_included,
            chunks = prompt.chunks_included.len(),
            dropped = prompt.chunks_dropped.len(),
            "Prompt assembled"
        );
        self.events.publish(DiagnosticEvent::PromptAssembled {
            session_id: id.to_string(),
            token_count: prompt.token_count,
            token_budget: prompt.token_budget,
            turns_included: prompt.turns_included,
            turns_available: prompt.turns_available,
            chunks_included: prompt.chunks_included.iter().map(ToString::to_string).collect(),
            chunks_dropped: prompt.chunks_dropped.iter().map(ToString::to_string).collect(),
            timestamp: Utc::now(),
        });
        Ok(prompt)
    }

    async fn session(&self, id: &SessionId) -> Result<SessionRef, WorkshopError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| WorkshopError::UnknownSession(id.clone()))
    }
}

/// Relay generation events to the caller and settle the session.
///
/// The session is updated before the terminal event is sent, so a caller
/// that sees `Done` also sees the new turns in the history. A caller that
/// dropped its receiver does not stop the generation.
async fn forward(
    mut handle: GenerationHandle,
    tx: mpsc::Sender<StreamEvent>,
    session: SessionRef,
    request: u64,
    user_text: String,
    prompt: AssembledPrompt,
) {
    while let Some(event) = handle.events.recv().await {
        let out = match event {
            GenerationEvent::Fragment(text) => StreamEvent::Fragment { text },
            GenerationEvent::Retrying { attempt, provider, .. } => {
                StreamEvent::Retrying { attempt, provider }
            }
            GenerationEvent::Completed(completion) => {
                let record = prompt.record(&completion.provider, &completion.model);
                let recorded = session
                    .lock()
                    .await
                    .complete(request, &user_text, &completion.text, record);
                if !recorded {
                    let _ = tx.send(StreamEvent::Cancelled).await;
                    return;
                }
                StreamEvent::Done {
                    text: completion.text,
                    provider: completion.provider,
                    model: completion.model,
                    usage: completion.usage,
                    prompt_tokens: prompt.token_count,
                    chunks_used: prompt.chunks_included.len(),
                }
            }
            GenerationEvent::Cancelled => {
                session.lock().await.cancelled(request);
                StreamEvent::Cancelled
            }
            GenerationEvent::Failed(e) => {
                let message = e.to_string();
                if session.lock().await.fail(request, message.clone()) {
                    StreamEvent::Error { message }
                } else {
                    StreamEvent::Cancelled
                }
            }
        };
        let terminal = out.is_terminal();
        let _ = tx.send(out).await;
        if terminal {
            return;
        }
    }

    // The generation task ended without a terminal event.
    let message = match handle.outcome().await {
        Err(e) => e.to_string(),
        Ok(_) => "generation ended without a result".to_string(),
    };
    warn!(request, error = %message, "Generation stream closed early");
    let event = if session.lock().await.fail(request, message.clone()) {
        StreamEvent::Error { message }
    } else {
        StreamEvent::Cancelled
    };
    let _ = tx.send(event).await;
}

/// The embedder named by `[indexing] embedder`.
pub fn build_embedder(config: &AppConfig) -> Result<Arc<dyn Embedder>, ConfigError> {
    match config.indexing.embedder.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.indexing.hashing_dimensions))),
        "api" => Ok(Arc::new(ApiEmbedder::from_config(config)?)),
        other => Err(ConfigError::ValidationError(format!(
            "indexing.embedder must be \"hashing\" or \"api\", got \"{other}\""
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use writingway_providers::RetryPolicy;

    fn workshop() -> Workshop {
        let aggregator = Arc::new(Aggregator::new(
            RetryPolicy::immediate(1),
            Arc::new(EventBus::default()),
        ));
        Workshop::new(AppConfig::default(), aggregator, Arc::new(HashingEmbedder::default()))
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let ws = workshop();
        let id = SessionId::from("missing");
        assert!(matches!(
            ws.state(&id).await,
            Err(WorkshopError::UnknownSession(_))
        ));
        assert!(matches!(
            ws.send_message(&id, "hi").await,
            Err(WorkshopError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn start_session_rejects_unknown_provider() {
        let ws = workshop();
        let err = ws
            .start_session(SessionOptions {
                provider: Some("nowhere".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkshopError::Config(ConfigError::UnknownProvider(_))));
    }

    #[tokio::test]
    async fn set_provider_changes_model() {
        let ws = workshop();
        let id = ws
            .start_session(SessionOptions {
                provider: Some("openai".into()),
                model: Some("gpt-4o".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let config = ws.set_provider(&id, "anthropic", Some("claude-sonnet-4")).await.unwrap();
        assert_eq!(config.id, "anthropic");
        assert_eq!(config.model, "claude-sonnet-4");
    }

    #[tokio::test]
    async fn close_session_forgets_it() {
        let ws = workshop();
        let id = ws
            .start_session(SessionOptions {
                provider: Some("openai".into()),
                model: Some("gpt-4o".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        ws.close_session(&id).await.unwrap();
        assert!(ws.history(&id).await.is_err());
        assert!(ws.close_session(&id).await.is_err());
    }

    #[tokio::test]
    async fn ingestion_routes_to_the_indexer() {
        let ws = workshop();
        let changed = ws
            .notify_text_changed("act1/scene1", "Alice meets Bob in the forest.")
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(ws.indexer().snapshot().len(), 1);
        assert_eq!(ws.notify_text_removed("act1/scene1").await, 1);
        assert!(ws.indexer().snapshot().is_empty());
    }

    #[test]
    fn embedder_choice_follows_config() {
        let mut config = AppConfig::default();
        assert_eq!(build_embedder(&config).unwrap().model(), "hashing-v1");
        config.indexing.embedder = "magic".into();
        assert!(build_embedder(&config).is_err());
    }
}
