//! Aggregator — one generation call over every configured vendor.
//!
//! Picks the adapter for a [`ProviderConfig`]'s vendor, retries transient
//! failures with exponential backoff, walks the fallback chain once the
//! primary is exhausted and honours cancellation at every await point.
//!
//! Two entry points share one pipeline:
//! - [`Aggregator::submit`] spawns the work and streams [`GenerationEvent`]s
//! - [`Aggregator::generate`] awaits a whole [`Completion`]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use writingway_config::{AppConfig, ConfigError};
use writingway_core::error::{GenerationError, ProviderError};
use writingway_core::event::{DiagnosticEvent, EventBus};
use writingway_core::provider::{
    Completion, GenerationRequest, ProviderAdapter, ProviderConfig, Usage, Vendor,
};

use crate::anthropic::AnthropicAdapter;
use crate::gemini::GeminiAdapter;
use crate::openai_compat::OpenAiCompatAdapter;
use crate::retry::RetryPolicy;

/// What a streamed generation tells its consumer, in order.
///
/// Any number of `Fragment`s and `Retrying` notices, then exactly one of
/// `Completed`, `Cancelled` or `Failed`.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    /// Incremental text.
    Fragment(String),
    /// The attempt that produced the fragments so far failed and another
    /// attempt starts after `delay`. Text received so far must be discarded.
    Retrying {
        attempt: u32,
        provider: String,
        delay: Duration,
    },
    Completed(Completion),
    Cancelled,
    Failed(GenerationError),
}

impl GenerationEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Cancelled | Self::Failed(_))
    }
}

/// Terminal result of a generation that did not fail.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Completed(Completion),
    Cancelled,
}

impl GenerationOutcome {
    pub fn completion(self) -> Option<Completion> {
        match self {
            Self::Completed(c) => Some(c),
            Self::Cancelled => None,
        }
    }
}

/// A running streamed generation.
pub struct GenerationHandle {
    /// Fragments, retry notices and the terminal event.
    pub events: mpsc::Receiver<GenerationEvent>,
    cancel: CancellationToken,
    task: JoinHandle<Result<GenerationOutcome, GenerationError>>,
}

impl GenerationHandle {
    /// Ask the generation to stop. The terminal event will be `Cancelled`
    /// unless the generation already finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the terminal result, discarding any undelivered events.
    pub async fn outcome(self) -> Result<GenerationOutcome, GenerationError> {
        drop(self.events);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(GenerationError::Aborted(e.to_string())),
        }
    }
}

/// Result of a single adapter call.
enum Attempt {
    Completed(Completion),
    Cancelled,
    Failed(ProviderError),
}

/// Routes generation requests to vendor adapters with retry and failover.
pub struct Aggregator {
    adapters: HashMap<Vendor, Arc<dyn ProviderAdapter>>,
    policy: RetryPolicy,
    fallbacks: Vec<Arc<ProviderConfig>>,
    events: Arc<EventBus>,
    buffer: usize,
}

impl Aggregator {
    /// An aggregator with no adapters registered.
    pub fn new(policy: RetryPolicy, events: Arc<EventBus>) -> Self {
        Self {
            adapters: HashMap::new(),
            policy,
            fallbacks: Vec::new(),
            events,
            buffer: 64,
        }
    }

    /// An aggregator with the Anthropic, OpenAI-compatible and Gemini adapters.
    pub fn with_default_adapters(policy: RetryPolicy, events: Arc<EventBus>) -> Self {
        let mut aggregator = Self::new(policy, events);
        aggregator.register(Arc::new(AnthropicAdapter::new()));
        aggregator.register(Arc::new(OpenAiCompatAdapter::new()));
        aggregator.register(Arc::new(GeminiAdapter::new()));
        aggregator
    }

    /// Build from configuration: default adapters, retry policy and the
    /// resolved fallback chain.
    pub fn from_config(config: &AppConfig, events: Arc<EventBus>) -> Result<Self, ConfigError> {
        let fallbacks = config
            .resolve_fallbacks()?
            .into_iter()
            .map(Arc::new)
            .collect();
        Ok(
            Self::with_default_adapters(RetryPolicy::from(&config.retry), events)
                .with_fallbacks(fallbacks)
                .with_buffer(config.workshop.stream_buffer),
        )
    }

    /// Register (or replace) the adapter for its vendor.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.vendor(), adapter);
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<Arc<ProviderConfig>>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Capacity of each generation's event channel.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Start a streamed generation on a background task.
    pub fn submit(
        self: &Arc<Self>,
        request: GenerationRequest,
        config: Arc<ProviderConfig>,
    ) -> GenerationHandle {
        let (tx, rx) = mpsc::channel(self.buffer);
        let cancel = request.cancel.clone();
        let this = Arc::clone(self);

        let task = tokio::spawn(async move {
            let result = this.run(&request, config, Some(&tx)).await;
            let terminal = match &result {
                Ok(GenerationOutcome::Completed(c)) => GenerationEvent::Completed(c.clone()),
                Ok(GenerationOutcome::Cancelled) => GenerationEvent::Cancelled,
                Err(e) => GenerationEvent::Failed(e.clone()),
            };
            let _ = tx.send(terminal).await;
            result
        });

        GenerationHandle {
            events: rx,
            cancel,
            task,
        }
    }

    /// Run a generation to completion without streaming.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        config: Arc<ProviderConfig>,
    ) -> Result<GenerationOutcome, GenerationError> {
        self.run(&request, config, None).await
    }

    /// The retry / fallback loop. With a `sink` the adapters stream and
    /// fragments are forwarded; without one they answer whole.
    async fn run(
        &self,
        request: &GenerationRequest,
        primary: Arc<ProviderConfig>,
        sink: Option<&mpsc::Sender<GenerationEvent>>,
    ) -> Result<GenerationOutcome, GenerationError> {
        let cancel = &request.cancel;

        let mut chain: Vec<(Arc<ProviderConfig>, u32)> = vec![(Arc::clone(&primary), self.policy.max_attempts)];
        chain.extend(
            self.fallbacks
                .iter()
                .filter(|f| f.id != primary.id || f.model != primary.model)
                .map(|f| (Arc::clone(f), 1)),
        );

        let mut total_attempts = 0u32;
        let mut forwarded = false;
        let mut last_error: Option<ProviderError> = None;

        for (position, (config, budget)) in chain.iter().enumerate() {
            let Some(adapter) = self.adapters.get(&config.vendor) else {
                let err = GenerationError::Config(format!(
                    "no adapter registered for vendor '{}' (provider '{}')",
                    config.vendor, config.id
                ));
                if position == 0 {
                    self.finished(config, total_attempts, position > 0, "failed", None);
                    return Err(err);
                }
                warn!(provider = %config.id, error = %err, "Skipping fallback provider");
                continue;
            };

            if position > 0 {
                info!(
                    provider = %config.id,
                    model = %config.model,
                    "Primary provider exhausted, trying fallback"
                );
            }

            for attempt in 1..=*budget {
                if cancel.is_cancelled() {
                    self.finished(config, total_attempts, position > 0, "cancelled", None);
                    return Ok(GenerationOutcome::Cancelled);
                }

                total_attempts += 1;
                let started = Instant::now();
                let result = match sink {
                    Some(tx) => self.stream_attempt(adapter.as_ref(), request, config, tx, &mut forwarded).await,
                    None => Self::blocking_attempt(adapter.as_ref(), request, config).await,
                };
                let elapsed = started.elapsed();

                match result {
                    Attempt::Completed(completion) => {
                        self.attempt_event(config, total_attempts, "ok", elapsed);
                        self.finished(
                            config,
                            total_attempts,
                            position > 0,
                            "completed",
                            completion.usage,
                        );
                        debug!(
                            provider = %config.id,
                            attempts = total_attempts,
                            chars = completion.text.len(),
                            "Generation completed"
                        );
                        return Ok(GenerationOutcome::Completed(completion));
                    }
                    Attempt::Cancelled => {
                        self.attempt_event(config, total_attempts, "cancelled", elapsed);
                        self.finished(config, total_attempts, position > 0, "cancelled", None);
                        return Ok(GenerationOutcome::Cancelled);
                    }
                    Attempt::Failed(err) => {
                        self.attempt_event(config, total_attempts, err.kind(), elapsed);

                        if !err.is_retryable() {
                            warn!(provider = %config.id, error = %err, "Generation failed, not retryable");
                            self.finished(config, total_attempts, position > 0, "failed", None);
                            return Err(GenerationError::from_provider(err, total_attempts));
                        }

                        warn!(
                            provider = %config.id,
                            attempt,
                            budget = *budget,
                            error = %err,
                            "Retryable provider failure"
                        );

                        let has_next = attempt < *budget || position + 1 < chain.len();
                        let delay = if attempt < *budget {
                            self.policy.delay(attempt, err.retry_after())
                        } else {
                            Duration::ZERO
                        };
                        last_error = Some(err);

                        if !has_next {
                            break;
                        }

                        if forwarded {
                            if let Some(tx) = sink {
                                let notice = GenerationEvent::Retrying {
                                    attempt: total_attempts + 1,
                                    provider: config.id.clone(),
                                    delay,
                                };
                                if !send_or_cancel(tx, notice, cancel).await {
                                    self.finished(config, total_attempts, position > 0, "cancelled", None);
                                    return Ok(GenerationOutcome::Cancelled);
                                }
                            }
                            forwarded = false;
                        }

                        if !delay.is_zero() {
                            debug!(provider = %config.id, delay_ms = delay.as_millis() as u64, "Backing off");
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {
                                    self.finished(config, total_attempts, position > 0, "cancelled", None);
                                    return Ok(GenerationOutcome::Cancelled);
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }

        let last = last_error.unwrap_or_else(|| ProviderError::Transient {
            provider: primary.id.clone(),
            message: "no provider attempt was made".into(),
        });
        let fallback_used = chain.len() > 1;
        self.finished(&primary, total_attempts, fallback_used, "failed", None);
        Err(GenerationError::Failed {
            attempts: total_attempts,
            last,
        })
    }

    async fn blocking_attempt(
        adapter: &dyn ProviderAdapter,
        request: &GenerationRequest,
        config: &ProviderConfig,
    ) -> Attempt {
        tokio::select! {
            biased;
            _ = request.cancel.cancelled() => Attempt::Cancelled,
            result = adapter.generate(request, config) => match result {
                Ok(completion) => Attempt::Completed(completion),
                Err(e) => Attempt::Failed(e),
            },
        }
    }

    async fn stream_attempt(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &GenerationRequest,
        config: &ProviderConfig,
        tx: &mpsc::Sender<GenerationEvent>,
        forwarded: &mut bool,
    ) -> Attempt {
        let cancel = &request.cancel;

        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Attempt::Cancelled,
            result = adapter.generate_streaming(request, config) => match result {
                Ok(rx) => rx,
                Err(e) => return Attempt::Failed(e),
            },
        };

        let mut text = String::new();
        let mut usage: Option<Usage> = None;

        loop {
            let item = tokio::select! {
                biased;
                // Dropping `rx` on return tells the adapter task to stop.
                _ = cancel.cancelled() => return Attempt::Cancelled,
                item = rx.recv() => item,
            };

            match item {
                Some(Ok(chunk)) => {
                    if chunk.usage.is_some() {
                        usage = chunk.usage;
                    }
                    if let Some(fragment) = chunk.content.filter(|c| !c.is_empty()) {
                        text.push_str(&fragment);
                        *forwarded = true;
                        if !send_or_cancel(tx, GenerationEvent::Fragment(fragment), cancel).await {
                            return Attempt::Cancelled;
                        }
                    }
                    if chunk.done {
                        return Attempt::Completed(Completion {
                            text,
                            usage,
                            model: config.model.clone(),
                            provider: config.id.clone(),
                        });
                    }
                }
                Some(Err(e)) => return Attempt::Failed(e),
                None => {
                    return Attempt::Failed(ProviderError::Transient {
                        provider: config.id.clone(),
                        message: "stream closed before completion".into(),
                    });
                }
            }
        }
    }

    fn attempt_event(&self, config: &ProviderConfig, attempt: u32, outcome: &str, elapsed: Duration) {
        self.events.publish(DiagnosticEvent::ProviderAttempt {
            provider: config.id.clone(),
            model: config.model.clone(),
            attempt,
            outcome: outcome.to_string(),
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });
    }

    fn finished(
        &self,
        config: &ProviderConfig,
        attempts: u32,
        fallback_used: bool,
        outcome: &str,
        usage: Option<Usage>,
    ) {
        self.events.publish(DiagnosticEvent::GenerationFinished {
            provider: config.id.clone(),
            model: config.model.clone(),
            attempts,
            retries: attempts.saturating_sub(1),
            fallback_used,
            outcome: outcome.to_string(),
            usage,
            timestamp: Utc::now(),
        });
    }
}

/// Deliver `event` unless the request is cancelled first.
///
/// A consumer that dropped its receiver is not an error: the generation
/// still runs to its terminal outcome. Returns `false` only on cancellation.
async fn send_or_cancel(
    tx: &mpsc::Sender<GenerationEvent>,
    event: GenerationEvent,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tx.send(event) => true,
    }
}
