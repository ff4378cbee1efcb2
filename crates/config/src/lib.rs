//! Configuration loading, validation, and management for Writingway.
//!
//! Loads configuration from `~/.writingway/config.toml` with environment
//! variable overrides. Validates all settings at startup, then hands out
//! immutable [`ProviderConfig`] values through [`AppConfig::resolve_provider`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use writingway_core::provider::{GenerationParams, ProviderConfig, Vendor};

/// The root configuration structure.
///
/// Maps directly to `~/.writingway/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generic API key, used when a provider has none of its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider used by new sessions
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Model used by new sessions when the provider names none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Providers tried in order once the primary exhausts its retries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_providers: Vec<String>,

    /// Provider catalogue, keyed by provider id
    #[serde(default)]
    pub providers: HashMap<String, ProviderSettings>,

    /// Retry and backoff policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Chunking and embedding settings
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Prompt assembly settings
    #[serde(default)]
    pub assembly: AssemblyConfig,

    /// Workshop (chat) settings
    #[serde(default)]
    pub workshop: WorkshopConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("fallback_providers", &self.fallback_providers)
            .field("providers", &self.providers)
            .field("retry", &self.retry)
            .field("indexing", &self.indexing)
            .field("retrieval", &self.retrieval)
            .field("assembly", &self.assembly)
            .field("workshop", &self.workshop)
            .finish()
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("vendor", &self.vendor)
            .field("api_key", &redact(&self.api_key))
            .field("api_key_env", &self.api_key_env)
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("models", &self.models)
            .field("context_window", &self.context_window)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// One entry of the provider catalogue.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Wire protocol. Inferred from the provider id when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<Vendor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Accepted models. Empty = accept any model name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Bounded wait for one request attempt
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_context_window() -> usize {
    8192
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts against the primary provider, first call included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Fraction of the computed delay added or removed at random
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Target chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Fraction of each chunk repeated at the start of the next one
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: f32,

    /// "hashing" (local, default) or "api"
    #[serde(default = "default_embedder")]
    pub embedder: String,

    /// Width of hashing embeddings
    #[serde(default = "default_hashing_dimensions")]
    pub hashing_dimensions: usize,

    /// Provider id serving embeddings when `embedder = "api"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> f32 {
    0.15
}
fn default_embedder() -> String {
    "hashing".into()
}
fn default_hashing_dimensions() -> usize {
    512
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_embedding_dimensions() -> usize {
    1536
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            embedder: default_embedder(),
            hashing_dimensions: default_hashing_dimensions(),
            embedding_provider: None,
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,

    /// Chunks at least this similar to an already selected chunk are skipped
    #[serde(default = "default_redundancy_threshold")]
    pub redundancy_threshold: f32,
}

fn default_top_k() -> usize {
    6
}
fn default_similarity_floor() -> f32 {
    0.1
}
fn default_redundancy_threshold() -> f32 {
    0.97
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_floor: default_similarity_floor(),
            redundancy_threshold: default_redundancy_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Share of the token budget history may claim before retrieval gets the rest
    #[serde(default = "default_history_fraction")]
    pub history_fraction: f32,

    /// Overrides the provider-derived budget when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<usize>,
}

fn default_history_fraction() -> f32 {
    0.5
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            history_fraction: default_history_fraction(),
            token_budget: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkshopConfig {
    /// Instructions placed at the top of every prompt
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Capacity of the per-request fragment channel
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

fn default_system_prompt() -> String {
    "You are a thoughtful writing partner helping an author with their novel. \
     Ground your answers in the project passages provided, keep the author's \
     voice, tense and point of view, and say so when the material does not \
     cover a question."
        .into()
}
fn default_stream_buffer() -> usize {
    64
}

impl Default for WorkshopConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.writingway/config.toml).
    ///
    /// Environment overrides:
    /// - `WRITINGWAY_API_KEY` (when the file has no generic key)
    /// - `WRITINGWAY_PROVIDER`
    /// - `WRITINGWAY_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("WRITINGWAY_API_KEY").ok();
        }

        if let Ok(provider) = std::env::var("WRITINGWAY_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("WRITINGWAY_MODEL") {
            config.default_model = Some(model);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".writingway")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.provider_settings(&self.default_provider).is_none() {
            return Err(ConfigError::UnknownProvider(self.default_provider.clone()));
        }

        for fallback in &self.fallback_providers {
            if self.provider_settings(fallback).is_none() {
                return Err(ConfigError::UnknownProvider(fallback.clone()));
            }
        }

        for (id, p) in &self.providers {
            if let Some(t) = p.temperature {
                if !(0.0..=2.0).contains(&t) {
                    return Err(ConfigError::ValidationError(format!(
                        "providers.{id}.temperature must be between 0.0 and 2.0"
                    )));
                }
            }
            if p.context_window == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{id}.context_window must be > 0"
                )));
            }
            if p.timeout_secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{id}.timeout_secs must be > 0"
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::ValidationError(
                "retry.jitter must be between 0.0 and 1.0".into(),
            ));
        }

        if self.indexing.chunk_size < 16 {
            return Err(ConfigError::ValidationError(
                "indexing.chunk_size must be at least 16 characters".into(),
            ));
        }
        if !(0.0..0.9).contains(&self.indexing.chunk_overlap) {
            return Err(ConfigError::ValidationError(
                "indexing.chunk_overlap must be in [0.0, 0.9)".into(),
            ));
        }
        match self.indexing.embedder.as_str() {
            "hashing" => {
                if self.indexing.hashing_dimensions == 0 {
                    return Err(ConfigError::ValidationError(
                        "indexing.hashing_dimensions must be > 0".into(),
                    ));
                }
            }
            "api" => {
                let provider = self
                    .indexing
                    .embedding_provider
                    .as_deref()
                    .unwrap_or(&self.default_provider);
                if self.provider_settings(provider).is_none() {
                    return Err(ConfigError::UnknownProvider(provider.to_string()));
                }
            }
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "indexing.embedder must be \"hashing\" or \"api\", got \"{other}\""
                )));
            }
        }

        if self.assembly.history_fraction <= 0.0 || self.assembly.history_fraction > 1.0 {
            return Err(ConfigError::ValidationError(
                "assembly.history_fraction must be in (0.0, 1.0]".into(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.similarity_floor) {
            return Err(ConfigError::ValidationError(
                "retrieval.similarity_floor must be between -1.0 and 1.0".into(),
            ));
        }

        Ok(())
    }

    /// Catalogue entry for `id`: configured first, then built-in defaults.
    pub fn provider_settings(&self, id: &str) -> Option<ProviderSettings> {
        self.providers
            .get(id)
            .cloned()
            .or_else(|| builtin_provider(id))
    }

    /// All provider ids known to this configuration, sorted.
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        if !ids.contains(&self.default_provider) {
            ids.push(self.default_provider.clone());
        }
        ids.sort();
        ids
    }

    /// Build the immutable [`ProviderConfig`] for a provider and model.
    ///
    /// `model = None` picks the provider's default model, then the global
    /// `default_model` for the default provider.
    pub fn resolve_provider(
        &self,
        id: &str,
        model: Option<&str>,
    ) -> Result<ProviderConfig, ConfigError> {
        let settings = self
            .provider_settings(id)
            .ok_or_else(|| ConfigError::UnknownProvider(id.to_string()))?;

        let model = model
            .map(str::to_string)
            .or_else(|| {
                if id == self.default_provider {
                    self.default_model.clone()
                } else {
                    None
                }
            })
            .or_else(|| settings.default_model.clone())
            .ok_or_else(|| ConfigError::MissingModel(id.to_string()))?;

        if !settings.models.is_empty() && !settings.models.contains(&model) {
            return Err(ConfigError::UnknownModel {
                provider: id.to_string(),
                model,
            });
        }

        let vendor = settings.vendor.unwrap_or_else(|| infer_vendor(id));
        let endpoint = settings
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(id, vendor))
            .trim_end_matches('/')
            .to_string();

        let api_key = settings
            .api_key
            .clone()
            .or_else(|| {
                settings
                    .api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
            })
            .or_else(|| {
                default_key_env(id).and_then(|var| std::env::var(var).ok())
            })
            .or_else(|| self.api_key.clone());

        let defaults = GenerationParams {
            temperature: settings.temperature.or(Some(self.default_temperature)),
            max_tokens: settings.max_tokens.or(Some(self.default_max_tokens)),
            top_p: settings.top_p,
        };

        Ok(ProviderConfig {
            id: id.to_string(),
            vendor,
            endpoint,
            api_key,
            model,
            models: settings.models.clone(),
            defaults,
            context_window: settings.context_window,
            timeout: Duration::from_secs(settings.timeout_secs),
        })
    }

    /// Resolve the default provider with its default model.
    pub fn resolve_default(&self) -> Result<ProviderConfig, ConfigError> {
        self.resolve_provider(&self.default_provider, None)
    }

    /// Resolve every fallback provider, in order.
    pub fn resolve_fallbacks(&self) -> Result<Vec<ProviderConfig>, ConfigError> {
        self.fallback_providers
            .iter()
            .map(|id| self.resolve_provider(id, None))
            .collect()
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let mut config = Self::default();
        if let Some(settings) = builtin_provider("openrouter") {
            config.providers.insert("openrouter".into(), settings);
        }
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: None,
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            fallback_providers: vec![],
            providers: HashMap::new(),
            retry: RetryConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            assembly: AssemblyConfig::default(),
            workshop: WorkshopConfig::default(),
        }
    }
}

/// Infer the wire protocol from a provider id.
fn infer_vendor(id: &str) -> Vendor {
    match id {
        "anthropic" => Vendor::Anthropic,
        "gemini" | "google" => Vendor::Gemini,
        _ => Vendor::OpenAi,
    }
}

/// Built-in catalogue entries for well-known providers.
fn builtin_provider(id: &str) -> Option<ProviderSettings> {
    let (default_model, context_window) = match id {
        "openrouter" => ("anthropic/claude-sonnet-4", 200_000),
        "openai" => ("gpt-4o-mini", 128_000),
        "anthropic" => ("claude-sonnet-4-20250514", 200_000),
        "gemini" | "google" => ("gemini-2.0-flash", 1_000_000),
        "ollama" => ("llama3.1", 8192),
        "lmstudio" => ("local-model", 8192),
        _ => return None,
    };
    Some(ProviderSettings {
        vendor: Some(infer_vendor(id)),
        default_model: Some(default_model.into()),
        context_window,
        timeout_secs: default_timeout_secs(),
        ..ProviderSettings::default()
    })
}

/// Get the default base URL for well-known providers.
fn default_base_url(id: &str, vendor: Vendor) -> String {
    match (id, vendor) {
        ("openrouter", _) => "https://openrouter.ai/api/v1".into(),
        ("ollama", _) => "http://localhost:11434/v1".into(),
        ("lmstudio", _) => "http://localhost:1234/v1".into(),
        (_, Vendor::Anthropic) => "https://api.anthropic.com".into(),
        (_, Vendor::Gemini) => "https://generativelanguage.googleapis.com".into(),
        (_, Vendor::OpenAi) => "https://api.openai.com/v1".into(),
    }
}

/// Conventional API key variable for well-known providers.
fn default_key_env(id: &str) -> Option<&'static str> {
    match id {
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "gemini" | "google" => Some("GEMINI_API_KEY"),
        _ => None,
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Provider '{0}' is not configured")]
    UnknownProvider(String),

    #[error("Model '{model}' is not listed for provider '{provider}'")]
    UnknownModel { provider: String, model: String },

    #[error("No model given and provider '{0}' has no default model")]
    MissingModel(String),
}

impl From<ConfigError> for writingway_core::Error {
    fn from(e: ConfigError) -> Self {
        writingway_core::Error::Config {
            message: e.to_string(),
        }
    }
}
