//! # Writingway Core
//!
//! Domain types, traits, and error definitions shared by every Writingway
//! crate. Nothing in here talks to the network or the filesystem; the
//! vendor adapters, the document index and the workshop sessions all
//! implement against the types defined here.
//!
//! ## Layout
//!
//! - [`provider`] — the vendor-neutral generation contract ([`ProviderAdapter`])
//! - [`embedding`] — the [`Embedder`] trait shared by indexing and retrieval
//! - [`message`] — chat messages and conversation turns
//! - [`event`] — structured diagnostics published on an [`EventBus`]
//! - [`error`] — the error taxonomy, one enum per bounded context

pub mod embedding;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use embedding::Embedder;
pub use error::{EmbeddingError, Error, GenerationError, IndexError, ProviderError, Result};
pub use event::{DiagnosticEvent, EventBus};
pub use message::{ChatMessage, ConversationTurn, PromptRecord, Role, SessionId};
pub use provider::{
    Completion, GenerationParams, GenerationRequest, ProviderAdapter, ProviderConfig,
    ChunkReceiver, StreamChunk, Usage, Vendor, VendorFailure,
};
