//! Grounded conversation sessions for Writingway.
//!
//! A session turns the author's message into a prompt in four steps:
//!
//! 1. **Retrieve** passages of the project relevant to the message
//! 2. **Assemble** template, history and passages within the token budget
//! 3. **Generate** through the aggregator, streaming fragments back
//! 4. **Record** the user and assistant turns once the reply completes
//!
//! [`Workshop`] is the facade hosts call; the pieces are usable alone.

pub mod assembler;
pub mod error;
pub mod session;
pub mod stream_event;
pub mod token;
pub mod workshop;

pub use assembler::{AssembledPrompt, AssemblyError, ContextAssembler};
pub use error::WorkshopError;
pub use session::{ConversationSession, SessionError, SessionSettings, SessionState};
pub use stream_event::StreamEvent;
pub use token::{HeuristicCounter, TokenCounter};
pub use workshop::{SessionOptions, StreamHandle, Workshop, build_embedder};
