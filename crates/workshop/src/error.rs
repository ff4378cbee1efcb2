use thiserror::Error;
use writingway_config::ConfigError;
use writingway_core::error::{GenerationError, IndexError};
use writingway_core::message::SessionId;

use crate::assembler::AssemblyError;
use crate::session::SessionError;

/// Errors surfaced by the [`Workshop`](crate::Workshop) facade.
#[derive(Debug, Error)]
pub enum WorkshopError {
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Prompt assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl From<WorkshopError> for writingway_core::Error {
    fn from(e: WorkshopError) -> Self {
        match e {
            WorkshopError::Index(e) => writingway_core::Error::Index(e),
            WorkshopError::Generation(e) => writingway_core::Error::Generation(e),
            WorkshopError::Config(e) => e.into(),
            other => writingway_core::Error::Internal(other.to_string()),
        }
    }
}
