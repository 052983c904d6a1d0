//! Engine error taxonomy.
//!
//! Failures that callers need to tell apart get their own variant; everything
//! else is carried through as [`EngineError::Other`]. Strategy runners never
//! surface these — they degrade to empty candidate lists — but index
//! lifecycle operations report them synchronously.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad request input, rejected before any state change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Build found nothing to index for the configured targets.
    #[error("no source texts found for indexing")]
    NoSourceTexts,

    /// The encoder model required for a dense build is not loadable.
    #[error("encoder model '{0}' is not ready: {1}")]
    EncoderNotReady(String, String),

    /// A build is already in flight for this descriptor. Retriable.
    #[error("a build is already in flight for index {0}")]
    Conflict(String),

    /// Index storage could not be written or read back consistently.
    #[error("index storage error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Other(e.into())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}
