//! Error types for the entity store.

use thiserror::Error;

use loam_embeddings::EmbedderError;
use loam_persistence::PersistenceError;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in the entity store.
///
/// Open failures abort construction entirely; per-operation failures are
/// surfaced per call and never retried internally. Retry policy belongs
/// to the caller.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Entity, tag, or association does not exist.
    #[error("item not found: {id}")]
    NotFound { id: String },

    /// A stored payload failed to deserialize.
    #[error("invalid stored content: {0}")]
    InvalidContent(String),

    /// Persistence-layer failure, including migration outcomes.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Embedding failure during indexing or search.
    #[error(transparent)]
    Embedding(#[from] EmbedderError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }
}
