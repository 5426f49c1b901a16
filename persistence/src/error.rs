//! Error types for the persistence layer.

use thiserror::Error;

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Errors that can occur in the persistence layer.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// A store was opened with migrations disallowed but its persisted
    /// schema version differs from the runtime version.
    #[error("migration required for {store}")]
    MigrationRequired { store: String },

    /// The persisted schema version is newer than this build understands.
    #[error("stored data for {store} is newer than this build ({stored} > {runtime})")]
    StoreOutdated {
        store: String,
        stored: String,
        runtime: String,
    },

    /// A document's version has no registered upgrade path.
    #[error("no migration path registered for version {version}")]
    UnmigratableDocument { version: String },

    /// A schema version string failed to parse.
    #[error("invalid schema version: {0}")]
    InvalidVersion(String),

    /// A stored document is missing required structure.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedding error while indexing or searching vector documents.
    #[error("embedding error: {0}")]
    Embedding(#[from] loam_embeddings::EmbedderError),
}
